//! # Scheduler
//!
//! A single background thread that runs tasks after a delay. Used for telecommand follow-ups,
//! such as querying the delay a short while after setting it, without blocking the main loop.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, warn};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct Scheduler {
    shared: Arc<Shared>,
    join_handle: Option<JoinHandle<()>>,
}

struct Shared {
    queue: Mutex<Queue>,
    changed: Condvar,
}

#[derive(Default)]
struct Queue {
    tasks: BinaryHeap<Pending>,
    next_seq: u64,
    shutdown: bool,
}

struct Pending {
    due: Instant,

    /// Insertion order, breaks ties between tasks due at the same instant
    seq: u64,

    task: Task,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Scheduler {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            changed: Condvar::new(),
        });

        let shared_clone = shared.clone();
        let join_handle = thread::spawn(move || run(shared_clone));

        Self {
            shared,
            join_handle: Some(join_handle),
        }
    }

    /// Run `task` once `delay` has elapsed.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.lock();
        if queue.shutdown {
            warn!("Scheduler is shut down, dropping task");
            return;
        }

        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.tasks.push(Pending {
            due: Instant::now() + delay,
            seq,
            task: Box::new(task),
        });

        self.shared.changed.notify_all();
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.lock().tasks.len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.lock();
            queue.shutdown = true;
            let dropped = queue.tasks.len();
            if dropped > 0 {
                debug!("Dropping {} scheduled tasks", dropped);
            }
            queue.tasks.clear();
        }
        self.shared.changed.notify_all();

        if let Some(jh) = self.join_handle.take() {
            jh.join().ok();
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// BinaryHeap is a max-heap, so the ordering is reversed to pop the earliest task first.
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Pending {}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn run(shared: Arc<Shared>) {
    let mut queue = shared.lock();

    loop {
        if queue.shutdown {
            return;
        }

        let now = Instant::now();
        let next_due = queue.tasks.peek().map(|p| p.due);

        match next_due {
            Some(due) if due <= now => {
                if let Some(pending) = queue.tasks.pop() {
                    // Tasks may schedule further tasks, so the lock is released while running
                    drop(queue);
                    (pending.task)();
                    queue = shared.lock();
                }
            }
            Some(due) => {
                queue = match shared.changed.wait_timeout(queue, due - now) {
                    Ok((q, _)) => q,
                    Err(e) => e.into_inner().0,
                };
            }
            None => {
                queue = match shared.changed.wait(queue) {
                    Ok(q) => q,
                    Err(e) => e.into_inner(),
                };
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_runs_in_due_order() {
        let scheduler = Scheduler::new();
        let (tx, rx) = channel();

        for (delay_ms, label) in [(60u64, "c"), (20, "a"), (40, "b"), (20, "a2")].iter() {
            let tx = tx.clone();
            let label = *label;
            scheduler.schedule(Duration::from_millis(*delay_ms), move || {
                tx.send(label).unwrap();
            });
        }

        let order: Vec<&str> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(order, vec!["a", "a2", "b", "c"]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_drop_discards_pending() {
        let (tx, rx) = channel::<()>();
        {
            let scheduler = Scheduler::new();
            scheduler.schedule(Duration::from_secs(60), move || {
                tx.send(()).unwrap();
            });
            assert_eq!(scheduler.pending(), 1);
        }
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}

//! # Gripper State
//!
//! Holds the last known status of the gripper, as decoded from its telemetry. The state is only
//! ever written by the telemetry path, through [`StateWatch::apply`], and is read by the perch
//! sequencer and by status reports.
//!
//! Two update rules apply:
//! - a failed decode only clears `validity`, every other field keeps its previous value,
//! - `new_status_received` latches when the status word changes and stays set until a consumer
//!   clears it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Condvar, Mutex, MutexGuard,
};
use std::thread;
use std::time::{Duration, Instant};

use comms_if::eqpt::gecko::{DecodeError, ErrorStatus, StatusPacket};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Last known status of the gripper.
#[derive(Debug, Clone, PartialEq)]
pub struct GripperState {
    last_status_read_time: i32,
    error_status: ErrorStatus,
    adhesive_engage: bool,
    wrist_lock: bool,
    automatic_mode_enable: bool,
    experiment_in_progress: bool,
    file_is_open: bool,
    overtemperature_flag: bool,
    exp_idx: i16,
    delay: i16,
    validity: bool,
    new_status_received: bool,

    /// Status word of the last valid status packet, `None` until one has been received
    status_word: Option<u16>,
}

/// Serializable snapshot of the gripper state, as sent to the ground.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GripperStateReport {
    #[serde(rename = "Last Status Read Time")]
    pub last_status_read_time: i32,

    #[serde(rename = "Error Status")]
    pub error_status: String,

    #[serde(rename = "Adhesive Engage")]
    pub adhesive_engage: bool,

    #[serde(rename = "Wrist Lock")]
    pub wrist_lock: bool,

    #[serde(rename = "Automatic Mode Enable")]
    pub automatic_mode_enable: bool,

    #[serde(rename = "Experiment in Progress")]
    pub experiment_in_progress: bool,

    #[serde(rename = "Overtemperature Flag")]
    pub overtemperature_flag: bool,

    #[serde(rename = "File is Open")]
    pub file_is_open: bool,

    #[serde(rename = "Experiment Idx")]
    pub exp_idx: i16,

    #[serde(rename = "Delay")]
    pub delay: i16,

    #[serde(rename = "Validity")]
    pub validity: bool,

    #[serde(rename = "New Status Received")]
    pub new_status_received: bool,
}

/// Shared stop flag used to interrupt waits.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

/// The gripper state shared between the telemetry threads (writers) and its readers.
///
/// Readers can block until a predicate holds on the state, waking whenever a new packet is applied
/// or a poll period elapses.
#[derive(Debug, Default)]
pub struct StateWatch {
    state: Mutex<GripperState>,
    changed: Condvar,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("Timed out waiting on the gripper state")]
    Timeout,

    #[error("Wait interrupted by a stop request")]
    Interrupted,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GripperState {
    /// Apply the result of decoding a telemetry message.
    pub fn apply_decoded(&mut self, result: &Result<StatusPacket, DecodeError>) {
        let pkt = match result {
            Ok(p) => p,
            Err(e) => {
                debug!("Invalid gripper telemetry: {}", e);
                self.validity = false;
                return;
            }
        };

        if self.status_word != Some(pkt.status_word) {
            trace!(
                "Status word changed from {:?} to 0x{:04X}",
                self.status_word,
                pkt.status_word
            );
            self.new_status_received = true;
        }
        self.status_word = Some(pkt.status_word);

        match pkt.error_status {
            Some(e) => self.error_status = e,
            None => warn!(
                "Unknown gripper error code {}, keeping {}",
                pkt.error_code, self.error_status
            ),
        }

        self.last_status_read_time = pkt.last_status_read_time;
        self.overtemperature_flag = pkt.flags.overtemperature;
        self.experiment_in_progress = pkt.flags.experiment_in_progress;
        self.file_is_open = pkt.flags.file_is_open;
        self.automatic_mode_enable = pkt.flags.automatic_mode_enable;
        self.wrist_lock = pkt.flags.wrist_lock;
        self.adhesive_engage = pkt.flags.adhesive_engage;
        self.delay = pkt.delay_ms;
        self.exp_idx = pkt.exp_idx;
        self.validity = true;
    }

    pub fn clear_new_status_flag(&mut self) {
        self.new_status_received = false;
    }

    pub fn is_valid(&self) -> bool {
        self.validity
    }

    pub fn last_status_read_time(&self) -> i32 {
        self.last_status_read_time
    }

    pub fn error_status(&self) -> ErrorStatus {
        self.error_status
    }

    pub fn adhesive_engage(&self) -> bool {
        self.adhesive_engage
    }

    pub fn wrist_lock(&self) -> bool {
        self.wrist_lock
    }

    pub fn automatic_mode_enable(&self) -> bool {
        self.automatic_mode_enable
    }

    pub fn experiment_in_progress(&self) -> bool {
        self.experiment_in_progress
    }

    pub fn file_is_open(&self) -> bool {
        self.file_is_open
    }

    pub fn overtemperature_flag(&self) -> bool {
        self.overtemperature_flag
    }

    pub fn exp_idx(&self) -> i16 {
        self.exp_idx
    }

    pub fn delay(&self) -> i16 {
        self.delay
    }

    pub fn new_status_received(&self) -> bool {
        self.new_status_received
    }

    /// Build the report sent to the ground.
    pub fn to_report(&self) -> GripperStateReport {
        GripperStateReport {
            last_status_read_time: self.last_status_read_time,
            error_status: self.error_status.to_string(),
            adhesive_engage: self.adhesive_engage,
            wrist_lock: self.wrist_lock,
            automatic_mode_enable: self.automatic_mode_enable,
            experiment_in_progress: self.experiment_in_progress,
            overtemperature_flag: self.overtemperature_flag,
            file_is_open: self.file_is_open,
            exp_idx: self.exp_idx,
            delay: self.delay,
            validity: self.validity,
            new_status_received: self.new_status_received,
        }
    }
}

impl Default for GripperState {
    fn default() -> Self {
        Self {
            last_status_read_time: -1,
            error_status: ErrorStatus::NoError,
            adhesive_engage: false,
            wrist_lock: false,
            automatic_mode_enable: false,
            experiment_in_progress: false,
            file_is_open: false,
            overtemperature_flag: false,
            exp_idx: -1,
            delay: -1,
            validity: false,
            new_status_received: false,
            status_word: None,
        }
    }
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that any wait using this signal stops.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear the stop request, done before starting a new run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, checking the signal every `poll`.
    pub fn sleep(&self, duration: Duration, poll: Duration) -> Result<(), WaitError> {
        let deadline = Instant::now() + duration;

        loop {
            if self.is_stopped() {
                return Err(WaitError::Interrupted);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }

            thread::sleep(poll.min(deadline - now));
        }
    }
}

impl StateWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the state. A panicking writer cannot leave the state half updated, so poisoning is
    /// ignored.
    fn lock(&self) -> MutexGuard<'_, GripperState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a decode result and wake any waiters.
    pub fn apply(&self, result: &Result<StatusPacket, DecodeError>) {
        self.lock().apply_decoded(result);
        self.changed.notify_all();
    }

    /// Get a copy of the current state.
    pub fn snapshot(&self) -> GripperState {
        self.lock().clone()
    }

    pub fn clear_new_status_flag(&self) {
        self.lock().clear_new_status_flag();
    }

    /// Block until `pred` holds on the state.
    ///
    /// The stop signal is checked first, then the predicate, then the timeout. The state is
    /// rechecked at least every `poll`.
    pub fn wait_until<F>(
        &self,
        pred: F,
        timeout: Duration,
        poll: Duration,
        stop: &StopSignal,
    ) -> Result<GripperState, WaitError>
    where
        F: Fn(&GripperState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        loop {
            if stop.is_stopped() {
                return Err(WaitError::Interrupted);
            }

            if pred(&state) {
                return Ok(state.clone());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::Timeout);
            }

            state = match self.changed.wait_timeout(state, poll.min(deadline - now)) {
                Ok((s, _)) => s,
                Err(e) => e.into_inner().0,
            };
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::gecko::{StatusFlags, StatusPacket};

    fn packet(word: u16, delay: i16, exp_idx: i16) -> Result<StatusPacket, DecodeError> {
        Ok(StatusPacket::new(
            10,
            StatusFlags::from_word(word),
            delay,
            exp_idx,
            ErrorStatus::NoError,
        ))
    }

    #[test]
    fn test_failed_decode_only_clears_validity() {
        let mut state = GripperState::default();
        state.apply_decoded(&packet(0x0101, 250, 3));
        let before = state.clone();

        for err in [
            DecodeError::InvalidHeader,
            DecodeError::Unsupported(0x01),
            DecodeError::Truncated { expected: 2, found: 1 },
        ]
        .iter()
        {
            state.apply_decoded(&Err(err.clone()));
            assert!(!state.is_valid());

            let mut expected = before.clone();
            expected.validity = false;
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn test_new_status_latch() {
        let mut state = GripperState::default();
        assert!(!state.new_status_received());

        // First packet always latches
        state.apply_decoded(&packet(0x0000, 0, 0));
        assert!(state.new_status_received());
        state.clear_new_status_flag();

        // Same word, no latch even if delay changes
        state.apply_decoded(&packet(0x0000, 100, 0));
        assert!(!state.new_status_received());

        // Several changes, stays latched until cleared
        state.apply_decoded(&packet(0x0001, 100, 0));
        state.apply_decoded(&packet(0x0003, 100, 0));
        state.apply_decoded(&packet(0x0001, 100, 0));
        assert!(state.new_status_received());
        state.clear_new_status_flag();
        assert!(!state.new_status_received());

        state.apply_decoded(&packet(0x0001, 100, 0));
        assert!(!state.new_status_received());
    }

    #[test]
    fn test_unknown_error_code_keeps_previous() {
        let mut state = GripperState::default();
        let mut pkt = StatusPacket::new(
            1,
            StatusFlags::default(),
            0,
            0,
            ErrorStatus::CRCError,
        );
        state.apply_decoded(&Ok(pkt.clone()));
        assert_eq!(state.error_status(), ErrorStatus::CRCError);

        pkt.error_status = None;
        pkt.error_code = 99;
        pkt.last_status_read_time = 2;
        state.apply_decoded(&Ok(pkt));
        assert_eq!(state.error_status(), ErrorStatus::CRCError);
        assert_eq!(state.last_status_read_time(), 2);
        assert!(state.is_valid());
    }

    #[test]
    fn test_report_labels() {
        let mut state = GripperState::default();
        state.apply_decoded(&packet(0x0101, 250, 3));

        let json = serde_json::to_value(state.to_report()).unwrap();
        assert_eq!(json["Error Status"], "No Error");
        assert_eq!(json["Adhesive Engage"], true);
        assert_eq!(json["Experiment in Progress"], true);
        assert_eq!(json["Wrist Lock"], false);
        assert_eq!(json["Delay"], 250);
        assert_eq!(json["Experiment Idx"], 3);
        assert_eq!(json["Validity"], true);
    }

    #[test]
    fn test_wait_until() {
        let watch = Arc::new(StateWatch::new());
        let stop = StopSignal::new();
        let poll = Duration::from_millis(1);

        assert_eq!(
            watch.wait_until(|s| s.wrist_lock(), Duration::from_millis(20), poll, &stop),
            Err(WaitError::Timeout)
        );

        let writer = watch.clone();
        let jh = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.apply(&packet(0x0002, 0, 0));
        });

        let state = watch
            .wait_until(|s| s.wrist_lock(), Duration::from_secs(5), poll, &stop)
            .unwrap();
        assert!(state.wrist_lock());
        jh.join().unwrap();

        stop.stop();
        assert_eq!(
            watch.wait_until(|s| s.wrist_lock(), Duration::from_secs(5), poll, &stop),
            Err(WaitError::Interrupted)
        );
    }

    #[test]
    fn test_stop_signal_sleep() {
        let stop = StopSignal::new();
        let poll = Duration::from_millis(1);
        assert_eq!(stop.sleep(Duration::from_millis(5), poll), Ok(()));

        let other = stop.clone();
        let jh = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            other.stop();
        });
        let start = Instant::now();
        assert_eq!(
            stop.sleep(Duration::from_secs(10), poll),
            Err(WaitError::Interrupted)
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        jh.join().unwrap();

        stop.reset();
        assert!(!stop.is_stopped());
    }
}

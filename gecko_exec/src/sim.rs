//! # Simulation
//!
//! A simulated gripper and motion provider, used to run the exec without hardware (`--sim`) and
//! by the perch sequence tests.
//!
//! The simulated gripper answers every command message with a status packet, encoded and then
//! decoded through the wire codec the same way real telemetry is. Its faults are configured with
//! [`SimGripperConfig`].
//!
//! The simulated motion provider moves instantly. Moves are taken from a queue of scripted
//! [`SimMove`]s. Once the queue is empty, a move towards a surface touches it and is stopped
//! short, and any move made while perched is blocked.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use comms_if::eqpt::{
    gecko::{self, ErrorStatus, GripperCmd, JointMsg, StatusFlags, StatusPacket},
    motion::{MoveResult, Pose, TOLERANCE_VIOLATED},
};
use log::{debug, trace};
use nalgebra::Vector3;

use crate::{
    gripper_link::{GripperCmdSink, LinkError},
    gripper_state::StateWatch,
    motion::MotionProvider,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Faults injected into the simulated gripper.
#[derive(Debug, Clone, Default)]
pub struct SimGripperConfig {
    /// Added to the delay the gripper reports after a set_delay
    pub delay_error_ms: i16,

    /// Added to the index the gripper reports after an open_exp
    pub exp_idx_error: i16,

    /// If true enable_auto has no effect
    pub auto_mode_broken: bool,

    /// If true the wrist stays locked after an unlock
    pub stuck_lock: bool,

    /// If true the experiment file stays open after a close_exp
    pub close_sticks: bool,
}

/// A simulated gripper, also acting as the command sink of a link.
#[derive(Clone)]
pub struct SimGripper {
    device: Arc<Mutex<SimDevice>>,
    watch: Arc<StateWatch>,
    log: Arc<Mutex<Vec<JointMsg>>>,
}

/// Lets a simulated surface touch the gripper.
#[derive(Clone)]
pub struct ContactTrigger {
    device: Arc<Mutex<SimDevice>>,
    watch: Arc<StateWatch>,
}

/// A simulated motion provider.
pub struct SimMotion {
    pose: Pose,
    moves: VecDeque<SimMove>,
    contact: Option<ContactTrigger>,
    perched: bool,

    /// Number of trusted kinematics reads left, `None` for unlimited
    kinematics_reads: Option<usize>,
}

#[derive(Debug)]
struct SimDevice {
    config: SimGripperConfig,
    flags: StatusFlags,
    delay_ms: i16,
    exp_idx: i16,
    record: i32,
    time: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A scripted result for the next move.
#[derive(Debug, Clone, PartialEq)]
pub enum SimMove {
    /// Reach the target
    Reach,

    /// Stop halfway, touching a surface if one is set
    Touch,

    /// Stop short without touching anything
    Blocked,

    /// Fail with the given message, the robot does not move
    Fail(String),

    /// Move by the given offset from the current position and report success
    Displace(Vector3<f64>),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimGripper {
    pub fn new(watch: Arc<StateWatch>, config: SimGripperConfig) -> Self {
        Self {
            device: Arc::new(Mutex::new(SimDevice::new(config))),
            watch,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Trigger that engages and locks the gripper when a surface is touched in automatic mode.
    pub fn contact_trigger(&self) -> ContactTrigger {
        ContactTrigger {
            device: self.device.clone(),
            watch: self.watch.clone(),
        }
    }

    /// Every message received so far.
    pub fn published(&self) -> Vec<JointMsg> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of times a command appeared in the received messages.
    pub fn count(&self, cmd: GripperCmd) -> usize {
        self.published()
            .iter()
            .flat_map(|m| m.name.iter())
            .filter(|n| n.as_str() == cmd.name())
            .count()
    }

    /// Emit a status packet without any command, as a periodic status would.
    pub fn emit_status(&self) {
        let mut device = lock(&self.device);
        device.emit(&self.watch);
    }
}

impl GripperCmdSink for SimGripper {
    fn publish(&mut self, msg: &JointMsg) -> Result<(), LinkError> {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(msg.clone());

        let mut device = lock(&self.device);
        for (name, param) in msg.cmds() {
            match GripperCmd::from_name(name) {
                Some(cmd) => device.apply(cmd, param),
                None => debug!("Sim gripper ignoring unknown command {}", name),
            }
        }
        device.emit(&self.watch);

        Ok(())
    }
}

impl ContactTrigger {
    /// Touch a surface. Returns true if the gripper engaged and locked.
    pub fn touch(&self) -> bool {
        let mut device = lock(&self.device);

        let perched = device.flags.automatic_mode_enable;
        if perched {
            device.flags.adhesive_engage = true;
            device.flags.wrist_lock = true;
        }
        device.emit(&self.watch);

        perched
    }
}

impl SimDevice {
    fn new(config: SimGripperConfig) -> Self {
        Self {
            config,
            flags: StatusFlags::default(),
            delay_ms: 0,
            exp_idx: 0,
            record: 0,
            time: 0,
        }
    }

    fn apply(&mut self, cmd: GripperCmd, param: f64) {
        trace!("Sim gripper {:?}({})", cmd, param);

        match cmd {
            GripperCmd::Engage => self.flags.adhesive_engage = true,
            GripperCmd::Disengage => self.flags.adhesive_engage = false,
            GripperCmd::Lock => self.flags.wrist_lock = true,
            GripperCmd::Unlock => self.flags.wrist_lock &= self.config.stuck_lock,
            GripperCmd::EnableAuto => {
                self.flags.automatic_mode_enable = !self.config.auto_mode_broken
            }
            GripperCmd::DisableAuto => self.flags.automatic_mode_enable = false,
            GripperCmd::SetDelay => {
                self.delay_ms = (param as i16).saturating_add(self.config.delay_error_ms)
            }
            GripperCmd::OpenExp => {
                self.exp_idx = (param as i16).saturating_add(self.config.exp_idx_error);
                self.record = 0;
                self.flags.file_is_open = true;
                self.flags.experiment_in_progress = true;
            }
            GripperCmd::CloseExp => {
                if !self.config.close_sticks {
                    self.flags.file_is_open = false;
                    self.flags.experiment_in_progress = false;
                }
            }
            GripperCmd::NextRecord => self.record = self.record.saturating_add(param as i32),
            GripperCmd::SeekRecord => self.record = param as i32,
            GripperCmd::Open
            | GripperCmd::Close
            | GripperCmd::MarkGripper
            | GripperCmd::Status
            | GripperCmd::Record
            | GripperCmd::Exp
            | GripperCmd::Delay => (),
        }
    }

    fn emit(&mut self, watch: &StateWatch) {
        self.time = self.time.wrapping_add(1);
        let packet = StatusPacket::new(
            self.time,
            self.flags,
            self.delay_ms,
            self.exp_idx,
            ErrorStatus::NoError,
        );
        watch.apply(&gecko::decode(&packet.to_slots()));
    }
}

impl SimMotion {
    pub fn new(initial: Pose) -> Self {
        Self {
            pose: initial,
            moves: VecDeque::new(),
            contact: None,
            perched: false,
            kinematics_reads: None,
        }
    }

    /// Place a surface along every move, touching it triggers the gripper.
    pub fn with_contact(mut self, trigger: ContactTrigger) -> Self {
        self.contact = Some(trigger);
        self
    }

    /// Queue scripted move results, used before the default behaviour.
    pub fn with_moves<I: IntoIterator<Item = SimMove>>(mut self, moves: I) -> Self {
        self.moves.extend(moves);
        self
    }

    /// Only answer `reads` kinematics requests, later requests get no trusted pose.
    pub fn with_kinematics_reads(mut self, reads: usize) -> Self {
        self.kinematics_reads = Some(reads);
        self
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    fn default_move(&mut self, target: &Pose) -> MoveResult {
        if self.perched {
            return MoveResult::failed(TOLERANCE_VIOLATED);
        }

        match self.contact {
            Some(_) => self.touch(target),
            None => {
                self.pose = *target;
                MoveResult::ok()
            }
        }
    }

    /// Stop halfway to the target, where the surface is.
    fn touch(&mut self, target: &Pose) -> MoveResult {
        self.pose.position_m = (self.pose.position_m + target.position_m) / 2.0;
        if let Some(trigger) = &self.contact {
            self.perched = trigger.touch();
        }
        MoveResult::failed(&format!("Motion stopped: {}", TOLERANCE_VIOLATED))
    }
}

impl MotionProvider for SimMotion {
    fn move_to(&mut self, target: &Pose) -> MoveResult {
        let result = match self.moves.pop_front() {
            Some(SimMove::Reach) => {
                self.pose = *target;
                MoveResult::ok()
            }
            Some(SimMove::Touch) => self.touch(target),
            Some(SimMove::Blocked) => MoveResult::failed(TOLERANCE_VIOLATED),
            Some(SimMove::Fail(message)) => MoveResult::failed(&message),
            Some(SimMove::Displace(offset)) => {
                self.pose.position_m += offset;
                MoveResult::ok()
            }
            None => self.default_move(target),
        };

        debug!("Sim move to {:?}: {:?}", target.position_m, result);
        result
    }

    fn get_trusted_kinematics(&mut self, _timeout: Duration) -> Option<Pose> {
        match self.kinematics_reads.as_mut() {
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(self.pose)
            }
            None => Some(self.pose),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn lock(device: &Mutex<SimDevice>) -> MutexGuard<'_, SimDevice> {
    device.lock().unwrap_or_else(|e| e.into_inner())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

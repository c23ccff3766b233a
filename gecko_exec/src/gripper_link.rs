//! # Gripper Link
//!
//! The link is the session object between the exec and the gripper. It publishes primitive
//! commands through a [`GripperCmdSink`] and feeds decoded telemetry into the shared
//! [`StateWatch`]. Commands are fire-and-forget, their effect is only visible once the gripper
//! reports its new status.
//!
//! The link also runs the feedback perching loop: once armed, the first control error sample at or
//! above the tolerance engages and locks the gripper, then the loop disarms itself.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, Mutex, MutexGuard};

use comms_if::eqpt::gecko::{self, CmdBatch, DecodeError, GripperCmd, JointMsg, StatusPacket};
use log::{debug, info};

use crate::gripper_state::{GripperState, StateWatch};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Destination of outbound gripper messages.
pub trait GripperCmdSink: Send {
    fn publish(&mut self, msg: &JointMsg) -> Result<(), LinkError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct GripperLink {
    sink: Mutex<Box<dyn GripperCmdSink>>,
    watch: Arc<StateWatch>,
    feedback: Mutex<FeedbackPerch>,
}

/// State of the feedback perching loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackPerch {
    pub enabled: bool,

    /// Control error, in meters, at or above which the gripper is engaged and locked
    pub error_tolerance: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinkError {
    #[error("Could not publish the gripper command: {0}")]
    PublishError(String),

    #[error("Could not serialize the gripper command: {0}")]
    SerializationError(String),

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("Invalid error tolerance {0}%, must be a positive number")]
    InvalidTolerance(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GripperLink {
    pub fn new(
        sink: Box<dyn GripperCmdSink>,
        watch: Arc<StateWatch>,
        error_tolerance: f64,
    ) -> Self {
        Self {
            sink: Mutex::new(sink),
            watch,
            feedback: Mutex::new(FeedbackPerch {
                enabled: false,
                error_tolerance,
            }),
        }
    }

    /// The shared state this link writes telemetry into.
    pub fn watch(&self) -> &Arc<StateWatch> {
        &self.watch
    }

    /// Snapshot of the last known gripper state.
    pub fn state(&self) -> GripperState {
        self.watch.snapshot()
    }

    /// Publish a batch of commands as a single message.
    pub fn send(&self, batch: &CmdBatch) -> Result<(), LinkError> {
        if batch.is_empty() {
            return Ok(());
        }

        let msg = batch.to_msg();
        debug!("Gripper command {:?} {:?}", msg.name, msg.position);

        self.sink
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .publish(&msg)
    }

    fn cmd(&self, cmd: GripperCmd) -> Result<(), LinkError> {
        self.send(&CmdBatch::from(cmd))
    }

    fn cmd_with(&self, cmd: GripperCmd, param: f64) -> Result<(), LinkError> {
        self.send(&CmdBatch::new().with_param(cmd, param))
    }

    pub fn open(&self) -> Result<(), LinkError> {
        self.cmd(GripperCmd::Open)
    }

    pub fn close(&self) -> Result<(), LinkError> {
        self.cmd(GripperCmd::Close)
    }

    pub fn engage(&self) -> Result<(), LinkError> {
        self.cmd(GripperCmd::Engage)
    }

    pub fn disengage(&self) -> Result<(), LinkError> {
        self.cmd(GripperCmd::Disengage)
    }

    pub fn lock(&self) -> Result<(), LinkError> {
        self.cmd(GripperCmd::Lock)
    }

    pub fn unlock(&self) -> Result<(), LinkError> {
        self.cmd(GripperCmd::Unlock)
    }

    /// Engage then lock, in one message.
    pub fn engage_lock(&self) -> Result<(), LinkError> {
        self.send(
            &CmdBatch::new()
                .with(GripperCmd::Engage)
                .with(GripperCmd::Lock),
        )
    }

    pub fn enable_auto(&self) -> Result<(), LinkError> {
        self.cmd(GripperCmd::EnableAuto)
    }

    pub fn disable_auto(&self) -> Result<(), LinkError> {
        self.cmd(GripperCmd::DisableAuto)
    }

    pub fn toggle_auto(&self) -> Result<(), LinkError> {
        Err(LinkError::NotImplemented("toggle_auto"))
    }

    pub fn mark_gripper(&self, idx: i16) -> Result<(), LinkError> {
        self.cmd_with(GripperCmd::MarkGripper, idx as f64)
    }

    pub fn set_delay(&self, delay_ms: i16) -> Result<(), LinkError> {
        self.cmd_with(GripperCmd::SetDelay, delay_ms as f64)
    }

    pub fn open_experiment(&self, idx: i16) -> Result<(), LinkError> {
        self.cmd_with(GripperCmd::OpenExp, idx as f64)
    }

    pub fn close_experiment(&self) -> Result<(), LinkError> {
        self.cmd(GripperCmd::CloseExp)
    }

    pub fn next_record(&self, skip: i32) -> Result<(), LinkError> {
        self.cmd_with(GripperCmd::NextRecord, skip as f64)
    }

    pub fn seek_record(&self, record: i32) -> Result<(), LinkError> {
        self.cmd_with(GripperCmd::SeekRecord, record as f64)
    }

    pub fn query_delay(&self) -> Result<(), LinkError> {
        self.cmd(GripperCmd::Delay)
    }

    pub fn query_experiment_index(&self) -> Result<(), LinkError> {
        self.cmd(GripperCmd::Exp)
    }

    pub fn query_status(&self) -> Result<(), LinkError> {
        self.cmd(GripperCmd::Status)
    }

    pub fn query_record(&self) -> Result<(), LinkError> {
        self.cmd(GripperCmd::Record)
    }

    /// Put the gripper back in a safe state and refresh delay and index.
    pub fn reset_gripper(&self) -> Result<(), LinkError> {
        self.send(
            &CmdBatch::new()
                .with(GripperCmd::DisableAuto)
                .with(GripperCmd::Disengage)
                .with(GripperCmd::Unlock)
                .with(GripperCmd::Delay)
                .with(GripperCmd::Exp),
        )
    }

    /// Decode a telemetry message and apply it to the state.
    pub fn on_telemetry(&self, slots: &[f64]) -> Result<StatusPacket, DecodeError> {
        let result = gecko::decode(slots);
        self.watch.apply(&result);
        result
    }

    fn feedback_lock(&self) -> MutexGuard<'_, FeedbackPerch> {
        self.feedback.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm the feedback perching loop.
    pub fn arm_feedback_perch(&self) {
        self.feedback_lock().enabled = true;
        info!("Feedback perching armed");
    }

    pub fn feedback(&self) -> FeedbackPerch {
        *self.feedback_lock()
    }

    /// Set the feedback tolerance, given in percent.
    pub fn set_error_tolerance_pct(&self, pct: f64) -> Result<(), LinkError> {
        if !pct.is_finite() || pct <= 0.0 {
            return Err(LinkError::InvalidTolerance(pct));
        }

        self.feedback_lock().error_tolerance = pct / 100.0;
        info!("Feedback perching tolerance set to {:.4} m", pct / 100.0);
        Ok(())
    }

    /// Handle a control error sample, returns true if the gripper was engaged and locked.
    pub fn on_ctrl_feedback(&self, error_position_m: f64) -> Result<bool, LinkError> {
        let fire = {
            let mut fb = self.feedback_lock();
            if fb.enabled && error_position_m.abs() >= fb.error_tolerance {
                fb.enabled = false;
                true
            } else {
                false
            }
        };

        if fire {
            info!(
                "Control error {:.4} m reached the tolerance, engaging and locking",
                error_position_m
            );
            self.engage_lock()?;
        }

        Ok(fire)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<JointMsg>>>);

    impl GripperCmdSink for RecordingSink {
        fn publish(&mut self, msg: &JointMsg) -> Result<(), LinkError> {
            self.0.lock().unwrap().push(msg.clone());
            Ok(())
        }
    }

    fn link() -> (GripperLink, RecordingSink) {
        let sink = RecordingSink::default();
        let link = GripperLink::new(Box::new(sink.clone()), Arc::new(StateWatch::new()), 0.18);
        (link, sink)
    }

    fn names(sink: &RecordingSink) -> Vec<Vec<String>> {
        sink.0.lock().unwrap().iter().map(|m| m.name.clone()).collect()
    }

    #[test]
    fn test_batched_primitives() {
        let (link, sink) = link();
        link.engage_lock().unwrap();
        link.reset_gripper().unwrap();

        assert_eq!(
            names(&sink),
            vec![
                vec!["gecko_gripper_engage", "gecko_gripper_lock"],
                vec![
                    "gecko_gripper_disable_auto",
                    "gecko_gripper_disengage",
                    "gecko_gripper_unlock",
                    "gecko_gripper_delay",
                    "gecko_gripper_exp"
                ]
            ]
        );
        assert_eq!(sink.0.lock().unwrap()[1].position, vec![0.0; 5]);
    }

    #[test]
    fn test_parameters() {
        let (link, sink) = link();
        link.set_delay(250).unwrap();
        link.open_experiment(-1).unwrap();
        link.seek_record(1200).unwrap();

        let msgs = sink.0.lock().unwrap();
        assert_eq!(msgs[0].name, vec!["gecko_gripper_set_delay"]);
        assert_eq!(msgs[0].position, vec![250.0]);
        assert_eq!(msgs[1].position, vec![-1.0]);
        assert_eq!(msgs[2].name, vec!["gecko_gripper_seek_record"]);
        assert_eq!(msgs[2].position, vec![1200.0]);
    }

    #[test]
    fn test_toggle_auto_not_implemented() {
        let (link, sink) = link();
        assert_eq!(
            link.toggle_auto(),
            Err(LinkError::NotImplemented("toggle_auto"))
        );
        assert!(names(&sink).is_empty());
    }

    #[test]
    fn test_feedback_fires_once() {
        let (link, sink) = link();

        // Disarmed, nothing happens
        assert_eq!(link.on_ctrl_feedback(1.0), Ok(false));

        link.arm_feedback_perch();
        assert_eq!(link.on_ctrl_feedback(0.1), Ok(false));
        assert_eq!(link.on_ctrl_feedback(-0.18), Ok(true));
        assert!(!link.feedback().enabled);
        assert_eq!(link.on_ctrl_feedback(0.5), Ok(false));

        assert_eq!(
            names(&sink),
            vec![vec!["gecko_gripper_engage", "gecko_gripper_lock"]]
        );
    }

    #[test]
    fn test_tolerance_percent() {
        let (link, _) = link();
        link.set_error_tolerance_pct(5.0).unwrap();
        assert!((link.feedback().error_tolerance - 0.05).abs() < 1e-12);
        assert_eq!(
            link.set_error_tolerance_pct(0.0),
            Err(LinkError::InvalidTolerance(0.0))
        );
        assert!((link.feedback().error_tolerance - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_telemetry_updates_state() {
        let (link, _) = link();
        let pkt = StatusPacket::new(
            5,
            gecko::StatusFlags::from_word(gecko::mask::WRIST_LOCK),
            100,
            2,
            gecko::ErrorStatus::NoError,
        );

        assert!(link.on_telemetry(&pkt.to_slots()).is_ok());
        assert!(link.state().wrist_lock());
        assert!(link.state().is_valid());

        assert_eq!(link.on_telemetry(&[0.0]), Err(DecodeError::InvalidHeader));
        assert!(!link.state().is_valid());
        assert!(link.state().wrist_lock());
    }
}

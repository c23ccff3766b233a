//! # Perch Sequencer
//!
//! Runs the automatic perch procedure: the robot moves towards a surface along one of its
//! principal axes, the gripper (in automatic mode) engages and locks on contact, the robot then
//! tries to move back to verify that it is anchored, and the experiment file is closed.
//!
//! Every step issues gripper commands or motion requests, then re-reads the gripper state after a
//! settle delay. There is no retry: any failed check aborts the run, and once the experiment file
//! has been opened it is closed before the run terminates.
//!
//! Runs execute on the [`PerchWorker`] thread, never on a telemetry thread, since every check
//! depends on telemetry arriving while the sequencer waits.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::Utc;
use comms_if::{
    eqpt::motion::Pose,
    tm::{ReportKind, StatusReport},
};
use log::{error, info, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::{
    gripper_link::{GripperLink, LinkError},
    gripper_state::{StopSignal, WaitError},
    motion::MotionProvider,
    params::{check_param, ParamsError},
    report::Reporter,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const CM_TO_M: f64 = 0.01;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Control over perch runs, as used by the telecommand processor.
pub trait PerchControl: Send + Sync {
    /// Start a new run. Fails if a run is already in progress.
    fn submit(&self, request: PerchRequest) -> Result<(), PerchWorkerError>;

    /// Interrupt the current run, if any.
    fn stop(&self);

    fn is_busy(&self) -> bool;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Perch sequence timings and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerchParams {
    /// Timeout given to the motion provider when reading trusted kinematics
    pub kinematics_timeout_s: f64,

    /// Wait after each gripper command before the state is trusted
    pub settle_ms: u64,

    /// Maximum time to wait for engage and lock after the move towards the surface
    pub contact_timeout_s: f64,

    /// Period at which waits recheck the state and the stop signal
    pub poll_period_ms: u64,

    /// Maximum time to wait for the experiment file to close
    pub close_timeout_ms: u64,

    /// Maximum distance from the perch pose after the return move
    pub max_perch_displacement_m: f64,
}

/// A perch run request.
#[derive(Debug, Clone, PartialEq)]
pub struct PerchRequest {
    /// Axis token, `+X`, `-X`, `+Y`, `-Y`, `+Z` or `-Z`
    pub axis: String,

    pub distance_cm: f64,

    pub delay_ms: i16,

    pub exp_idx: i16,
}

/// Executes one perch run at a time.
pub struct PerchSequencer<'a> {
    link: &'a GripperLink,
    motion: &'a mut dyn MotionProvider,
    reporter: &'a dyn Reporter,
    params: &'a PerchParams,
    stop: StopSignal,

    /// Set once open-experiment has been issued, until the file is closed
    exp_opened: bool,
}

/// Runs perch requests on a dedicated thread.
pub struct PerchWorker {
    sender: Mutex<Option<Sender<PerchRequest>>>,
    busy: Arc<AtomicBool>,
    stop: StopSignal,
    join_handle: Option<JoinHandle<()>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerchPhase {
    FetchInitialPose,
    ComputeTarget,
    ResetGripper,
    SetDelay,
    OpenExperiment,
    EnableAuto,
    MoveToTarget,
    VerifyContact,
    ReturnToInitial,
    VerifyDisplacement,
    CloseExperiment,
    Succeeded,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PerchAbort {
    #[error("Trusted kinematics are not available")]
    KinematicsUnavailable,

    #[error("Invalid axis \"{0}\", expected one of +X, -X, +Y, -Y, +Z, -Z")]
    InvalidAxis(String),

    #[error("Gripper did not reset (engage: {engage}, lock: {lock}, auto: {auto})")]
    ResetFailed { engage: bool, lock: bool, auto: bool },

    #[error("Requested a delay of {requested} ms but the gripper reports {reported} ms")]
    DelayMismatch { requested: i16, reported: i16 },

    #[error("Requested experiment {requested} but the gripper reports {reported}")]
    IndexMismatch { requested: i16, reported: i16 },

    #[error("Automatic mode could not be enabled")]
    AutoEnableFailed,

    #[error("The robot reached the target, no contact was made")]
    UnexpectedMoveSuccess,

    #[error("Motion planner failure: {0}")]
    PlannerFailure(String),

    #[error("The gripper did not engage and lock")]
    NoContact,

    #[error("The robot moved {displacement_m:.3} m from the perch pose (max {max_m:.3} m)")]
    VerificationFailed { displacement_m: f64, max_m: f64 },

    #[error("The perch sequence was stopped")]
    Interrupted,

    #[error("Gripper command failed: {0}")]
    LinkFailure(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PerchOutcome {
    Succeeded,
    Aborted(PerchAbort),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PerchWorkerError {
    #[error("A perch sequence is already running")]
    Busy,

    #[error("The perch worker has stopped")]
    WorkerStopped,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for PerchParams {
    fn default() -> Self {
        Self {
            kinematics_timeout_s: 5.0,
            settle_ms: 500,
            contact_timeout_s: 60.0,
            poll_period_ms: 10,
            close_timeout_ms: 500,
            max_perch_displacement_m: 0.2,
        }
    }
}

impl PerchParams {
    /// Check that every timing and limit can be used by a run.
    pub fn validate(&self) -> Result<(), ParamsError> {
        check_param("perch.kinematics_timeout_s", self.kinematics_timeout_s)?;
        check_param("perch.contact_timeout_s", self.contact_timeout_s)?;
        check_param("perch.max_perch_displacement_m", self.max_perch_displacement_m)?;

        if self.poll_period_ms == 0 {
            return Err(ParamsError::ZeroPollPeriod);
        }

        Ok(())
    }

    fn kinematics_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.kinematics_timeout_s)
    }

    fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    fn contact_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.contact_timeout_s)
    }

    fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl Axis {
    /// Parse an axis token such as `+X` or `-z`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_uppercase().as_str() {
            "+X" => Some(Axis::PosX),
            "-X" => Some(Axis::NegX),
            "+Y" => Some(Axis::PosY),
            "-Y" => Some(Axis::NegY),
            "+Z" => Some(Axis::PosZ),
            "-Z" => Some(Axis::NegZ),
            _ => None,
        }
    }

    pub fn unit(&self) -> Vector3<f64> {
        match self {
            Axis::PosX => Vector3::x(),
            Axis::NegX => -Vector3::x(),
            Axis::PosY => Vector3::y(),
            Axis::NegY => -Vector3::y(),
            Axis::PosZ => Vector3::z(),
            Axis::NegZ => -Vector3::z(),
        }
    }
}

impl fmt::Display for PerchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PerchPhase::FetchInitialPose => "Fetching initial pose",
            PerchPhase::ComputeTarget => "Computing target pose",
            PerchPhase::ResetGripper => "Resetting gripper",
            PerchPhase::SetDelay => "Setting delay",
            PerchPhase::OpenExperiment => "Opening experiment",
            PerchPhase::EnableAuto => "Enabling automatic mode",
            PerchPhase::MoveToTarget => "Moving to target",
            PerchPhase::VerifyContact => "Verifying contact",
            PerchPhase::ReturnToInitial => "Returning to initial pose",
            PerchPhase::VerifyDisplacement => "Verifying displacement",
            PerchPhase::CloseExperiment => "Closing experiment",
            PerchPhase::Succeeded => "Perch succeeded",
        };
        write!(f, "{}", s)
    }
}

impl PerchAbort {
    /// Short name of the abort reason.
    pub fn kind(&self) -> &'static str {
        match self {
            PerchAbort::KinematicsUnavailable => "KinematicsUnavailable",
            PerchAbort::InvalidAxis(_) => "InvalidAxis",
            PerchAbort::ResetFailed { .. } => "ResetFailed",
            PerchAbort::DelayMismatch { .. } => "DelayMismatch",
            PerchAbort::IndexMismatch { .. } => "IndexMismatch",
            PerchAbort::AutoEnableFailed => "AutoEnableFailed",
            PerchAbort::UnexpectedMoveSuccess => "UnexpectedMoveSuccess",
            PerchAbort::PlannerFailure(_) => "PlannerFailure",
            PerchAbort::NoContact => "NoContact",
            PerchAbort::VerificationFailed { .. } => "VerificationFailed",
            PerchAbort::Interrupted => "Interrupted",
            PerchAbort::LinkFailure(_) => "LinkFailure",
        }
    }

    /// Build the report for this abort, with its numeric context.
    fn to_report(&self) -> StatusReport {
        let report = StatusReport::new(ReportKind::Aborted, &self.to_string())
            .with("reason", self.kind());

        match *self {
            PerchAbort::ResetFailed { engage, lock, auto } => report
                .with("adhesive_engage", engage)
                .with("wrist_lock", lock)
                .with("automatic_mode_enable", auto),
            PerchAbort::DelayMismatch { requested, reported }
            | PerchAbort::IndexMismatch { requested, reported } => report
                .with("requested", requested)
                .with("reported", reported),
            PerchAbort::VerificationFailed { displacement_m, max_m } => report
                .with("displacement_m", displacement_m)
                .with("max_m", max_m),
            _ => report,
        }
    }
}

impl From<LinkError> for PerchAbort {
    fn from(e: LinkError) -> Self {
        PerchAbort::LinkFailure(e.to_string())
    }
}

impl<'a> PerchSequencer<'a> {
    pub fn new(
        link: &'a GripperLink,
        motion: &'a mut dyn MotionProvider,
        reporter: &'a dyn Reporter,
        params: &'a PerchParams,
        stop: StopSignal,
    ) -> Self {
        Self {
            link,
            motion,
            reporter,
            params,
            stop,
            exp_opened: false,
        }
    }

    /// Execute a run to completion, reporting every phase and the outcome.
    pub fn run(&mut self, request: &PerchRequest) -> PerchOutcome {
        info!(
            "Starting perch sequence: {} {} cm, delay {} ms, experiment {}",
            request.axis, request.distance_cm, request.delay_ms, request.exp_idx
        );
        self.exp_opened = false;
        let started = Utc::now();
        let elapsed_s = || (Utc::now() - started).num_milliseconds() as f64 / 1000.0;

        match self.sequence(request) {
            Ok(()) => {
                self.reporter.report(
                    StatusReport::new(ReportKind::Succeeded, &PerchPhase::Succeeded.to_string())
                        .with("exp_idx", request.exp_idx)
                        .with("duration_s", elapsed_s()),
                );
                PerchOutcome::Succeeded
            }
            Err(abort) => {
                if self.exp_opened {
                    self.close_after_abort();
                }
                self.reporter
                    .report(abort.to_report().with("duration_s", elapsed_s()));
                PerchOutcome::Aborted(abort)
            }
        }
    }

    fn sequence(&mut self, request: &PerchRequest) -> Result<(), PerchAbort> {
        // ---- INITIAL POSE AND TARGET ----

        self.enter(PerchPhase::FetchInitialPose, None)?;
        let initial = self.trusted_pose()?;

        self.enter(PerchPhase::ComputeTarget, None)?;
        let axis = Axis::from_token(&request.axis)
            .ok_or_else(|| PerchAbort::InvalidAxis(request.axis.clone()))?;
        let target = compute_target(&initial, axis, request.distance_cm);

        // ---- GRIPPER PREPARATION ----

        self.enter(PerchPhase::ResetGripper, None)?;
        self.link.reset_gripper()?;
        self.settle()?;
        let state = self.link.state();
        if state.adhesive_engage() || state.wrist_lock() || state.automatic_mode_enable() {
            return Err(PerchAbort::ResetFailed {
                engage: state.adhesive_engage(),
                lock: state.wrist_lock(),
                auto: state.automatic_mode_enable(),
            });
        }

        self.enter(PerchPhase::SetDelay, Some(("delay_ms", request.delay_ms as f64)))?;
        self.link.set_delay(request.delay_ms)?;
        self.settle()?;
        self.link.query_delay()?;
        self.settle()?;
        let reported = self.link.state().delay();
        if reported != request.delay_ms {
            return Err(PerchAbort::DelayMismatch {
                requested: request.delay_ms,
                reported,
            });
        }

        self.enter(PerchPhase::OpenExperiment, Some(("exp_idx", request.exp_idx as f64)))?;
        self.link.open_experiment(request.exp_idx)?;
        self.exp_opened = true;
        self.settle()?;
        self.link.query_experiment_index()?;
        self.settle()?;
        let reported = self.link.state().exp_idx();
        if reported != request.exp_idx {
            return Err(PerchAbort::IndexMismatch {
                requested: request.exp_idx,
                reported,
            });
        }

        self.enter(PerchPhase::EnableAuto, None)?;
        self.link.enable_auto()?;
        self.settle()?;
        if !self.link.state().automatic_mode_enable() {
            return Err(PerchAbort::AutoEnableFailed);
        }

        // ---- PERCH ----

        // Reaching the target means the gripper never touched anything, the expected result is
        // the robot being stopped short of it.
        self.enter(PerchPhase::MoveToTarget, Some(("distance_cm", request.distance_cm)))?;
        let result = self.motion.move_to(&target);
        if result.succeeded {
            return Err(PerchAbort::UnexpectedMoveSuccess);
        }
        if !result.is_tolerance_violation() {
            return Err(PerchAbort::PlannerFailure(result.message));
        }

        self.enter(PerchPhase::VerifyContact, None)?;
        self.link
            .watch()
            .wait_until(
                |s| s.adhesive_engage() && s.wrist_lock(),
                self.params.contact_timeout(),
                self.params.poll_period(),
                &self.stop,
            )
            .map_err(|_| PerchAbort::NoContact)?;
        let perch = self.trusted_pose()?;

        // ---- VERIFICATION ----

        // A successful return is not rejected here, the displacement check decides.
        self.enter(PerchPhase::ReturnToInitial, None)?;
        let result = self.motion.move_to(&initial);
        if !result.succeeded && !result.is_tolerance_violation() {
            return Err(PerchAbort::PlannerFailure(result.message));
        }

        self.enter(PerchPhase::VerifyDisplacement, None)?;
        let current = self.trusted_pose()?;
        check_displacement(&perch, &current, self.params.max_perch_displacement_m)?;

        // ---- CLEANUP ----

        self.enter(PerchPhase::CloseExperiment, None)?;
        self.link.close_experiment()?;
        self.exp_opened = false;
        match self.link.watch().wait_until(
            |s| !s.file_is_open(),
            self.params.close_timeout(),
            self.params.poll_period(),
            &self.stop,
        ) {
            Ok(_) => (),
            Err(WaitError::Timeout) => self.reporter.report(
                StatusReport::new(
                    ReportKind::Warning,
                    "Experiment file is still open, close it manually",
                )
                .with("exp_idx", request.exp_idx),
            ),
            Err(WaitError::Interrupted) => return Err(PerchAbort::Interrupted),
        }

        Ok(())
    }

    /// Report a phase entry, aborting if a stop was requested.
    fn enter(&self, phase: PerchPhase, context: Option<(&str, f64)>) -> Result<(), PerchAbort> {
        if self.stop.is_stopped() {
            return Err(PerchAbort::Interrupted);
        }

        let mut report = StatusReport::new(ReportKind::Phase, &phase.to_string())
            .with("phase", format!("{:?}", phase));
        if let Some((key, value)) = context {
            report = report.with(key, value);
        }
        self.reporter.report(report);

        Ok(())
    }

    fn settle(&self) -> Result<(), PerchAbort> {
        self.stop
            .sleep(self.params.settle(), self.params.poll_period())
            .map_err(|_| PerchAbort::Interrupted)
    }

    fn trusted_pose(&mut self) -> Result<Pose, PerchAbort> {
        self.motion
            .get_trusted_kinematics(self.params.kinematics_timeout())
            .ok_or(PerchAbort::KinematicsUnavailable)
    }

    fn close_after_abort(&mut self) {
        warn!("Closing experiment file after abort");
        if let Err(e) = self.link.close_experiment() {
            error!("Could not close the experiment file: {}", e);
        }
        self.exp_opened = false;
    }
}

impl PerchWorker {
    /// Start the worker thread.
    pub fn spawn(
        link: Arc<GripperLink>,
        mut motion: Box<dyn MotionProvider>,
        reporter: Arc<dyn Reporter>,
        params: PerchParams,
    ) -> Self {
        let (tx, rx) = channel::<PerchRequest>();
        let busy = Arc::new(AtomicBool::new(false));
        let stop = StopSignal::new();

        let busy_clone = busy.clone();
        let stop_clone = stop.clone();

        let join_handle = thread::spawn(move || {
            for request in rx.iter() {
                let outcome = PerchSequencer::new(
                    &link,
                    motion.as_mut(),
                    reporter.as_ref(),
                    &params,
                    stop_clone.clone(),
                )
                .run(&request);

                info!("Perch sequence finished: {:?}", outcome);
                busy_clone.store(false, Ordering::SeqCst);
            }
        });

        Self {
            sender: Mutex::new(Some(tx)),
            busy,
            stop,
            join_handle: Some(join_handle),
        }
    }
}

impl PerchControl for PerchWorker {
    fn submit(&self, request: PerchRequest) -> Result<(), PerchWorkerError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PerchWorkerError::Busy);
        }

        self.stop.reset();

        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let sent = match sender.as_ref() {
            Some(s) => s.send(request).is_ok(),
            None => false,
        };

        if !sent {
            self.busy.store(false, Ordering::SeqCst);
            return Err(PerchWorkerError::WorkerStopped);
        }

        Ok(())
    }

    fn stop(&self) {
        if self.is_busy() {
            warn!("Stopping perch sequence");
        }
        self.stop.stop();
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

impl Drop for PerchWorker {
    fn drop(&mut self) {
        self.stop.stop();

        // Closing the channel ends the worker loop
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();

        if let Some(jh) = self.join_handle.take() {
            jh.join().ok();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Offset the initial position along `axis` by `distance_cm`, keeping the attitude.
pub fn compute_target(initial: &Pose, axis: Axis, distance_cm: f64) -> Pose {
    Pose::new(
        initial.position_m + axis.unit() * (distance_cm * CM_TO_M),
        initial.attitude_q,
    )
}

/// Check that the robot stayed within `max_m` of the perch pose.
pub fn check_displacement(perch: &Pose, current: &Pose, max_m: f64) -> Result<(), PerchAbort> {
    let displacement_m = perch.distance_to(current);

    if displacement_m > max_m {
        Err(PerchAbort::VerificationFailed {
            displacement_m,
            max_m,
        })
    } else {
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::UnitQuaternion;

    fn pose(x: f64, y: f64, z: f64) -> Pose {
        Pose::new(Vector3::new(x, y, z), UnitQuaternion::identity())
    }

    #[test]
    fn test_axis_tokens() {
        assert_eq!(Axis::from_token("+X"), Some(Axis::PosX));
        assert_eq!(Axis::from_token(" -z "), Some(Axis::NegZ));
        assert_eq!(Axis::from_token("X"), None);
        assert_eq!(Axis::from_token("+W"), None);
    }

    #[test]
    fn test_compute_target() {
        let initial = Pose::new(
            Vector3::new(1.0, 2.0, 3.0),
            UnitQuaternion::from_euler_angles(0.0, 0.0, 1.0),
        );

        let target = compute_target(&initial, Axis::NegY, 30.0);
        assert!((target.position_m - Vector3::new(1.0, 1.7, 3.0)).norm() < 1e-12);
        assert_eq!(target.attitude_q, initial.attitude_q);

        let target = compute_target(&initial, Axis::PosZ, 5.0);
        assert!((target.position_m - Vector3::new(1.0, 2.0, 3.05)).norm() < 1e-12);
    }

    #[test]
    fn test_check_displacement() {
        let perch = pose(0.0, 0.0, 0.0);

        assert!(check_displacement(&perch, &pose(0.0, 0.2 - 1e-9, 0.0), 0.2).is_ok());
        assert!(check_displacement(&perch, &pose(0.0, 0.2, 0.0), 0.2).is_ok());

        match check_displacement(&perch, &pose(0.0, 0.0, 0.25), 0.2) {
            Err(PerchAbort::VerificationFailed { displacement_m, max_m }) => {
                assert!((displacement_m - 0.25).abs() < 1e-12);
                assert_eq!(max_m, 0.2);
            }
            r => panic!("Expected VerificationFailed, got {:?}", r),
        }
    }

    #[test]
    fn test_abort_report_context() {
        let report = PerchAbort::DelayMismatch {
            requested: 250,
            reported: 240,
        }
        .to_report();

        assert_eq!(report.kind, ReportKind::Aborted);
        assert_eq!(report.context["reason"], "DelayMismatch");
        assert_eq!(report.context["requested"], 250);
        assert_eq!(report.context["reported"], 240);
    }

    #[test]
    fn test_params_validation() {
        assert!(PerchParams::default().validate().is_ok());

        let params = PerchParams {
            kinematics_timeout_s: -0.5,
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(ParamsError::OutOfRange { .. })));

        let params = PerchParams {
            contact_timeout_s: f64::NAN,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = PerchParams {
            poll_period_ms: 0,
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(ParamsError::ZeroPollPeriod)));
    }
}

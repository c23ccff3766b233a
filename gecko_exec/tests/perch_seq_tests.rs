//! # Perch Sequence Scenario Tests
//!
//! Runs the perch sequencer against the simulated gripper and motion provider.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use comms_if::{
    eqpt::{
        gecko::{GripperCmd, JointMsg},
        motion::Pose,
    },
    tm::{ReportKind, StatusReport},
};
use gecko_lib::{
    gripper_link::{GripperCmdSink, GripperLink, LinkError},
    gripper_state::{StateWatch, StopSignal},
    perch_seq::{
        PerchAbort, PerchControl, PerchOutcome, PerchParams, PerchPhase, PerchRequest,
        PerchSequencer, PerchWorker, PerchWorkerError,
    },
    report::Reporter,
    sim::{SimGripper, SimGripperConfig, SimMotion, SimMove},
};
use nalgebra::Vector3;

// ------------------------------------------------------------------------------------------------
// HELPERS
// ------------------------------------------------------------------------------------------------

#[derive(Default)]
struct RecordingReporter(Mutex<Vec<StatusReport>>);

impl Reporter for RecordingReporter {
    fn report(&self, report: StatusReport) {
        self.0.lock().unwrap().push(report);
    }
}

impl RecordingReporter {
    fn kinds(&self) -> Vec<ReportKind> {
        self.0.lock().unwrap().iter().map(|r| r.kind).collect()
    }

    fn phases(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.kind == ReportKind::Phase)
            .map(|r| r.context["phase"].as_str().unwrap().to_string())
            .collect()
    }

    fn last(&self) -> StatusReport {
        self.0.lock().unwrap().last().cloned().unwrap()
    }
}

/// Stops the sequence as soon as the given command is published.
struct StopOnCmd {
    inner: SimGripper,
    stop: StopSignal,
    cmd: GripperCmd,
}

impl GripperCmdSink for StopOnCmd {
    fn publish(&mut self, msg: &JointMsg) -> Result<(), LinkError> {
        self.inner.publish(msg)?;
        if msg.name.iter().any(|n| n == self.cmd.name()) {
            self.stop.stop();
        }
        Ok(())
    }
}

/// Run the default request with a sequence which stops once `cmd` is published.
fn run_stopped_on(cmd: GripperCmd) -> (SimGripper, RecordingReporter, PerchOutcome) {
    let watch = Arc::new(StateWatch::new());
    let gripper = SimGripper::new(watch.clone(), SimGripperConfig::default());
    let stop = StopSignal::new();
    let link = GripperLink::new(
        Box::new(StopOnCmd {
            inner: gripper.clone(),
            stop: stop.clone(),
            cmd,
        }),
        watch,
        0.18,
    );
    let reporter = RecordingReporter::default();
    let params = fast_params();
    let mut motion = SimMotion::new(Pose::default()).with_contact(gripper.contact_trigger());

    let outcome =
        PerchSequencer::new(&link, &mut motion, &reporter, &params, stop).run(&request());

    (gripper, reporter, outcome)
}

fn fast_params() -> PerchParams {
    PerchParams {
        kinematics_timeout_s: 0.1,
        settle_ms: 1,
        contact_timeout_s: 0.05,
        poll_period_ms: 1,
        close_timeout_ms: 20,
        max_perch_displacement_m: 0.2,
    }
}

fn request() -> PerchRequest {
    PerchRequest {
        axis: String::from("-Z"),
        distance_cm: 30.0,
        delay_ms: 250,
        exp_idx: 4,
    }
}

struct Rig {
    link: GripperLink,
    gripper: SimGripper,
    reporter: RecordingReporter,
    stop: StopSignal,
}

impl Rig {
    fn new(config: SimGripperConfig) -> Self {
        let watch = Arc::new(StateWatch::new());
        let gripper = SimGripper::new(watch.clone(), config);
        let link = GripperLink::new(Box::new(gripper.clone()), watch, 0.18);

        Self {
            link,
            gripper,
            reporter: RecordingReporter::default(),
            stop: StopSignal::new(),
        }
    }

    /// A motion provider with a surface along the perch axis.
    fn motion(&self) -> SimMotion {
        SimMotion::new(Pose::default()).with_contact(self.gripper.contact_trigger())
    }

    fn run(&self, motion: &mut SimMotion, request: &PerchRequest) -> PerchOutcome {
        let params = fast_params();
        PerchSequencer::new(&self.link, motion, &self.reporter, &params, self.stop.clone())
            .run(request)
    }

    fn closes(&self) -> usize {
        self.gripper.count(GripperCmd::CloseExp)
    }
}

fn aborted(outcome: PerchOutcome) -> PerchAbort {
    match outcome {
        PerchOutcome::Aborted(a) => a,
        PerchOutcome::Succeeded => panic!("Expected the sequence to abort"),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[test]
fn test_perch_succeeds() {
    let rig = Rig::new(SimGripperConfig::default());
    let mut motion = rig.motion();

    assert_eq!(rig.run(&mut motion, &request()), PerchOutcome::Succeeded);

    let expected: Vec<String> = [
        PerchPhase::FetchInitialPose,
        PerchPhase::ComputeTarget,
        PerchPhase::ResetGripper,
        PerchPhase::SetDelay,
        PerchPhase::OpenExperiment,
        PerchPhase::EnableAuto,
        PerchPhase::MoveToTarget,
        PerchPhase::VerifyContact,
        PerchPhase::ReturnToInitial,
        PerchPhase::VerifyDisplacement,
        PerchPhase::CloseExperiment,
    ]
    .iter()
    .map(|p| format!("{:?}", p))
    .collect();
    assert_eq!(rig.reporter.phases(), expected);
    assert_eq!(rig.reporter.last().kind, ReportKind::Succeeded);

    let state = rig.link.state();
    assert!(state.adhesive_engage() && state.wrist_lock());
    assert!(!state.file_is_open());
    assert_eq!(rig.closes(), 1);

    // The robot stopped at the surface, halfway to the target
    assert!((motion.pose().position_m.z + 0.15).abs() < 1e-12);
}

#[test]
fn test_delay_mismatch_aborts_before_opening() {
    let rig = Rig::new(SimGripperConfig {
        delay_error_ms: -10,
        ..Default::default()
    });
    let mut motion = rig.motion();

    assert_eq!(
        aborted(rig.run(&mut motion, &request())),
        PerchAbort::DelayMismatch {
            requested: 250,
            reported: 240
        }
    );
    assert_eq!(rig.gripper.count(GripperCmd::OpenExp), 0);
    assert_eq!(rig.closes(), 0);

    let report = rig.reporter.last();
    assert_eq!(report.kind, ReportKind::Aborted);
    assert_eq!(report.context["reason"], "DelayMismatch");
}

#[test]
fn test_index_mismatch_closes_once() {
    let rig = Rig::new(SimGripperConfig {
        exp_idx_error: 1,
        ..Default::default()
    });
    let mut motion = rig.motion();

    assert_eq!(
        aborted(rig.run(&mut motion, &request())),
        PerchAbort::IndexMismatch {
            requested: 4,
            reported: 5
        }
    );
    assert_eq!(rig.closes(), 1);
}

#[test]
fn test_auto_enable_failure() {
    let rig = Rig::new(SimGripperConfig {
        auto_mode_broken: true,
        ..Default::default()
    });
    let mut motion = rig.motion();

    assert_eq!(
        aborted(rig.run(&mut motion, &request())),
        PerchAbort::AutoEnableFailed
    );
    assert_eq!(rig.closes(), 1);
}

#[test]
fn test_reaching_the_target_aborts() {
    let rig = Rig::new(SimGripperConfig::default());
    let mut motion = rig.motion().with_moves(vec![SimMove::Reach]);

    assert_eq!(
        aborted(rig.run(&mut motion, &request())),
        PerchAbort::UnexpectedMoveSuccess
    );
    assert_eq!(rig.closes(), 1);
}

#[test]
fn test_planner_failure() {
    let rig = Rig::new(SimGripperConfig::default());
    let mut motion = rig
        .motion()
        .with_moves(vec![SimMove::Fail(String::from("No valid plan found"))]);

    assert_eq!(
        aborted(rig.run(&mut motion, &request())),
        PerchAbort::PlannerFailure(String::from("No valid plan found"))
    );
    assert_eq!(rig.closes(), 1);
}

#[test]
fn test_tolerance_violation_is_case_insensitive() {
    // The move is stopped short but nothing is touched, so the run gets as far as the contact
    // check instead of failing as a planner error.
    let rig = Rig::new(SimGripperConfig::default());
    let mut motion = SimMotion::new(Pose::default()).with_moves(vec![SimMove::Fail(
        String::from("Controller: POSITION TOLERANCE VIOLATED"),
    )]);

    assert_eq!(
        aborted(rig.run(&mut motion, &request())),
        PerchAbort::NoContact
    );
    assert_eq!(rig.closes(), 1);
}

#[test]
fn test_no_contact() {
    let rig = Rig::new(SimGripperConfig::default());
    let mut motion = SimMotion::new(Pose::default()).with_moves(vec![SimMove::Blocked]);

    let start = Instant::now();
    assert_eq!(
        aborted(rig.run(&mut motion, &request())),
        PerchAbort::NoContact
    );
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(rig.closes(), 1);
}

#[test]
fn test_invalid_axis() {
    let rig = Rig::new(SimGripperConfig::default());
    let mut motion = rig.motion();
    let mut req = request();
    req.axis = String::from("+W");

    assert_eq!(
        aborted(rig.run(&mut motion, &req)),
        PerchAbort::InvalidAxis(String::from("+W"))
    );
    assert!(rig.gripper.published().is_empty());
}

#[test]
fn test_kinematics_unavailable() {
    // No initial pose, nothing is sent to the gripper
    let rig = Rig::new(SimGripperConfig::default());
    let mut motion = rig.motion().with_kinematics_reads(0);

    assert_eq!(
        aborted(rig.run(&mut motion, &request())),
        PerchAbort::KinematicsUnavailable
    );
    assert!(rig.gripper.published().is_empty());

    // No perch pose, the experiment is closed
    let rig = Rig::new(SimGripperConfig::default());
    let mut motion = rig.motion().with_kinematics_reads(1);

    assert_eq!(
        aborted(rig.run(&mut motion, &request())),
        PerchAbort::KinematicsUnavailable
    );
    assert_eq!(rig.closes(), 1);
}

#[test]
fn test_reset_failed() {
    let rig = Rig::new(SimGripperConfig {
        stuck_lock: true,
        ..Default::default()
    });
    rig.link.lock().unwrap();
    let mut motion = rig.motion();

    assert_eq!(
        aborted(rig.run(&mut motion, &request())),
        PerchAbort::ResetFailed {
            engage: false,
            lock: true,
            auto: false
        }
    );
    assert_eq!(rig.gripper.count(GripperCmd::SetDelay), 0);
}

#[test]
fn test_displacement_verification() {
    // Pulled away from the perch pose by more than the limit
    let rig = Rig::new(SimGripperConfig::default());
    let mut motion = rig.motion().with_moves(vec![
        SimMove::Touch,
        SimMove::Displace(Vector3::new(0.0, 0.0, 0.25)),
    ]);

    match aborted(rig.run(&mut motion, &request())) {
        PerchAbort::VerificationFailed {
            displacement_m,
            max_m,
        } => {
            assert!((displacement_m - 0.25).abs() < 1e-9);
            assert_eq!(max_m, 0.2);
        }
        a => panic!("Expected VerificationFailed, got {:?}", a),
    }
    assert_eq!(rig.closes(), 1);

    // A successful return that stays within the limit is accepted
    let rig = Rig::new(SimGripperConfig::default());
    let mut motion = rig.motion().with_moves(vec![
        SimMove::Touch,
        SimMove::Displace(Vector3::new(0.0, 0.19, 0.0)),
    ]);

    assert_eq!(rig.run(&mut motion, &request()), PerchOutcome::Succeeded);
}

#[test]
fn test_stop_after_open_closes_experiment() {
    let (gripper, _reporter, outcome) = run_stopped_on(GripperCmd::OpenExp);

    assert_eq!(aborted(outcome), PerchAbort::Interrupted);
    assert_eq!(gripper.count(GripperCmd::CloseExp), 1);
    assert_eq!(gripper.count(GripperCmd::EnableAuto), 0);
}

#[test]
fn test_stop_before_open_leaves_experiment_alone() {
    let (gripper, reporter, outcome) = run_stopped_on(GripperCmd::SetDelay);

    assert_eq!(aborted(outcome), PerchAbort::Interrupted);
    assert_eq!(gripper.count(GripperCmd::OpenExp), 0);
    assert_eq!(gripper.count(GripperCmd::CloseExp), 0);

    let last = reporter.last();
    assert_eq!(last.kind, ReportKind::Aborted);
    assert_eq!(last.context["reason"], "Interrupted");
}

#[test]
fn test_file_left_open_is_a_warning() {
    let rig = Rig::new(SimGripperConfig {
        close_sticks: true,
        ..Default::default()
    });
    let mut motion = rig.motion();

    assert_eq!(rig.run(&mut motion, &request()), PerchOutcome::Succeeded);
    assert!(rig.reporter.kinds().contains(&ReportKind::Warning));
    assert_eq!(rig.closes(), 1);
}

#[test]
fn test_worker_rejects_second_run_and_stops() {
    let watch = Arc::new(StateWatch::new());
    let gripper = SimGripper::new(watch.clone(), SimGripperConfig::default());
    let link = Arc::new(GripperLink::new(Box::new(gripper.clone()), watch, 0.18));
    let reporter = Arc::new(RecordingReporter::default());
    let motion = SimMotion::new(Pose::default()).with_contact(gripper.contact_trigger());

    let worker = PerchWorker::spawn(
        link,
        Box::new(motion),
        reporter.clone(),
        PerchParams {
            settle_ms: 200,
            ..fast_params()
        },
    );

    assert_eq!(worker.submit(request()), Ok(()));
    assert!(worker.is_busy());
    assert_eq!(worker.submit(request()), Err(PerchWorkerError::Busy));

    worker.stop();

    let deadline = Instant::now() + Duration::from_secs(2);
    while worker.is_busy() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(!worker.is_busy());

    let last = reporter.last();
    assert_eq!(last.kind, ReportKind::Aborted);
    assert_eq!(last.context["reason"], "Interrupted");

    // A new run can start once the previous one is over
    assert_eq!(worker.submit(request()), Ok(()));
}

//! # Telecommand processor
//!
//! Executes gripper telecommands through a single dispatch table. Each entry names the parameters
//! the command requires, the action run immediately, and an optional follow-up run on the
//! scheduler thread once the gripper has had time to answer.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{collections::HashMap, convert::TryFrom, sync::Arc, time::Duration};

use comms_if::{
    tc::{
        gecko::{keys, names},
        Tc, TcResponse,
    },
    tm::{ReportKind, StatusReport},
};
use log::{debug, info, warn};
use serde_json::Value;

use crate::{
    gripper_link::{GripperLink, LinkError},
    perch_seq::{PerchControl, PerchRequest, PerchWorkerError},
    report::Reporter,
    scheduler::Scheduler,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Everything a command may act on.
pub struct ExecContext {
    pub link: Arc<GripperLink>,
    pub perch: Arc<dyn PerchControl>,
    pub reporter: Arc<dyn Reporter>,
}

type Action = fn(&ExecContext, &Tc) -> Result<(), CmdError>;
type FollowUp = fn(&ExecContext);

struct CmdEntry {
    /// Parameters that must be present in the TC
    params: &'static [&'static str],

    action: Action,

    follow_up: Option<FollowUp>,
}

pub struct TcProcessor {
    ctx: Arc<ExecContext>,
    table: HashMap<&'static str, CmdEntry>,
    scheduler: Scheduler,
    follow_up_delay: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CmdError {
    #[error("Unrecognized command")]
    UnrecognizedCommand(String),

    #[error("Missing parameter {0}")]
    MissingParam(&'static str),

    #[error("Could not parse parameter {key} from \"{value}\"")]
    ParseFailure { key: &'static str, value: String },

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("Gripper link error: {0}")]
    Link(LinkError),

    #[error("A perch sequence is already running")]
    Busy,

    #[error("The perch worker has stopped")]
    PerchWorkerStopped,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl From<LinkError> for CmdError {
    fn from(e: LinkError) -> Self {
        match e {
            LinkError::NotImplemented(name) => CmdError::NotImplemented(name),
            e => CmdError::Link(e),
        }
    }
}

impl From<PerchWorkerError> for CmdError {
    fn from(e: PerchWorkerError) -> Self {
        match e {
            PerchWorkerError::Busy => CmdError::Busy,
            PerchWorkerError::WorkerStopped => CmdError::PerchWorkerStopped,
        }
    }
}

impl CmdEntry {
    fn new(action: Action) -> Self {
        Self {
            params: &[],
            action,
            follow_up: None,
        }
    }

    fn params(mut self, params: &'static [&'static str]) -> Self {
        self.params = params;
        self
    }

    fn follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = Some(follow_up);
        self
    }
}

impl TcProcessor {
    pub fn new(ctx: ExecContext, follow_up_delay: Duration) -> Self {
        Self {
            ctx: Arc::new(ctx),
            table: build_table(),
            scheduler: Scheduler::new(),
            follow_up_delay,
        }
    }

    /// Execute a telecommand and build the response for the ground.
    pub fn exec(&self, tc: &Tc) -> TcResponse {
        match self.dispatch(tc) {
            Ok(()) => {
                info!("Executed {}", tc.name);
                TcResponse::ok(&tc.name)
            }
            Err(e) => {
                warn!("Command {} failed: {}", tc.name, e);
                TcResponse::error(&e.to_string())
            }
        }
    }

    fn dispatch(&self, tc: &Tc) -> Result<(), CmdError> {
        let entry = self
            .table
            .get(tc.name.as_str())
            .ok_or_else(|| CmdError::UnrecognizedCommand(tc.name.clone()))?;

        if let Some(missing) = entry.params.iter().find(|&&k| tc.param(k).is_none()) {
            return Err(CmdError::MissingParam(*missing));
        }

        (entry.action)(&self.ctx, tc)?;

        if let Some(follow_up) = entry.follow_up {
            debug!("Scheduling follow-up for {}", tc.name);
            let ctx = self.ctx.clone();
            self.scheduler
                .schedule(self.follow_up_delay, move || follow_up(&ctx));
        }

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn build_table() -> HashMap<&'static str, CmdEntry> {
    let mut t = HashMap::new();

    t.insert(names::OPEN, CmdEntry::new(|c, _| Ok(c.link.open()?)));
    t.insert(names::CLOSE, CmdEntry::new(|c, _| Ok(c.link.close()?)));
    t.insert(names::ENGAGE, CmdEntry::new(|c, _| Ok(c.link.engage()?)));
    t.insert(names::DISENGAGE, CmdEntry::new(|c, _| Ok(c.link.disengage()?)));
    t.insert(names::LOCK, CmdEntry::new(|c, _| Ok(c.link.lock()?)));
    t.insert(names::UNLOCK, CmdEntry::new(|c, _| Ok(c.link.unlock()?)));
    t.insert(names::ENGAGE_LOCK, CmdEntry::new(|c, _| Ok(c.link.engage_lock()?)));
    t.insert(names::ENABLE_AUTO, CmdEntry::new(|c, _| Ok(c.link.enable_auto()?)));
    t.insert(names::DISABLE_AUTO, CmdEntry::new(|c, _| Ok(c.link.disable_auto()?)));
    t.insert(names::TOGGLE_AUTO, CmdEntry::new(|c, _| Ok(c.link.toggle_auto()?)));

    t.insert(
        names::MARK_GRIPPER,
        CmdEntry::new(|c, tc| Ok(c.link.mark_gripper(int_param(tc, keys::IDX)?)?))
            .params(&[keys::IDX]),
    );
    t.insert(
        names::SET_DELAY,
        CmdEntry::new(|c, tc| Ok(c.link.set_delay(int_param(tc, keys::DL)?)?))
            .params(&[keys::DL])
            .follow_up(|c| log_follow_up(c.link.query_delay())),
    );
    t.insert(
        names::OPEN_EXP,
        CmdEntry::new(|c, tc| Ok(c.link.open_experiment(int_param(tc, keys::IDX)?)?))
            .params(&[keys::IDX])
            .follow_up(|c| log_follow_up(c.link.query_experiment_index())),
    );
    t.insert(
        names::NEXT_RECORD,
        CmdEntry::new(|c, tc| Ok(c.link.next_record(int_param(tc, keys::SKIP)?)?))
            .params(&[keys::SKIP]),
    );
    t.insert(
        names::SEEK_RECORD,
        CmdEntry::new(|c, tc| Ok(c.link.seek_record(int_param(tc, keys::RN)?)?))
            .params(&[keys::RN]),
    );

    t.insert(names::CLOSE_EXP, CmdEntry::new(|c, _| Ok(c.link.close_experiment()?)));
    t.insert(names::STATUS, CmdEntry::new(|c, _| Ok(c.link.query_status()?)));
    t.insert(names::RECORD, CmdEntry::new(|c, _| Ok(c.link.query_record()?)));
    t.insert(names::EXP, CmdEntry::new(|c, _| Ok(c.link.query_experiment_index()?)));
    t.insert(names::DELAY, CmdEntry::new(|c, _| Ok(c.link.query_delay()?)));
    t.insert(
        names::PRINT_STATUS,
        CmdEntry::new(|c, _| {
            c.link.query_delay()?;
            c.link.query_experiment_index()?;
            Ok(())
        })
        .follow_up(report_state),
    );
    t.insert(names::RESET_GRIPPER, CmdEntry::new(|c, _| Ok(c.link.reset_gripper()?)));

    t.insert(
        names::SET_TOL,
        CmdEntry::new(|c, tc| Ok(c.link.set_error_tolerance_pct(float_param(tc, keys::TOL)?)?))
            .params(&[keys::TOL]),
    );
    t.insert(
        names::FEEDBACK_PERCH,
        CmdEntry::new(|c, _| {
            c.link.arm_feedback_perch();
            Ok(())
        }),
    );
    t.insert(
        names::PERCH_AUTO,
        CmdEntry::new(|c, tc| {
            let request = PerchRequest {
                axis: tc.param(keys::AXIS).unwrap_or_default().to_string(),
                distance_cm: float_param(tc, keys::DIST)?,
                delay_ms: int_param(tc, keys::DL)?,
                exp_idx: int_param(tc, keys::IDX)?,
            };
            Ok(c.perch.submit(request)?)
        })
        .params(&[keys::AXIS, keys::DIST, keys::DL, keys::IDX]),
    );
    t.insert(
        names::PERCH_STOP,
        CmdEntry::new(|c, _| {
            c.perch.stop();
            Ok(())
        }),
    );

    t
}

/// Parse a finite numeric parameter.
fn float_param(tc: &Tc, key: &'static str) -> Result<f64, CmdError> {
    let raw = tc.param(key).ok_or(CmdError::MissingParam(key))?;

    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(CmdError::ParseFailure {
            key,
            value: raw.to_string(),
        }),
    }
}

/// Parse an integral parameter into the command's integer type, rejecting fractions and values
/// out of range.
fn int_param<T: TryFrom<i64>>(tc: &Tc, key: &'static str) -> Result<T, CmdError> {
    let failure = || CmdError::ParseFailure {
        key,
        value: tc.param(key).unwrap_or_default().to_string(),
    };

    let v = float_param(tc, key).map_err(|_| failure())?;
    if v.fract() != 0.0 {
        return Err(failure());
    }

    T::try_from(v as i64).map_err(|_| failure())
}

fn log_follow_up(result: Result<(), LinkError>) {
    if let Err(e) = result {
        warn!("Follow-up command failed: {}", e);
    }
}

/// Report the full gripper state, then clear the new-status flag.
fn report_state(ctx: &ExecContext) {
    let state = ctx.link.state();
    let mut report = StatusReport::new(ReportKind::GripperState, "Gripper state");

    match serde_json::to_value(state.to_report()) {
        Ok(Value::Object(map)) => report.context = map,
        Ok(_) => (),
        Err(e) => warn!("Could not serialize the gripper state: {}", e),
    }

    ctx.reporter.report(report);
    ctx.link.watch().clear_new_status_flag();
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

//! # Gecko gripper telecommands
//!
//! Names and parameter keys of every command understood by the gripper exec, plus a structopt
//! definition used by the ground console to build TCs from a command line.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use structopt::StructOpt;

use super::Tc;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Command names, matched exactly by the exec.
pub mod names {
    pub const OPEN: &str = "gecko_gripper_open";
    pub const CLOSE: &str = "gecko_gripper_close";
    pub const ENGAGE: &str = "gecko_gripper_engage";
    pub const DISENGAGE: &str = "gecko_gripper_disengage";
    pub const LOCK: &str = "gecko_gripper_lock";
    pub const UNLOCK: &str = "gecko_gripper_unlock";
    pub const ENGAGE_LOCK: &str = "gecko_gripper_engage_lock";
    pub const ENABLE_AUTO: &str = "gecko_gripper_enable_auto";
    pub const DISABLE_AUTO: &str = "gecko_gripper_disable_auto";
    pub const TOGGLE_AUTO: &str = "gecko_gripper_toggle_auto";
    pub const MARK_GRIPPER: &str = "gecko_gripper_mark_gripper";
    pub const SET_DELAY: &str = "gecko_gripper_set_delay";
    pub const OPEN_EXP: &str = "gecko_gripper_open_exp";
    pub const NEXT_RECORD: &str = "gecko_gripper_next_record";
    pub const SEEK_RECORD: &str = "gecko_gripper_seek_record";
    pub const CLOSE_EXP: &str = "gecko_gripper_close_exp";
    pub const STATUS: &str = "gecko_gripper_status";
    pub const RECORD: &str = "gecko_gripper_record";
    pub const EXP: &str = "gecko_gripper_exp";
    pub const DELAY: &str = "gecko_gripper_delay";
    pub const PRINT_STATUS: &str = "gecko_gripper_print_status";
    pub const RESET_GRIPPER: &str = "gecko_gripper_reset_gripper";
    pub const SET_TOL: &str = "gecko_gripper_set_tol";
    pub const FEEDBACK_PERCH: &str = "gecko_gripper_feedback_perch";
    pub const PERCH_AUTO: &str = "gecko_gripper_perch_auto";
    pub const PERCH_STOP: &str = "gecko_gripper_perch_stop";
}

/// Parameter keys.
pub mod keys {
    /// Experiment or gripper index
    pub const IDX: &str = "IDX";

    /// Delay between records in milliseconds
    pub const DL: &str = "DL";

    /// Number of records to skip
    pub const SKIP: &str = "SKIP";

    /// Record number
    pub const RN: &str = "RN";

    /// Feedback error tolerance in percent
    pub const TOL: &str = "TOL";

    /// Perch axis token, one of `+X`, `-X`, `+Y`, `-Y`, `+Z`, `-Z`
    pub const AXIS: &str = "AXIS";

    /// Perch distance in centimetres
    pub const DIST: &str = "DIST";
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Gripper commands as typed by an operator.
#[derive(Debug, StructOpt)]
#[structopt(name = "gecko", rename_all = "snake_case")]
pub enum GeckoTc {
    /// Open the gripper
    Open,
    /// Close the gripper
    Close,
    /// Engage the adhesive
    Engage,
    /// Disengage the adhesive
    Disengage,
    /// Lock the wrist
    Lock,
    /// Unlock the wrist
    Unlock,
    /// Engage then lock in a single message
    EngageLock,
    /// Enable automatic mode
    EnableAuto,
    /// Disable automatic mode
    DisableAuto,
    /// Toggle automatic mode (not implemented by the exec)
    ToggleAuto,
    /// Mark the gripper with an index
    MarkGripper { idx: i16 },
    /// Set the delay between records in milliseconds
    SetDelay { delay_ms: i16 },
    /// Open an experiment file
    OpenExp { idx: i16 },
    /// Skip records in the open experiment
    NextRecord { skip: i16 },
    /// Seek to a record in the open experiment
    SeekRecord { record: i16 },
    /// Close the experiment file
    CloseExp,
    /// Query the status word
    Status,
    /// Query the current record
    Record,
    /// Query the experiment index
    Exp,
    /// Query the delay
    Delay,
    /// Query delay and index then report the full gripper state
    PrintStatus,
    /// Reset the gripper to a safe state
    ResetGripper,
    /// Set the feedback perching tolerance in percent
    SetTol { tol_pct: f64 },
    /// Arm the feedback perching loop
    FeedbackPerch,
    /// Run the automatic perch sequence
    PerchAuto {
        /// Axis token, e.g. +X or -Z
        #[structopt(allow_hyphen_values = true)]
        axis: String,
        /// Distance to travel in centimetres
        distance_cm: f64,
        /// Delay between records in milliseconds
        delay_ms: i16,
        /// Experiment index
        exp_idx: i16
    },
    /// Stop the running perch sequence
    PerchStop
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GeckoTc {
    /// Build the TC matching this command.
    pub fn to_tc(&self) -> Tc {
        match self {
            GeckoTc::Open => Tc::new(names::OPEN),
            GeckoTc::Close => Tc::new(names::CLOSE),
            GeckoTc::Engage => Tc::new(names::ENGAGE),
            GeckoTc::Disengage => Tc::new(names::DISENGAGE),
            GeckoTc::Lock => Tc::new(names::LOCK),
            GeckoTc::Unlock => Tc::new(names::UNLOCK),
            GeckoTc::EngageLock => Tc::new(names::ENGAGE_LOCK),
            GeckoTc::EnableAuto => Tc::new(names::ENABLE_AUTO),
            GeckoTc::DisableAuto => Tc::new(names::DISABLE_AUTO),
            GeckoTc::ToggleAuto => Tc::new(names::TOGGLE_AUTO),
            GeckoTc::MarkGripper { idx } => Tc::new(names::MARK_GRIPPER)
                .with_param(keys::IDX, idx),
            GeckoTc::SetDelay { delay_ms } => Tc::new(names::SET_DELAY)
                .with_param(keys::DL, delay_ms),
            GeckoTc::OpenExp { idx } => Tc::new(names::OPEN_EXP)
                .with_param(keys::IDX, idx),
            GeckoTc::NextRecord { skip } => Tc::new(names::NEXT_RECORD)
                .with_param(keys::SKIP, skip),
            GeckoTc::SeekRecord { record } => Tc::new(names::SEEK_RECORD)
                .with_param(keys::RN, record),
            GeckoTc::CloseExp => Tc::new(names::CLOSE_EXP),
            GeckoTc::Status => Tc::new(names::STATUS),
            GeckoTc::Record => Tc::new(names::RECORD),
            GeckoTc::Exp => Tc::new(names::EXP),
            GeckoTc::Delay => Tc::new(names::DELAY),
            GeckoTc::PrintStatus => Tc::new(names::PRINT_STATUS),
            GeckoTc::ResetGripper => Tc::new(names::RESET_GRIPPER),
            GeckoTc::SetTol { tol_pct } => Tc::new(names::SET_TOL)
                .with_param(keys::TOL, tol_pct),
            GeckoTc::FeedbackPerch => Tc::new(names::FEEDBACK_PERCH),
            GeckoTc::PerchAuto { axis, distance_cm, delay_ms, exp_idx } => Tc::new(names::PERCH_AUTO)
                .with_param(keys::AXIS, axis)
                .with_param(keys::DIST, distance_cm)
                .with_param(keys::DL, delay_ms)
                .with_param(keys::IDX, exp_idx),
            GeckoTc::PerchStop => Tc::new(names::PERCH_STOP)
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

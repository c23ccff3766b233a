//! # Script interpreter module
//!
//! This module provides an interpreter for TC scripts, allowing telecommands to be executed from a
//! file in place of the ground link. Each entry is `<time_s>: <tc json>;`, for example:
//!
//! ```text
//! 0.5: {"name": "gecko_gripper_reset_gripper"};
//! 2.0: {"name": "gecko_gripper_perch_auto", "AXIS": "-Z", "DIST": "30", "DL": "250", "IDX": "4"};
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::fs;
use regex::RegexBuilder;
use thiserror::Error;

use comms_if::tc::{Tc, TcParseError};
use crate::session::get_elapsed_seconds;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Matches `<time>: <payload>;` entries, one per line.
const ENTRY_PATTERN: &str = r"^\s*(\d+(\.\d+)?)\s*:\s*([^;]*);";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A command which is scripted to occur at a specific time.
#[derive(Debug)]
pub struct Command {
    /// The time the command is supposed to execute at
    exec_time_s: f64,

    /// The Telecommand to run
    tc: Tc
}

/// A script interpreter.
///
/// After initialising with the path to the script to run use `.get_pending_tcs` to
/// acquire a list of telecommands that need executing.
pub struct ScriptInterpreter {
    script_path: PathBuf,
    cmds: VecDeque<Command>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not find the script at {0:?}")]
    ScriptNotFound(PathBuf),

    #[error("Could not load the script: {0}")]
    ScriptLoadError(std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error(
        "Script contains an invalid timestamp: {0}. \
        Should be a float (like 1.0)")]
    InvalidTimestamp(String),

    #[error("Script contains an invalid TC at {0} s: {1}")]
    InvalidTc(f64, TcParseError),

    #[error("Could not build the script pattern: {0}")]
    PatternError(regex::Error)
}

#[derive(Debug)]
pub enum PendingTcs {
    None,
    Some(Vec<Tc>),
    EndOfScript
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ScriptInterpreter {

    /// Create a new interpreter from the given script path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {
        let path = PathBuf::from(script_path.as_ref());

        if !path.exists() {
            return Err(ScriptError::ScriptNotFound(path));
        }

        let script = fs::read_to_string(&path)
            .map_err(|e| ScriptError::ScriptLoadError(e))?;

        Ok(ScriptInterpreter {
            cmds: parse(&script)?,
            script_path: path
        })
    }

    /// Return a vector of pending TCs, or `None` if no TCs need executing now.
    pub fn get_pending_tcs(&mut self) -> PendingTcs {
        self.pending_at(get_elapsed_seconds())
    }

    /// Return the TCs whose execution time is before `current_time_s`.
    fn pending_at(&mut self, current_time_s: f64) -> PendingTcs {
        if self.cmds.is_empty() {
            return PendingTcs::EndOfScript
        }

        let mut tc_vec: Vec<Tc> = vec![];

        while let Some(cmd) = self.cmds.front() {
            if cmd.exec_time_s >= current_time_s {
                break;
            }
            if let Some(cmd) = self.cmds.pop_front() {
                tc_vec.push(cmd.tc);
            }
        }

        if tc_vec.is_empty() {
            PendingTcs::None
        }
        else {
            PendingTcs::Some(tc_vec)
        }
    }

    /// Get the number of TCs remaining in the script
    pub fn get_num_tcs(&self) -> usize {
        self.cmds.len()
    }

    /// Get the length of the script in seconds
    pub fn get_duration(&self) -> f64 {
        match self.cmds.back() {
            Some(c) => c.exec_time_s,
            None => 0f64
        }
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Parse the contents of a script into its queue of commands.
fn parse(script: &str) -> Result<VecDeque<Command>, ScriptError> {
    let re = RegexBuilder::new(ENTRY_PATTERN)
        .multi_line(true)
        .build()
        .map_err(|e| ScriptError::PatternError(e))?;

    let mut tc_queue = VecDeque::new();

    for cap in re.captures_iter(script) {
        let time_str = cap.get(1).map(|m| m.as_str()).unwrap_or("");
        let exec_time_s: f64 = time_str
            .parse()
            .map_err(|e| ScriptError::InvalidTimestamp(format!("{} ({})", time_str, e)))?;

        // The scripts contain JSON only
        let payload = cap.get(3).map(|m| m.as_str()).unwrap_or("");
        let tc = Tc::from_json(payload)
            .map_err(|e| ScriptError::InvalidTc(exec_time_s, e))?;

        tc_queue.push_back(Command {
            exec_time_s,
            tc
        });
    }

    if tc_queue.is_empty() {
        return Err(ScriptError::ScriptEmpty)
    }

    Ok(tc_queue)
}

#[cfg(test)]
mod test {
    use super::*;

    const SCRIPT: &str = r#"
        0.5: {"name": "gecko_gripper_reset_gripper"};
        1.0: {"name": "gecko_gripper_set_delay", "DL": "250"};
        1.0: {"name": "gecko_gripper_open_exp", "IDX": 3};
    "#;

    fn interpreter(script: &str) -> ScriptInterpreter {
        ScriptInterpreter {
            script_path: PathBuf::new(),
            cmds: parse(script).unwrap()
        }
    }

    #[test]
    fn test_parse() {
        let si = interpreter(SCRIPT);
        assert_eq!(si.get_num_tcs(), 3);
        assert_eq!(si.get_duration(), 1.0);
    }

    #[test]
    fn test_pending() {
        let mut si = interpreter(SCRIPT);

        assert!(matches!(si.pending_at(0.1), PendingTcs::None));

        match si.pending_at(0.6) {
            PendingTcs::Some(tcs) => {
                assert_eq!(tcs.len(), 1);
                assert_eq!(tcs[0].name, "gecko_gripper_reset_gripper");
            },
            p => panic!("Expected one TC, got {:?}", p)
        }

        match si.pending_at(2.0) {
            PendingTcs::Some(tcs) => {
                assert_eq!(tcs.len(), 2);
                assert_eq!(tcs[1].param("IDX"), Some("3"));
            },
            p => panic!("Expected two TCs, got {:?}", p)
        }

        assert!(matches!(si.pending_at(3.0), PendingTcs::EndOfScript));
    }

    #[test]
    fn test_bad_scripts() {
        assert!(matches!(parse("nothing here"), Err(ScriptError::ScriptEmpty)));
        assert!(matches!(
            parse("1.0: {\"DL\": \"250\"};"),
            Err(ScriptError::InvalidTc(t, _)) if t == 1.0
        ));
    }
}

//! # Status reports
//!
//! Structured notifications sent to the ground for every notable event: perch phase transitions,
//! outcomes, warnings, gripper state snapshots and feedback perching triggers.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,

    pub kind: ReportKind,

    pub message: String,

    /// Numeric or textual context relevant to the event
    pub context: Map<String, Value>
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportKind {
    /// A perch sequence entered a new phase
    Phase,
    Info,
    Warning,
    Aborted,
    Succeeded,
    GripperState,
    Feedback
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StatusReport {
    pub fn new(kind: ReportKind, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            message: String::from(message),
            context: Map::new()
        }
    }

    /// Add a context entry, builder style.
    pub fn with<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        self.context.insert(String::from(key), value.into());
        self
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportKind::Phase => "phase",
            ReportKind::Info => "info",
            ReportKind::Warning => "warning",
            ReportKind::Aborted => "aborted",
            ReportKind::Succeeded => "succeeded",
            ReportKind::GripperState => "gripper_state",
            ReportKind::Feedback => "feedback"
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if !self.context.is_empty() {
            write!(f, " {}", Value::Object(self.context.clone()))?;
        }
        Ok(())
    }
}

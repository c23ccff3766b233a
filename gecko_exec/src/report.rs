//! # Status reporting
//!
//! Everything notable the exec does (perch phases and outcomes, gripper state prints, feedback
//! perching triggers) is sent to the ground as a [`StatusReport`] through a [`Reporter`].

use comms_if::tm::StatusReport;

/// Sink for status reports.
pub trait Reporter: Send + Sync {
    fn report(&self, report: StatusReport);
}

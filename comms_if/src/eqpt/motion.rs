//! # Motion provider messages
//!
//! Request/reply messages exchanged with the robot's motion provider, which moves the robot to a
//! commanded pose and reports trusted kinematics.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Failure message fragment the motion provider reports when the robot was stopped short of the
/// commanded pose.
pub const TOLERANCE_VIOLATED: &str = "position tolerance violated";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Position and attitude of the robot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position in meters
    pub position_m: Vector3<f64>,

    pub attitude_q: UnitQuaternion<f64>
}

/// Result of a move command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveResult {
    pub succeeded: bool,
    pub message: String
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MotionCmd {
    /// Move to the given pose
    MoveTo(Pose),

    /// Get trusted kinematics, waiting up to the given time
    GetKinematics { timeout_s: f64 }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MotionRep {
    MoveResult(MoveResult),

    /// Trusted kinematics, `None` if they could not be obtained in time
    Kinematics(Option<Pose>),

    /// The motion server could not handle the request
    Error(String)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Pose {
    pub fn new(position_m: Vector3<f64>, attitude_q: UnitQuaternion<f64>) -> Self {
        Self {
            position_m,
            attitude_q
        }
    }

    /// Euclidean distance between the positions of two poses, in meters.
    pub fn distance_to(&self, other: &Pose) -> f64 {
        (self.position_m - other.position_m).norm()
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::new(Vector3::zeros(), UnitQuaternion::identity())
    }
}

impl MoveResult {
    pub fn ok() -> Self {
        Self {
            succeeded: true,
            message: String::from("Move succeeded")
        }
    }

    pub fn failed(message: &str) -> Self {
        Self {
            succeeded: false,
            message: String::from(message)
        }
    }

    /// True if this is a failure caused by the robot being stopped before reaching its target.
    pub fn is_tolerance_violation(&self) -> bool {
        !self.succeeded && self.message.to_lowercase().contains(TOLERANCE_VIOLATED)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tolerance_violation() {
        assert!(MoveResult::failed("Position tolerance violated: 0.05m").is_tolerance_violation());
        assert!(MoveResult::failed("POSITION TOLERANCE VIOLATED").is_tolerance_violation());
        assert!(!MoveResult::failed("Planner failed").is_tolerance_violation());
        assert!(!MoveResult::ok().is_tolerance_violation());
    }

    #[test]
    fn test_distance() {
        let a = Pose::default();
        let b = Pose::new(Vector3::new(0.3, 0.0, 0.4), UnitQuaternion::identity());
        assert!((a.distance_to(&b) - 0.5).abs() < 1e-12);
    }
}

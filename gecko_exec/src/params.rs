//! # Gripper Executable Parameters
//!
//! This module provide parameters for the gripper executable, loaded from `gecko_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Serialize, Deserialize};

use crate::perch_seq::PerchParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeckoExecParams {

    /// Target period of one main loop cycle
    pub cycle_period_s: f64,

    /// Maximum time to wait for the motion provider to reply to a request
    pub motion_timeout_ms: i32,

    #[serde(default)]
    pub link: LinkParams,

    #[serde(default)]
    pub perch: PerchParams
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkParams {
    /// Default feedback perching tolerance, in meters
    pub default_error_tolerance: f64,

    /// Delay before running a TC follow-up such as a status query
    pub follow_up_delay_ms: u64
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("{name} must be a finite, non-negative number no greater than {max}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        max: f64
    },

    #[error("motion_timeout_ms must not be negative, got {0}")]
    NegativeMotionTimeout(i32),

    #[error("perch.poll_period_ms must be greater than zero")]
    ZeroPollPeriod
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GeckoExecParams {
    /// Check the loaded values before any of them are turned into durations.
    pub fn validate(&self) -> Result<(), ParamsError> {
        check_param("cycle_period_s", self.cycle_period_s)?;
        check_param("link.default_error_tolerance", self.link.default_error_tolerance)?;

        if self.motion_timeout_ms < 0 {
            return Err(ParamsError::NegativeMotionTimeout(self.motion_timeout_ms));
        }

        self.perch.validate()
    }
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            default_error_tolerance: 0.18,
            follow_up_delay_ms: 500
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Largest accepted time or distance value.
const MAX_PARAM_VALUE: f64 = 1.0e6;

/// Reject values which are negative, NaN, infinite or too large to become a `Duration`.
pub(crate) fn check_param(name: &'static str, value: f64) -> Result<(), ParamsError> {
    if value.is_finite() && value >= 0.0 && value <= MAX_PARAM_VALUE {
        Ok(())
    }
    else {
        Err(ParamsError::OutOfRange { name, value, max: MAX_PARAM_VALUE })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shipped_params_parse() {
        let params: GeckoExecParams = util::params::from_str(
            include_str!("../../params/gecko_exec.toml")
        ).unwrap();

        assert_eq!(params.link.default_error_tolerance, 0.18);
        assert_eq!(params.perch.settle_ms, 500);
        assert_eq!(params.perch.max_perch_displacement_m, 0.2);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_bad_timings_rejected() {
        let mut params: GeckoExecParams = util::params::from_str(
            include_str!("../../params/gecko_exec.toml")
        ).unwrap();
        params.perch.contact_timeout_s = -1.0;
        assert!(matches!(
            params.validate(),
            Err(ParamsError::OutOfRange { name: "perch.contact_timeout_s", .. })
        ));

        params.perch.contact_timeout_s = 60.0;
        params.perch.kinematics_timeout_s = f64::NAN;
        assert!(params.validate().is_err());

        params.perch.kinematics_timeout_s = 5.0;
        params.cycle_period_s = f64::INFINITY;
        assert!(params.validate().is_err());

        params.cycle_period_s = 0.1;
        params.motion_timeout_ms = -5;
        assert!(matches!(params.validate(), Err(ParamsError::NegativeMotionTimeout(-5))));
    }
}

//! # Equipment Interface
//!
//! This module defines the interface structures which are exchanged with equipment: the gecko
//! gripper itself and the robot's motion provider.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod gecko;
pub mod motion;

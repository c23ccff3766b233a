//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the gripper software: the ground
//! telecommand definitions, the gripper and motion equipment messages, status reports and the zmq
//! networking layer.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod tc;

/// Status reports sent back to the ground
pub mod tm;

/// Command and response definitions for equipment (the gripper and the motion provider)
pub mod eqpt;

/// Network module
pub mod net;

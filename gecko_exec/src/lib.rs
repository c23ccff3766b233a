//! # Gecko gripper library.
//!
//! This library allows other crates in the workspace (and the exec's tests and benches) to access
//! items defined inside the gripper exec crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Gripper state - last known status of the gripper and the primitives used to wait on it
pub mod gripper_state;

/// Gripper link - publishes gripper commands and feeds telemetry into the state
pub mod gripper_link;

/// Perch sequencer - the automatic perch-and-verify procedure
pub mod perch_seq;

/// Motion provider interface and its network client
pub mod motion;

/// Status reporting interface
pub mod report;

/// Delayed task scheduler, runs telecommand follow-ups
pub mod scheduler;

/// Telecommand processor - data driven dispatch of TCs to the link and the sequencer
pub mod tc_processor;

/// Telecommand client - recieves telecommands from the ground
pub mod tc_client;

/// Telemetry server - publishes status reports to the ground
pub mod tm_server;

/// Gripper clients - command publisher and telemetry subscribers
pub mod gecko_client;

/// Simulated gripper and motion provider
pub mod sim;

/// Exec parameters
pub mod params;

//! # Vehicle library.
//!
//! This library allows other crates in the workspace (and the benches) to access items defined
//! inside the vehicle crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Manoeuvre commands - the discrete drive demands issued to the motors
pub mod cmd;

/// Global data store for the executable
pub mod data_store;

/// Path follower module - keeps the vehicle on the given path
pub mod follower;

/// Localisation module - provides the vehicle with an idea of where it is in the world
pub mod loc;

/// Mapping module - occupancy and cost grids built from obstacle observations
pub mod map;

/// Mission module - waypoint queue management and mission events
pub mod mission;

/// Motor interface - the seam between manoeuvre commands and the drive hardware
pub mod motor;

/// Navigation module - path planning over the cost map
pub mod nav;

/// Navigation manager - shared state and the background planning worker
pub mod nav_mgr;

/// Path definitions shared by the planner and the follower
pub mod path;

/// Safety module - telemetry monitoring, violations, and escalation
pub mod safety;

/// Simulation environment - synthetic obstacle observations for the exec
pub mod sim;

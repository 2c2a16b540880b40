//! # Navigation
//!
//! Path planning over the cost map. Two planners are provided behind a common contract: a
//! deterministic A* search over the grid, and a sampling RRT for large or cluttered maps. Both
//! produce raw point chains which are then smoothed and given a velocity profile.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod path_planner;
pub mod rrt;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// RE-EXPORTS
// ---------------------------------------------------------------------------

pub use path_planner::{PathPlanner, PathPlannerParams};
pub use rrt::RrtParams;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can prevent a plan being produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlanningError {
    /// An endpoint lies outside the map or on an occupied cell.
    #[error("An endpoint of the requested plan is outside the map or occupied")]
    InvalidEndpoint,

    /// The planning deadline expired before a path was found.
    #[error("The planning deadline expired before a path was found")]
    Timeout,

    /// The search space was exhausted without reaching the goal.
    #[error("No path to the goal exists in the current map")]
    NoPathFound,
}

/// Which planning algorithm to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    AStar,
    Rrt,
}

//! # Mapping
//!
//! Maintains the vehicle's picture of the local terrain as a pair of grids: a raw occupancy grid
//! built from obstacle observations, and a cost grid derived from it which the planner searches
//! over.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod cost_map;
pub mod grid;

// ---------------------------------------------------------------------------
// RE-EXPORTS
// ---------------------------------------------------------------------------

pub use cost_map::{CostMap, CostMapError, CostMapParams, CostMapView, ObstacleObservation};
pub use grid::Grid;

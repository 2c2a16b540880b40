//! # Path definitions
//!
//! A path is a sequence of world-frame points together with a normalised target speed for each
//! point. Paths are produced by the planner and consumed by the follower, which treats the point
//! sequence as a chain of straight segments.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A planned path through the world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Path {
    /// The points defining the path, in order of traversal.
    pub points_m: Vec<Point2<f64>>,

    /// Normalised target speed (fraction of the maximum speed) at each point. Always the same
    /// length as `points_m`, with zero at both endpoints.
    pub target_speeds: Vec<f64>,
}

/// A single straight segment of a path.
#[derive(Debug, Clone, Copy)]
pub struct PathSegment {
    /// Start point of the segment
    pub start_m: Point2<f64>,

    /// End point of the segment
    pub end_m: Point2<f64>,

    /// Length of the segment
    pub length_m: f64,

    /// Heading of the segment in the world frame
    pub heading_rad: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PathError {
    #[error("A path must contain at least 2 points, found {0}")]
    TooFewPoints(usize),

    #[error("Expected one target speed per point ({0} points, {1} speeds)")]
    SpeedCountMismatch(usize, usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Path {
    /// Build a path from points and per-point target speeds.
    pub fn new(points_m: Vec<Point2<f64>>, target_speeds: Vec<f64>) -> Result<Self, PathError> {
        if points_m.len() < 2 {
            return Err(PathError::TooFewPoints(points_m.len()));
        }
        if points_m.len() != target_speeds.len() {
            return Err(PathError::SpeedCountMismatch(
                points_m.len(),
                target_speeds.len(),
            ));
        }

        Ok(Self {
            points_m,
            target_speeds,
        })
    }

    pub fn num_points(&self) -> usize {
        self.points_m.len()
    }

    /// Total length of the path along its segments.
    pub fn length_m(&self) -> f64 {
        self.points_m
            .windows(2)
            .map(|w| (w[1] - w[0]).norm())
            .sum()
    }

    /// Get the `i`th segment of the path, i.e. the segment from point `i` to point `i + 1`.
    pub fn segment(&self, i: usize) -> Option<PathSegment> {
        if i + 1 >= self.points_m.len() {
            return None;
        }

        let start_m = self.points_m[i];
        let end_m = self.points_m[i + 1];
        let delta = end_m - start_m;

        Some(PathSegment {
            start_m,
            end_m,
            length_m: delta.norm(),
            heading_rad: delta.y.atan2(delta.x),
        })
    }

    pub fn num_segments(&self) -> usize {
        self.points_m.len().saturating_sub(1)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

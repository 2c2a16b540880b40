//! # Simulated environment
//!
//! A stand-in for the perception sensors: a fixed field of point obstacles which the vehicle
//! "sights" whenever they come within sensor range.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Point2;
use serde::Deserialize;
use std::time::Instant;

use crate::loc::Pose;
use crate::map::ObstacleObservation;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the simulated environment.
#[derive(Debug, Clone, Deserialize)]
pub struct SimParams {
    /// Range within which obstacles are sighted
    pub sensor_range_m: f64,

    /// World-frame obstacle positions
    pub obstacles_m: Vec<[f64; 2]>,
}

/// The simulated obstacle field.
#[derive(Debug, Clone)]
pub struct SimEnvironment {
    sensor_range_m: f64,
    obstacles: Vec<Point2<f64>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SimEnvironment {
    pub fn new(params: SimParams) -> Self {
        Self {
            sensor_range_m: params.sensor_range_m,
            obstacles: params
                .obstacles_m
                .iter()
                .map(|o| Point2::new(o[0], o[1]))
                .collect(),
        }
    }

    /// Sight all obstacles within sensor range of the given pose.
    pub fn observe(&self, pose: &Pose, now: Instant) -> Vec<ObstacleObservation> {
        self.obstacles
            .iter()
            .filter_map(|obstacle| {
                let distance_m = (obstacle - pose.position_m).norm();
                if distance_m <= self.sensor_range_m {
                    Some(ObstacleObservation {
                        position_m: *obstacle,
                        distance_m,
                        timestamp: now,
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    /// Range to the nearest obstacle, in centimetres, if any is in sensor range.
    pub fn nearest_obstacle_cm(&self, pose: &Pose) -> Option<f64> {
        self.obstacles
            .iter()
            .map(|obstacle| (obstacle - pose.position_m).norm())
            .filter(|d| *d <= self.sensor_range_m)
            .fold(None, |nearest: Option<f64>, d| match nearest {
                Some(n) if n <= d => Some(n),
                _ => Some(d),
            })
            .map(|d| d * 100.0)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

//! # Localisation
//!
//! Dead-reckoned pose tracking. The tracker integrates the manoeuvre commands the vehicle has
//! been issued, so the estimate drifts with command execution error but never depends on external
//! positioning.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// Internal imports
use crate::cmd::{MnvrAction, MotorCommand};
use util::maths::wrap_to_2pi;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The vehicle's pose in the world frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position in the world frame
    pub position_m: Point2<f64>,

    /// Heading in the world frame, in `[0, 2pi)`, measured anticlockwise from the world x axis
    pub heading_rad: f64,
}

/// Parameters for the pose tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseTrackerParams {
    /// Maximum commanded speed, used to convert normalised speed demands into displacements
    pub max_speed_ms: f64,

    /// Rate of heading change while executing a turn command
    pub turn_rate_rads: f64,

    /// Fraction of the forward displacement applied while turning
    pub turn_creep_factor: f64,

    /// Size of the traversable world, positions are clamped into `[0, size]` on each axis
    pub map_size_m: [f64; 2],

    /// Maximum number of history points retained
    pub history_capacity: usize,
}

/// Dead-reckoning pose tracker.
#[derive(Debug, Clone)]
pub struct PoseTracker {
    params: PoseTrackerParams,

    pose: Pose,

    /// Recent positions, oldest first, bounded by `history_capacity`
    history: VecDeque<Point2<f64>>,

    /// Total distance travelled since tracking began
    odometer_m: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Pose {
    pub fn new(position_m: Point2<f64>, heading_rad: f64) -> Self {
        Self {
            position_m,
            heading_rad: wrap_to_2pi(heading_rad),
        }
    }

    /// Bearing from this pose to the given point, in world frame radians.
    pub fn bearing_to(&self, target_m: &Point2<f64>) -> f64 {
        let delta = target_m - self.position_m;
        delta.y.atan2(delta.x)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position_m: Point2::new(0.0, 0.0),
            heading_rad: 0.0,
        }
    }
}

impl Default for PoseTrackerParams {
    fn default() -> Self {
        Self {
            max_speed_ms: 2.0,
            turn_rate_rads: 0.5,
            turn_creep_factor: 0.75,
            map_size_m: [2000.0, 2000.0],
            history_capacity: 1000,
        }
    }
}

impl PoseTracker {
    pub fn new(params: PoseTrackerParams, initial_pose: Pose) -> Self {
        Self {
            params,
            pose: initial_pose,
            history: VecDeque::new(),
            odometer_m: 0.0,
        }
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn odometer_m(&self) -> f64 {
        self.odometer_m
    }

    pub fn history(&self) -> &VecDeque<Point2<f64>> {
        &self.history
    }

    /// Override the tracked pose, for example from an external reset.
    pub fn set_pose(&mut self, pose: Pose) {
        self.pose = Pose::new(pose.position_m, pose.heading_rad);
    }

    /// Integrate a manoeuvre command over `dt_s` seconds.
    pub fn integrate(&mut self, cmd: &MotorCommand, dt_s: f64) -> &Pose {
        let full_step_m = cmd.speed * self.params.max_speed_ms * dt_s;

        let step_m = match cmd.action {
            MnvrAction::Stop => 0.0,
            MnvrAction::Forward => full_step_m,
            MnvrAction::TurnLeft => {
                self.pose.heading_rad =
                    wrap_to_2pi(self.pose.heading_rad + self.params.turn_rate_rads * dt_s);
                full_step_m * self.params.turn_creep_factor
            }
            MnvrAction::TurnRight => {
                self.pose.heading_rad =
                    wrap_to_2pi(self.pose.heading_rad - self.params.turn_rate_rads * dt_s);
                full_step_m * self.params.turn_creep_factor
            }
        };

        if step_m > 0.0 {
            let x = self.pose.position_m.x + step_m * self.pose.heading_rad.cos();
            let y = self.pose.position_m.y + step_m * self.pose.heading_rad.sin();

            self.pose.position_m = Point2::new(
                x.max(0.0).min(self.params.map_size_m[0]),
                y.max(0.0).min(self.params.map_size_m[1]),
            );

            self.odometer_m += step_m;

            self.history.push_back(self.pose.position_m);
            while self.history.len() > self.params.history_capacity {
                self.history.pop_front();
            }
        }

        &self.pose
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

//! # Path follower
//!
//! Pure-pursuit tracking of the active path. The follower chases a lookahead point on the path
//! ahead of the vehicle and converts the heading error to it into discrete manoeuvre commands:
//! large errors are turned out on the spot at low speed, small errors are driven through.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// Internal imports
use crate::cmd::{MnvrAction, MotorCommand};
use crate::loc::Pose;
use crate::path::Path;
use util::maths::{clamp, wrap_to_pi};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The follower's mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerMode {
    /// No path is loaded.
    Off,

    /// Currently tracking the loaded path.
    Following,

    /// The end of the loaded path has been reached.
    Completed,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the path follower.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathFollowerParams {
    /// Minimum lookahead distance
    pub min_lookahead_m: f64,

    /// Maximum lookahead distance
    pub max_lookahead_m: f64,

    /// Lookahead distance per unit of current speed
    pub lookahead_speed_gain_s: f64,

    /// Distance at which a path point counts as reached
    pub waypoint_tolerance_m: f64,

    /// Heading error above which the vehicle turns on the spot
    pub sharp_error_rad: f64,

    /// Heading error above which the vehicle drives at reduced speed
    pub moderate_error_rad: f64,

    /// Normalised speed while turning out a sharp error
    pub sharp_speed: f64,

    /// Normalised speed while driving out a moderate error
    pub moderate_speed: f64,

    /// Floor applied to profile speeds while following, so zero-speed endpoints are still
    /// approachable
    pub approach_speed: f64,
}

/// Pure-pursuit path follower.
#[derive(Debug, Clone)]
pub struct PathFollower {
    params: PathFollowerParams,

    path: Option<Arc<Path>>,

    /// Index of the path point currently being chased
    target_index: usize,

    mode: FollowerMode,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for PathFollowerParams {
    fn default() -> Self {
        Self {
            min_lookahead_m: 2.0,
            max_lookahead_m: 10.0,
            lookahead_speed_gain_s: 2.0,
            waypoint_tolerance_m: 2.0,
            sharp_error_rad: 45.0_f64.to_radians(),
            moderate_error_rad: 10.0_f64.to_radians(),
            sharp_speed: 0.3,
            moderate_speed: 0.6,
            approach_speed: 0.3,
        }
    }
}

impl PathFollower {
    pub fn new(params: PathFollowerParams) -> Self {
        Self {
            params,
            path: None,
            target_index: 0,
            mode: FollowerMode::Off,
        }
    }

    pub fn mode(&self) -> FollowerMode {
        self.mode
    }

    pub fn path(&self) -> Option<&Arc<Path>> {
        self.path.as_ref()
    }

    /// Install a new path wholesale, resetting all tracking progress.
    pub fn set_path(&mut self, path: Arc<Path>) {
        self.path = Some(path);
        self.target_index = 0;
        self.mode = FollowerMode::Following;
    }

    /// Drop the current path and stop following.
    pub fn clear(&mut self) {
        self.path = None;
        self.target_index = 0;
        self.mode = FollowerMode::Off;
    }

    /// Produce the next manoeuvre command for the given pose and current speed.
    pub fn steer(&mut self, pose: &Pose, speed_ms: f64) -> MotorCommand {
        let path = match (&self.path, self.mode) {
            (Some(p), FollowerMode::Following) => p.clone(),
            _ => return MotorCommand::stop(),
        };

        // Pull the target forward to the nearest upcoming path point. The target never moves
        // backwards, so loops in the path cannot capture the follower.
        let mut nearest = self.target_index;
        let mut nearest_d = f64::INFINITY;
        for (i, p) in path
            .points_m
            .iter()
            .enumerate()
            .skip(self.target_index)
        {
            let d = (p - pose.position_m).norm();
            if d < nearest_d {
                nearest_d = d;
                nearest = i;
            }
        }
        self.target_index = nearest;

        // Then advance past any points already within tolerance
        while self.target_index < path.num_points() {
            let d = (path.points_m[self.target_index] - pose.position_m).norm();
            if d < self.params.waypoint_tolerance_m {
                self.target_index += 1;
            } else {
                break;
            }
        }

        if self.target_index >= path.num_points() {
            self.mode = FollowerMode::Completed;
            return MotorCommand::stop();
        }

        let lookahead_m = clamp(
            &(speed_ms * self.params.lookahead_speed_gain_s),
            &self.params.min_lookahead_m,
            &self.params.max_lookahead_m,
        );

        let target = self
            .lookahead_point(&path, pose, lookahead_m)
            .unwrap_or(path.points_m[self.target_index]);

        let error_rad = wrap_to_pi(pose.bearing_to(&target) - pose.heading_rad);

        if error_rad.abs() > self.params.sharp_error_rad {
            let action = if error_rad > 0.0 {
                MnvrAction::TurnLeft
            } else {
                MnvrAction::TurnRight
            };
            MotorCommand::new(action, self.params.sharp_speed)
        } else if error_rad.abs() > self.params.moderate_error_rad {
            MotorCommand::new(MnvrAction::Forward, self.params.moderate_speed)
        } else {
            let profile = self.params.approach_speed.max(
                *path
                    .target_speeds
                    .get(self.target_index)
                    .unwrap_or(&self.params.approach_speed),
            );
            MotorCommand::new(MnvrAction::Forward, profile)
        }
    }

    /// Find the most advanced intersection of the lookahead circle with the upcoming path
    /// segments.
    fn lookahead_point(
        &self,
        path: &Path,
        pose: &Pose,
        lookahead_m: f64,
    ) -> Option<Point2<f64>> {
        let mut found = None;

        let first_seg = self.target_index.saturating_sub(1);
        for i in first_seg..path.num_segments() {
            let seg = path.segment(i)?;
            if let Some(p) = circle_segment_intersection(
                &seg.start_m,
                &seg.end_m,
                &pose.position_m,
                lookahead_m,
            ) {
                found = Some(p);
            }
        }

        found
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Intersection of the segment `a -> b` with the circle at `centre`, preferring the point
/// furthest along the segment. `None` if the segment does not cross the circle.
fn circle_segment_intersection(
    a: &Point2<f64>,
    b: &Point2<f64>,
    centre: &Point2<f64>,
    radius_m: f64,
) -> Option<Point2<f64>> {
    let d = b - a;
    let f = a - centre;

    let qa = d.dot(&d);
    if qa < 1e-12 {
        return None;
    }
    let qb = 2.0 * f.dot(&d);
    let qc = f.dot(&f) - radius_m * radius_m;

    let discriminant = qb * qb - 4.0 * qa * qc;
    if discriminant < 0.0 {
        return None;
    }

    let sqrt_d = discriminant.sqrt();
    let t_far = (-qb + sqrt_d) / (2.0 * qa);
    let t_near = (-qb - sqrt_d) / (2.0 * qa);

    let t = if (0.0..=1.0).contains(&t_far) {
        t_far
    } else if (0.0..=1.0).contains(&t_near) {
        t_near
    } else {
        return None;
    };

    Some(a + d * t)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::loc::{PoseTracker, PoseTrackerParams};

    const DT_S: f64 = 0.2;

    fn straight_path() -> Arc<Path> {
        let points: Vec<Point2<f64>> = (0..=12).map(|i| Point2::new(5.0 * i as f64, 0.0)).collect();
        let mut speeds = vec![1.0; points.len()];
        speeds[0] = 0.0;
        *speeds.last_mut().unwrap() = 0.0;
        Arc::new(Path::new(points, speeds).unwrap())
    }

    #[test]
    fn test_off_without_path() {
        let mut follower = PathFollower::new(PathFollowerParams::default());
        assert_eq!(follower.mode(), FollowerMode::Off);
        assert!(follower.steer(&Pose::default(), 1.0).is_stop());
    }

    #[test]
    fn test_aligned_drive() {
        let mut follower = PathFollower::new(PathFollowerParams::default());
        follower.set_path(straight_path());

        // On the path, pointing along it
        let pose = Pose::new(Point2::new(12.0, 0.0), 0.0);
        let cmd = follower.steer(&pose, 1.0);

        assert_eq!(cmd.action, MnvrAction::Forward);
        assert_eq!(cmd.speed, 1.0);
    }

    #[test]
    fn test_sharp_error_turns() {
        let mut follower = PathFollower::new(PathFollowerParams::default());
        follower.set_path(straight_path());

        // Pointing backwards along the path
        let pose = Pose::new(Point2::new(12.0, 0.0), std::f64::consts::PI);
        let cmd = follower.steer(&pose, 1.0);

        assert!(matches!(
            cmd.action,
            MnvrAction::TurnLeft | MnvrAction::TurnRight
        ));
        assert_eq!(cmd.speed, 0.3);
    }

    #[test]
    fn test_completion() {
        let mut follower = PathFollower::new(PathFollowerParams::default());
        follower.set_path(straight_path());

        // Standing on the final point
        let pose = Pose::new(Point2::new(60.0, 0.0), 0.0);
        let cmd = follower.steer(&pose, 1.0);

        assert!(cmd.is_stop());
        assert_eq!(follower.mode(), FollowerMode::Completed);
    }

    #[test]
    fn test_set_path_resets_progress() {
        let mut follower = PathFollower::new(PathFollowerParams::default());
        follower.set_path(straight_path());

        let pose = Pose::new(Point2::new(60.0, 0.0), 0.0);
        follower.steer(&pose, 1.0);
        assert_eq!(follower.mode(), FollowerMode::Completed);

        follower.set_path(straight_path());
        assert_eq!(follower.mode(), FollowerMode::Following);
    }

    /// Closed-loop convergence: steering commands integrated by the dead-reckoning tracker bring
    /// an off-axis vehicle onto the path and through to completion, without the cross-track error
    /// ever exceeding its starting value.
    #[test]
    fn test_converges_to_path() {
        let mut follower = PathFollower::new(PathFollowerParams::default());
        follower.set_path(straight_path());

        let mut tracker = PoseTracker::new(
            PoseTrackerParams::default(),
            Pose::new(Point2::new(0.0, 8.0), 0.0),
        );

        let initial_cross_track = 8.0;
        let mut max_cross_track: f64 = 0.0;
        let mut speed_ms = 0.0;
        let mut steps = 0;

        while follower.mode() == FollowerMode::Following && steps < 5000 {
            let pose = *tracker.pose();
            let cmd = follower.steer(&pose, speed_ms);
            let pose = tracker.integrate(&cmd, DT_S);
            speed_ms = cmd.speed * 2.0;
            max_cross_track = max_cross_track.max(pose.position_m.y.abs());
            steps += 1;
        }

        assert_eq!(follower.mode(), FollowerMode::Completed);
        assert!(max_cross_track <= initial_cross_track + 1e-6);
        // Final position near the end of the path
        assert!((tracker.pose().position_m - Point2::new(60.0, 0.0)).norm() < 5.0);
    }
}

//! # RRT planner
//!
//! A rapidly-exploring random tree over the cost map, used where the grid is too large or too
//! cluttered for an exhaustive search. Sampling is seeded so that planning runs are reproducible.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use nalgebra::Point2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Instant;

// Internal imports
use super::PlanningError;
use crate::map::CostMapView;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the RRT planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrtParams {
    /// Length of a single tree extension
    pub step_m: f64,

    /// Distance from the goal at which a node counts as having reached it
    pub goal_threshold_m: f64,

    /// Fraction of samples drawn at the goal itself
    pub goal_bias: f64,

    /// Maximum number of extension attempts before giving up
    pub max_iterations: usize,

    /// RNG seed, fixed so repeated plans over the same map agree
    pub seed: u64,
}

/// A node of the search tree.
struct Node {
    position_m: Point2<f64>,

    /// Index of the parent node, `None` for the root
    parent: Option<usize>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for RrtParams {
    fn default() -> Self {
        Self {
            step_m: 20.0,
            goal_threshold_m: 10.0,
            goal_bias: 0.1,
            max_iterations: 5000,
            seed: 170974,
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Grow a tree from `start` towards `goal`, returning the raw world-frame point chain.
///
/// Endpoint validity is checked by the caller.
pub(super) fn plan(
    params: &RrtParams,
    view: &CostMapView,
    start: Point2<f64>,
    goal: Point2<f64>,
    deadline: Instant,
) -> Result<Vec<Point2<f64>>, PlanningError> {
    let (nx, ny) = view.num_cells();
    let world_x = nx as f64 * view.cell_size_m();
    let world_y = ny as f64 * view.cell_size_m();

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut nodes = vec![Node {
        position_m: start,
        parent: None,
    }];

    // Degenerate request, already at the goal
    if (goal - start).norm() <= params.goal_threshold_m && view.is_line_free(&start, &goal) {
        return Ok(vec![start, goal]);
    }

    for _ in 0..params.max_iterations {
        if Instant::now() > deadline {
            return Err(PlanningError::Timeout);
        }

        let sample = if rng.gen::<f64>() < params.goal_bias {
            goal
        } else {
            Point2::new(rng.gen_range(0.0..world_x), rng.gen_range(0.0..world_y))
        };

        // Nearest node by linear scan
        let mut nearest = 0;
        let mut nearest_dist = f64::INFINITY;
        for (i, node) in nodes.iter().enumerate() {
            let d = (sample - node.position_m).norm();
            if d < nearest_dist {
                nearest_dist = d;
                nearest = i;
            }
        }

        if nearest_dist < 1e-9 {
            continue;
        }

        // Extend one fixed step towards the sample
        let from = nodes[nearest].position_m;
        let direction = (sample - from) / nearest_dist;
        let new_pos = from + direction * params.step_m.min(nearest_dist);

        if !view.is_line_free(&from, &new_pos) {
            continue;
        }

        nodes.push(Node {
            position_m: new_pos,
            parent: Some(nearest),
        });

        // Close enough to the goal, and the final hop is clear
        if (goal - new_pos).norm() <= params.goal_threshold_m && view.is_line_free(&new_pos, &goal)
        {
            let goal_index = nodes.len();
            nodes.push(Node {
                position_m: goal,
                parent: Some(goal_index - 1),
            });

            return Ok(trace_back(&nodes, goal_index));
        }
    }

    Err(PlanningError::NoPathFound)
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Walk the parent chain back from the given node to the root.
fn trace_back(nodes: &[Node], index: usize) -> Vec<Point2<f64>> {
    let mut points = Vec::new();
    let mut current = Some(index);

    while let Some(i) = current {
        points.push(nodes[i].position_m);
        current = nodes[i].parent;
    }

    points.reverse();
    points
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::map::{CostMap, CostMapParams, ObstacleObservation};
    use crate::nav::{Algorithm, PathPlanner, PathPlannerParams};
    use std::time::Duration;

    fn rrt_planner() -> PathPlanner {
        PathPlanner::new(PathPlannerParams {
            algorithm: Algorithm::Rrt,
            ..Default::default()
        })
    }

    fn empty_map() -> CostMap {
        CostMap::new(CostMapParams {
            num_cells: [200, 200],
            cell_size_m: 1.0,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_rrt_reaches_goal() {
        let planner = rrt_planner();
        let view = empty_map().snapshot();

        let path = planner
            .plan(
                &view,
                Point2::new(10.0, 10.0),
                Point2::new(180.0, 180.0),
                Duration::from_secs(10),
            )
            .unwrap();

        assert_eq!(path.points_m.first(), Some(&Point2::new(10.0, 10.0)));
        assert_eq!(path.points_m.last(), Some(&Point2::new(180.0, 180.0)));
        // Never shorter than the straight line
        assert!(path.length_m() >= (170.0f64 * 170.0 * 2.0).sqrt() - 1e-6);
    }

    #[test]
    fn test_rrt_reproducible() {
        let planner = rrt_planner();
        let view = empty_map().snapshot();

        let a = planner
            .plan(
                &view,
                Point2::new(10.0, 10.0),
                Point2::new(180.0, 180.0),
                Duration::from_secs(10),
            )
            .unwrap();
        let b = planner
            .plan(
                &view,
                Point2::new(10.0, 10.0),
                Point2::new(180.0, 180.0),
                Duration::from_secs(10),
            )
            .unwrap();

        assert_eq!(a.points_m, b.points_m);
    }

    #[test]
    fn test_rrt_avoids_obstacles() {
        let mut map = empty_map();
        let now = Instant::now();

        // A blob of obstacles square in the middle
        let obs: Vec<ObstacleObservation> = (0..10)
            .map(|i| ObstacleObservation {
                position_m: Point2::new(100.5, 80.5 + 4.0 * i as f64),
                distance_m: 20.0,
                timestamp: now,
            })
            .collect();
        map.ingest(&obs, now);
        let view = map.snapshot();

        let path = rrt_planner()
            .plan(
                &view,
                Point2::new(10.0, 100.0),
                Point2::new(190.0, 100.0),
                Duration::from_secs(10),
            )
            .unwrap();

        for i in 0..path.num_segments() {
            let seg = path.segment(i).unwrap();
            let steps = (seg.length_m / 0.5).ceil() as usize;
            for s in 0..=steps {
                let t = s as f64 / steps.max(1) as f64;
                let p = seg.start_m + (seg.end_m - seg.start_m) * t;
                assert!(view.cost_at(&p) < 1000.0, "path touches an obstacle at {:?}", p);
            }
        }
    }

    #[test]
    fn test_rrt_invalid_endpoint() {
        let mut map = empty_map();
        let now = Instant::now();
        map.ingest(
            &[ObstacleObservation {
                position_m: Point2::new(100.5, 100.5),
                distance_m: 5.0,
                timestamp: now,
            }],
            now,
        );

        let result = rrt_planner().plan(
            &map.snapshot(),
            Point2::new(10.0, 10.0),
            Point2::new(100.5, 100.5),
            Duration::from_secs(10),
        );

        assert_eq!(result, Err(PlanningError::InvalidEndpoint));
    }
}

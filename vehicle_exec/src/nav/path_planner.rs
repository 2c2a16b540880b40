//! # Path planner
//!
//! Deterministic A* search over the cost map, plus the smoothing and velocity-profile passes
//! shared by all planners. The search works in cell space: moves are 8-connected, cost is the
//! traversal cost of the entered cell (scaled for diagonals), and the heuristic is the Euclidean
//! cell distance, which is admissible while the base cost is 1.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use nalgebra::Point2;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::{Duration, Instant};

// Internal imports
use super::{rrt, Algorithm, PlanningError, RrtParams};
use crate::map::CostMapView;
use crate::path::Path;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Cost multiplier for diagonal moves
const DIAG_COST_FACTOR: f64 = 1.414;

/// The 8-connected neighbourhood, in a fixed order so searches are repeatable
const NEIGHBOURS: [(isize, isize); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the path planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathPlannerParams {
    /// Which planning algorithm to run
    pub algorithm: Algorithm,

    /// Wall-clock budget for a single plan
    pub deadline_s: f64,

    /// Turn angle above which a point is profiled at `sharp_speed`
    pub sharp_turn_rad: f64,

    /// Turn angle above which a point is profiled at `moderate_speed`
    pub moderate_turn_rad: f64,

    /// Normalised speed through sharp turns
    pub sharp_speed: f64,

    /// Normalised speed through moderate turns
    pub moderate_speed: f64,

    pub rrt: RrtParams,
}

/// The path planner.
#[derive(Debug, Clone)]
pub struct PathPlanner {
    params: PathPlannerParams,
}

/// An entry in the A* open set.
#[derive(Clone, Copy, PartialEq, Eq)]
struct OpenEntry {
    /// Estimated total cost through this cell (cost to come plus heuristic)
    total: OrderedFloat<f64>,

    /// Insertion sequence number, used to break ties deterministically
    seq: u64,

    cell: (usize, usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for PathPlannerParams {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::AStar,
            deadline_s: 30.0,
            sharp_turn_rad: 0.1,
            moderate_turn_rad: 0.05,
            sharp_speed: 0.3,
            moderate_speed: 0.6,
            rrt: RrtParams::default(),
        }
    }
}

impl Ord for OpenEntry {
    /// Ordering is flipped so that a max-heap of entries pops the lowest total first, with the
    /// earliest-inserted entry winning ties.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .total
            .cmp(&self.total)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PathPlanner {
    pub fn new(params: PathPlannerParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PathPlannerParams {
        &self.params
    }

    /// Plan a path from `start` to `goal` over the given map snapshot.
    ///
    /// The configured algorithm produces a raw point chain, which is then shortcut against the
    /// map and given a velocity profile.
    pub fn plan(
        &self,
        view: &CostMapView,
        start: Point2<f64>,
        goal: Point2<f64>,
        timeout: Duration,
    ) -> Result<Path, PlanningError> {
        let deadline = Instant::now() + timeout;

        let start_cell = view.index(&start).ok_or(PlanningError::InvalidEndpoint)?;
        let goal_cell = view.index(&goal).ok_or(PlanningError::InvalidEndpoint)?;
        if view.is_occupied_cell(start_cell) || view.is_occupied_cell(goal_cell) {
            return Err(PlanningError::InvalidEndpoint);
        }

        let raw = match self.params.algorithm {
            Algorithm::AStar => self.plan_astar(view, start, goal, deadline)?,
            Algorithm::Rrt => rrt::plan(&self.params.rrt, view, start, goal, deadline)?,
        };

        let points = smooth(view, raw);
        let speeds = self.velocity_profile(&points);

        Path::new(points, speeds).map_err(|_| PlanningError::NoPathFound)
    }

    /// A* search in cell space, returning the raw world-frame point chain.
    fn plan_astar(
        &self,
        view: &CostMapView,
        start: Point2<f64>,
        goal: Point2<f64>,
        deadline: Instant,
    ) -> Result<Vec<Point2<f64>>, PlanningError> {
        // Endpoint validity is checked by the caller
        let start_cell = view.index(&start).ok_or(PlanningError::InvalidEndpoint)?;
        let goal_cell = view.index(&goal).ok_or(PlanningError::InvalidEndpoint)?;

        if start_cell == goal_cell {
            return Ok(vec![start, goal]);
        }

        let mut open = BinaryHeap::new();
        let mut closed: HashSet<(usize, usize)> = HashSet::new();
        let mut cost_to_come: HashMap<(usize, usize), f64> = HashMap::new();
        let mut came_from: HashMap<(usize, usize), (usize, usize)> = HashMap::new();
        let mut seq = 0u64;

        cost_to_come.insert(start_cell, 0.0);
        open.push(OpenEntry {
            total: OrderedFloat(heuristic(start_cell, goal_cell)),
            seq,
            cell: start_cell,
        });

        while let Some(entry) = open.pop() {
            if Instant::now() > deadline {
                return Err(PlanningError::Timeout);
            }

            let cell = entry.cell;

            if cell == goal_cell {
                return Ok(reconstruct(&came_from, cell, view, start, goal));
            }

            if !closed.insert(cell) {
                continue;
            }

            let g = cost_to_come[&cell];

            for (dx, dy) in NEIGHBOURS.iter() {
                let nx = cell.0 as isize + dx;
                let ny = cell.1 as isize + dy;
                if nx < 0 || ny < 0 {
                    continue;
                }

                let ncell = (nx as usize, ny as usize);
                if !view.in_bounds(ncell) || closed.contains(&ncell) {
                    continue;
                }
                if view.is_occupied_cell(ncell) {
                    continue;
                }

                let step = if *dx != 0 && *dy != 0 {
                    DIAG_COST_FACTOR
                } else {
                    1.0
                };
                let tentative = g + step * view.cell_cost(ncell);

                if tentative < *cost_to_come.get(&ncell).unwrap_or(&f64::INFINITY) {
                    cost_to_come.insert(ncell, tentative);
                    came_from.insert(ncell, cell);

                    seq += 1;
                    open.push(OpenEntry {
                        total: OrderedFloat(tentative + heuristic(ncell, goal_cell)),
                        seq,
                        cell: ncell,
                    });
                }
            }
        }

        Err(PlanningError::NoPathFound)
    }

    /// Assign a normalised target speed to each point of the path.
    ///
    /// Endpoints are always zero. Interior points are scored by how far the path bends at them.
    fn velocity_profile(&self, points: &[Point2<f64>]) -> Vec<f64> {
        let n = points.len();
        let mut speeds = vec![1.0; n];

        if n == 0 {
            return speeds;
        }
        speeds[0] = 0.0;
        speeds[n - 1] = 0.0;

        for i in 1..n.saturating_sub(1) {
            let inbound = points[i] - points[i - 1];
            let outbound = points[i + 1] - points[i];

            let (ni, no) = (inbound.norm(), outbound.norm());
            if ni < 1e-9 || no < 1e-9 {
                continue;
            }

            let cos_turn = (inbound.dot(&outbound) / (ni * no)).max(-1.0).min(1.0);
            let turn_rad = cos_turn.acos();

            speeds[i] = if turn_rad > self.params.sharp_turn_rad {
                self.params.sharp_speed
            } else if turn_rad > self.params.moderate_turn_rad {
                self.params.moderate_speed
            } else {
                1.0
            };
        }

        speeds
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Euclidean distance between two cells, in cell units.
fn heuristic(a: (usize, usize), b: (usize, usize)) -> f64 {
    let dx = a.0 as f64 - b.0 as f64;
    let dy = a.1 as f64 - b.1 as f64;
    (dx * dx + dy * dy).sqrt()
}

/// Walk the parent chain back from the goal cell and convert to world points, with the exact
/// endpoints substituted for their cell centres.
fn reconstruct(
    came_from: &HashMap<(usize, usize), (usize, usize)>,
    goal_cell: (usize, usize),
    view: &CostMapView,
    start: Point2<f64>,
    goal: Point2<f64>,
) -> Vec<Point2<f64>> {
    let mut cells = vec![goal_cell];
    let mut current = goal_cell;
    while let Some(parent) = came_from.get(&current) {
        cells.push(*parent);
        current = *parent;
    }
    cells.reverse();

    let mut points: Vec<Point2<f64>> = cells.iter().map(|c| view.cell_centre(*c)).collect();
    points[0] = start;
    let last = points.len() - 1;
    points[last] = goal;

    points
}

/// Greedy line-of-sight shortcutting.
///
/// From each anchor point, keep the farthest subsequent point reachable by a free straight line,
/// so every surviving shortcut segment is collision-checked.
pub(super) fn smooth(view: &CostMapView, points: Vec<Point2<f64>>) -> Vec<Point2<f64>> {
    if points.len() <= 2 {
        return points;
    }

    let mut out = vec![points[0]];
    let mut i = 0;

    while i < points.len() - 1 {
        let mut j = points.len() - 1;
        while j > i + 1 {
            if view.is_line_free(&points[i], &points[j]) {
                break;
            }
            j -= 1;
        }

        out.push(points[j]);
        i = j;
    }

    out
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::map::{CostMap, CostMapParams, ObstacleObservation};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn empty_view() -> CostMapView {
        let map = CostMap::new(CostMapParams {
            num_cells: [100, 100],
            cell_size_m: 1.0,
            ..Default::default()
        })
        .unwrap();
        map.snapshot()
    }

    fn view_with_wall() -> CostMapView {
        // A vertical wall of obstacles at x = 50, with a gap left towards the top of the map
        let mut map = CostMap::new(CostMapParams {
            num_cells: [100, 100],
            cell_size_m: 1.0,
            inflation_radius_m: 2.0,
            obstacle_radius_base_m: 1.0,
            obstacle_radius_per_m: 0.0,
            ..Default::default()
        })
        .unwrap();

        let now = Instant::now();
        let obs: Vec<ObstacleObservation> = (0..60)
            .map(|y| ObstacleObservation {
                position_m: Point2::new(50.5, y as f64 + 0.5),
                distance_m: 10.0,
                timestamp: now,
            })
            .collect();
        map.ingest(&obs, now);

        map.snapshot()
    }

    #[test]
    fn test_astar_straight_line() {
        let planner = PathPlanner::new(PathPlannerParams::default());
        let view = empty_view();

        let path = planner
            .plan(&view, Point2::new(0.0, 0.0), Point2::new(50.0, 50.0), TIMEOUT)
            .unwrap();

        // On an empty map the smoothed path is the straight diagonal
        assert_eq!(path.points_m.first(), Some(&Point2::new(0.0, 0.0)));
        assert_eq!(path.points_m.last(), Some(&Point2::new(50.0, 50.0)));
        assert!((path.length_m() - 50.0 * std::f64::consts::SQRT_2).abs() < 0.5);

        // Endpoint speeds are always zero
        assert_eq!(*path.target_speeds.first().unwrap(), 0.0);
        assert_eq!(*path.target_speeds.last().unwrap(), 0.0);
    }

    #[test]
    fn test_astar_deterministic() {
        let planner = PathPlanner::new(PathPlannerParams::default());
        let view = view_with_wall();

        let a = planner
            .plan(&view, Point2::new(20.5, 20.5), Point2::new(80.5, 20.5), TIMEOUT)
            .unwrap();
        let b = planner
            .plan(&view, Point2::new(20.5, 20.5), Point2::new(80.5, 20.5), TIMEOUT)
            .unwrap();

        assert_eq!(a.points_m, b.points_m);
        assert_eq!(a.target_speeds, b.target_speeds);
    }

    #[test]
    fn test_astar_avoids_obstacles() {
        let planner = PathPlanner::new(PathPlannerParams::default());
        let view = view_with_wall();

        let path = planner
            .plan(&view, Point2::new(20.5, 20.5), Point2::new(80.5, 20.5), TIMEOUT)
            .unwrap();

        // Sample finely along every segment, nothing may touch an occupied cell
        for i in 0..path.num_segments() {
            let seg = path.segment(i).unwrap();
            let steps = (seg.length_m / 0.25).ceil() as usize;
            for s in 0..=steps {
                let t = s as f64 / steps.max(1) as f64;
                let p = seg.start_m + (seg.end_m - seg.start_m) * t;
                assert!(view.cost_at(&p) < 1000.0, "path touches an obstacle at {:?}", p);
            }
        }
    }

    #[test]
    fn test_invalid_endpoints() {
        let planner = PathPlanner::new(PathPlannerParams::default());
        let view = view_with_wall();

        // Goal on the wall
        assert_eq!(
            planner.plan(&view, Point2::new(20.5, 20.5), Point2::new(50.5, 20.5), TIMEOUT),
            Err(PlanningError::InvalidEndpoint)
        );

        // Start outside the map
        assert_eq!(
            planner.plan(&view, Point2::new(-5.0, 20.5), Point2::new(80.5, 20.5), TIMEOUT),
            Err(PlanningError::InvalidEndpoint)
        );
    }

    #[test]
    fn test_deadline_expiry() {
        let planner = PathPlanner::new(PathPlannerParams::default());
        let view = empty_view();

        let result = planner.plan(
            &view,
            Point2::new(0.5, 0.5),
            Point2::new(99.5, 99.5),
            Duration::from_secs(0),
        );

        assert_eq!(result, Err(PlanningError::Timeout));
    }

    #[test]
    fn test_unreachable_goal() {
        // Box the goal in completely with occupied cells
        let mut map = CostMap::new(CostMapParams {
            num_cells: [50, 50],
            cell_size_m: 1.0,
            inflation_radius_m: 1.0,
            obstacle_radius_base_m: 1.0,
            obstacle_radius_per_m: 0.0,
            ..Default::default()
        })
        .unwrap();

        let now = Instant::now();
        let mut obs = Vec::new();
        for x in 20..=30 {
            for y in 20..=30 {
                // Leave the goal cell itself clear
                if x >= 24 && x <= 26 && y >= 24 && y <= 26 {
                    continue;
                }
                obs.push(ObstacleObservation {
                    position_m: Point2::new(x as f64 + 0.5, y as f64 + 0.5),
                    distance_m: 5.0,
                    timestamp: now,
                });
            }
        }
        map.ingest(&obs, now);

        let planner = PathPlanner::new(PathPlannerParams::default());
        let result = planner.plan(
            &map.snapshot(),
            Point2::new(5.5, 5.5),
            Point2::new(25.5, 25.5),
            TIMEOUT,
        );

        assert_eq!(result, Err(PlanningError::NoPathFound));
    }

    #[test]
    fn test_velocity_profile() {
        let planner = PathPlanner::new(PathPlannerParams::default());

        // Straight run with a right-angle corner at the fourth point
        let points = vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(20.0, 0.0),
            Point2::new(30.0, 0.0),
            Point2::new(30.0, 10.0),
        ];
        let speeds = planner.velocity_profile(&points);

        assert_eq!(speeds[0], 0.0);
        assert_eq!(speeds[1], 1.0);
        assert_eq!(speeds[2], 1.0);
        // The corner point is profiled slow
        assert_eq!(speeds[3], 0.3);
        assert_eq!(speeds[4], 0.0);
    }
}

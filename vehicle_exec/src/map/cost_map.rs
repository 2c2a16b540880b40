//! # Cost map
//!
//! The cost map engine folds obstacle observations into a persistent occupancy grid, then derives
//! the planner-facing grids from it:
//!
//! - `occupancy` - raw evidence, decayed on every ingest so stale obstacles fade out.
//! - `inflated` - occupancy dilated by the vehicle's footprint. Rebuilt from the raw occupancy on
//!   every ingest, so inflation never compounds on itself.
//! - `cost` - a tiered traversal cost derived from the inflated grid.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

// Internal imports
use super::grid::Grid;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A single sighting of an obstacle.
#[derive(Debug, Clone, Copy)]
pub struct ObstacleObservation {
    /// Estimated obstacle position in the world frame
    pub position_m: Point2<f64>,

    /// Range at which the obstacle was sighted
    pub distance_m: f64,

    /// Time of the sighting
    pub timestamp: Instant,
}

/// Parameters for the cost map engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostMapParams {
    /// Number of cells along each axis
    pub num_cells: [usize; 2],

    /// Size of each (square) cell
    pub cell_size_m: f64,

    /// Factor applied to the occupancy grid on every ingest
    pub decay_factor: f64,

    /// Occupancy at or above which a cell is treated as occupied
    pub occupied_threshold: f64,

    /// Occupancy written into cells dilated around occupied ones
    pub inflated_value: f64,

    /// Occupancy above which a cell is treated as uncertain
    pub uncertain_threshold: f64,

    /// Radius of the dilation around occupied cells
    pub inflation_radius_m: f64,

    /// Minimum radius of the disc marked for an observation
    pub obstacle_radius_base_m: f64,

    /// Additional marked radius per metre of sighting range, further sightings are less precise
    pub obstacle_radius_per_m: f64,

    /// Traversal cost of an occupied cell, treated as impassable
    pub obstacle_cost: f64,

    /// Traversal cost of an inflated cell
    pub inflation_cost: f64,

    /// Traversal cost of an uncertain cell
    pub uncertain_cost: f64,

    /// Traversal cost of a free cell
    pub base_cost: f64,

    /// Age beyond which an observation is dropped from the recency list
    pub observation_max_age_s: f64,
}

/// An immutable snapshot of the planner-facing grids.
///
/// Snapshots are handed to the planning worker so that planning never holds the live map lock.
#[derive(Debug, Clone)]
pub struct CostMapView {
    inflated: Grid,

    cost: Grid,

    occupied_threshold: f64,

    inflated_value: f64,

    obstacle_cost: f64,
}

/// The cost map engine.
#[derive(Debug, Clone)]
pub struct CostMap {
    params: CostMapParams,

    /// Raw occupancy evidence
    occupancy: Grid,

    /// Grids derived from the occupancy on the last ingest
    derived: CostMapView,

    /// Recent observations, pruned by age
    observations: Vec<ObstacleObservation>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CostMapError {
    #[error("The cost map must have a non-zero number of cells on both axes")]
    ZeroSizedMap,

    #[error("The cell size must be positive, got {0}")]
    InvalidCellSize(f64),

    #[error("The decay factor must be in (0, 1], got {0}")]
    InvalidDecayFactor(f64),

    #[error("Expected uncertain < inflated < occupied thresholds")]
    InvalidThresholds,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for CostMapParams {
    fn default() -> Self {
        Self {
            num_cells: [400, 400],
            cell_size_m: 5.0,
            decay_factor: 0.9,
            occupied_threshold: 0.9,
            inflated_value: 0.8,
            uncertain_threshold: 0.2,
            inflation_radius_m: 10.0,
            obstacle_radius_base_m: 5.0,
            obstacle_radius_per_m: 0.02,
            obstacle_cost: 1000.0,
            inflation_cost: 10.0,
            uncertain_cost: 2.0,
            base_cost: 1.0,
            observation_max_age_s: 300.0,
        }
    }
}

impl CostMapView {
    pub fn num_cells(&self) -> (usize, usize) {
        self.cost.num_cells()
    }

    pub fn cell_size_m(&self) -> f64 {
        self.cost.cell_size_m()
    }

    pub fn index(&self, position_m: &Point2<f64>) -> Option<(usize, usize)> {
        self.cost.index(position_m)
    }

    pub fn cell_centre(&self, cell: (usize, usize)) -> Point2<f64> {
        self.cost.cell_centre(cell)
    }

    pub fn in_bounds(&self, cell: (usize, usize)) -> bool {
        self.cost.in_bounds(cell)
    }

    /// Traversal cost of the given cell. Cells outside the map are impassable.
    pub fn cell_cost(&self, cell: (usize, usize)) -> f64 {
        self.cost.get(cell).unwrap_or(self.obstacle_cost)
    }

    /// Traversal cost at the given world position. Positions outside the map are impassable.
    pub fn cost_at(&self, position_m: &Point2<f64>) -> f64 {
        match self.cost.index(position_m) {
            Some(cell) => self.cell_cost(cell),
            None => self.obstacle_cost,
        }
    }

    pub fn is_occupied_cell(&self, cell: (usize, usize)) -> bool {
        self.cell_cost(cell) >= self.obstacle_cost
    }

    /// True if the straight line between the two positions crosses neither occupied nor inflated
    /// cells. Lines with an endpoint outside the map are never free.
    pub fn is_line_free(&self, a: &Point2<f64>, b: &Point2<f64>) -> bool {
        match self.inflated.line_cells(a, b) {
            Some(cells) => cells
                .iter()
                .all(|c| self.inflated.get(*c).unwrap_or(1.0) < self.inflated_value),
            None => false,
        }
    }
}

impl CostMap {
    pub fn new(params: CostMapParams) -> Result<Self, CostMapError> {
        if params.num_cells[0] == 0 || params.num_cells[1] == 0 {
            return Err(CostMapError::ZeroSizedMap);
        }
        if params.cell_size_m <= 0.0 {
            return Err(CostMapError::InvalidCellSize(params.cell_size_m));
        }
        if params.decay_factor <= 0.0 || params.decay_factor > 1.0 {
            return Err(CostMapError::InvalidDecayFactor(params.decay_factor));
        }
        if params.uncertain_threshold >= params.inflated_value
            || params.inflated_value >= params.occupied_threshold
        {
            return Err(CostMapError::InvalidThresholds);
        }

        let num_cells = (params.num_cells[0], params.num_cells[1]);
        let occupancy = Grid::new(num_cells, params.cell_size_m, 0.0);

        let derived = CostMapView {
            inflated: occupancy.clone(),
            cost: Grid::new(num_cells, params.cell_size_m, params.base_cost),
            occupied_threshold: params.occupied_threshold,
            inflated_value: params.inflated_value,
            obstacle_cost: params.obstacle_cost,
        };

        Ok(Self {
            params,
            occupancy,
            derived,
            observations: Vec::new(),
        })
    }

    pub fn params(&self) -> &CostMapParams {
        &self.params
    }

    pub fn observations(&self) -> &[ObstacleObservation] {
        &self.observations
    }

    /// Fold a batch of observations into the map and rebuild the derived grids.
    ///
    /// Must be called every map update cycle, even with an empty batch, so that stale occupancy
    /// decays away.
    pub fn ingest(&mut self, observations: &[ObstacleObservation], now: Instant) {
        // Decay before marking so fresh evidence is written at full strength
        self.occupancy.scale(self.params.decay_factor);

        for obs in observations {
            let cell = match self.occupancy.index(&obs.position_m) {
                Some(c) => c,
                None => continue,
            };

            let radius_m = self.params.obstacle_radius_base_m
                + self.params.obstacle_radius_per_m * obs.distance_m.max(0.0);
            let radius_cells = (radius_m / self.params.cell_size_m).ceil() as usize;

            self.occupancy.mark_disc(cell, radius_cells, 1.0);
            self.observations.push(*obs);
        }

        let max_age = Duration::from_secs_f64(self.params.observation_max_age_s);
        self.observations
            .retain(|o| now.saturating_duration_since(o.timestamp) <= max_age);

        self.rebuild_derived();
    }

    /// Take an immutable snapshot of the planner-facing grids.
    pub fn snapshot(&self) -> CostMapView {
        self.derived.clone()
    }

    /// Traversal cost at the given world position.
    pub fn cost_at(&self, position_m: &Point2<f64>) -> f64 {
        self.derived.cost_at(position_m)
    }

    pub fn is_line_free(&self, a: &Point2<f64>, b: &Point2<f64>) -> bool {
        self.derived.is_line_free(a, b)
    }

    /// Rebuild the inflated and cost grids from the current occupancy.
    ///
    /// The inflated grid always starts from a fresh copy of the occupancy, so repeated rebuilds
    /// without new evidence produce identical output.
    fn rebuild_derived(&mut self) {
        let mut inflated = self.occupancy.clone();

        let occupied: Vec<(usize, usize)> = self
            .occupancy
            .iter()
            .filter(|(_, v)| *v >= self.params.occupied_threshold)
            .map(|(c, _)| c)
            .collect();

        let radius_cells = (self.params.inflation_radius_m / self.params.cell_size_m).ceil() as usize;
        for cell in occupied {
            inflated.mark_disc(cell, radius_cells, self.params.inflated_value);
        }

        let mut cost = Grid::new(
            self.occupancy.num_cells(),
            self.params.cell_size_m,
            self.params.base_cost,
        );

        for (cell, occ) in inflated.iter() {
            let c = if occ >= self.params.occupied_threshold {
                self.params.obstacle_cost
            } else if occ >= self.params.inflated_value {
                self.params.inflation_cost
            } else if occ > self.params.uncertain_threshold {
                self.params.uncertain_cost
            } else {
                self.params.base_cost
            };

            if c != self.params.base_cost {
                cost.set(cell, c);
            }
        }

        self.derived.inflated = inflated;
        self.derived.cost = cost;
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

//! # Grid
//!
//! A fixed-size scalar grid over the world, with the origin of cell `(0, 0)` at world `(0, 0)`.
//! Cells are addressed as `(x, y)` indices and a world position maps to the cell containing it.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use nalgebra::Point2;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A dense grid of `f64` cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid {
    cells: Array2<f64>,

    num_cells: (usize, usize),

    cell_size_m: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Grid {
    /// Create a new grid with every cell set to `fill`.
    pub fn new(num_cells: (usize, usize), cell_size_m: f64, fill: f64) -> Self {
        Self {
            cells: Array2::from_elem(num_cells, fill),
            num_cells,
            cell_size_m,
        }
    }

    pub fn num_cells(&self) -> (usize, usize) {
        self.num_cells
    }

    pub fn cell_size_m(&self) -> f64 {
        self.cell_size_m
    }

    /// Get the cell containing the given world position, or `None` if it lies outside the grid.
    pub fn index(&self, position_m: &Point2<f64>) -> Option<(usize, usize)> {
        if position_m.x < 0.0 || position_m.y < 0.0 {
            return None;
        }

        let cell = (
            (position_m.x / self.cell_size_m) as usize,
            (position_m.y / self.cell_size_m) as usize,
        );

        if self.in_bounds(cell) {
            Some(cell)
        } else {
            None
        }
    }

    /// Get the world position of the centre of the given cell.
    pub fn cell_centre(&self, cell: (usize, usize)) -> Point2<f64> {
        Point2::new(
            (cell.0 as f64 + 0.5) * self.cell_size_m,
            (cell.1 as f64 + 0.5) * self.cell_size_m,
        )
    }

    pub fn in_bounds(&self, cell: (usize, usize)) -> bool {
        cell.0 < self.num_cells.0 && cell.1 < self.num_cells.1
    }

    pub fn get(&self, cell: (usize, usize)) -> Option<f64> {
        self.cells.get([cell.0, cell.1]).copied()
    }

    pub fn set(&mut self, cell: (usize, usize), value: f64) {
        if let Some(c) = self.cells.get_mut([cell.0, cell.1]) {
            *c = value;
        }
    }

    /// Multiply every cell by the given factor.
    pub fn scale(&mut self, factor: f64) {
        self.cells.mapv_inplace(|c| c * factor);
    }

    /// Set every cell within `radius_cells` of `centre` to the maximum of its current value and
    /// `value`. Cells outside the grid are ignored.
    pub fn mark_disc(&mut self, centre: (usize, usize), radius_cells: usize, value: f64) {
        let r = radius_cells as isize;
        let (cx, cy) = (centre.0 as isize, centre.1 as isize);

        for dx in -r..=r {
            for dy in -r..=r {
                if dx * dx + dy * dy > r * r {
                    continue;
                }

                let (x, y) = (cx + dx, cy + dy);
                if x < 0 || y < 0 {
                    continue;
                }

                let cell = (x as usize, y as usize);
                if !self.in_bounds(cell) {
                    continue;
                }

                if let Some(c) = self.cells.get_mut([cell.0, cell.1]) {
                    if value > *c {
                        *c = value;
                    }
                }
            }
        }
    }

    /// Iterate over all cell indices and values.
    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), f64)> + '_ {
        self.cells.indexed_iter().map(|(idx, v)| (idx, *v))
    }

    /// Number of cells with a value of at least `threshold`.
    pub fn count_at_least(&self, threshold: f64) -> usize {
        self.cells.iter().filter(|c| **c >= threshold).count()
    }

    /// Get the cells on the straight line between the two world positions, inclusive of both
    /// endpoint cells, using Bresenham's algorithm. Returns `None` if either endpoint lies
    /// outside the grid.
    pub fn line_cells(&self, a: &Point2<f64>, b: &Point2<f64>) -> Option<Vec<(usize, usize)>> {
        let start = self.index(a)?;
        let end = self.index(b)?;

        let mut cells = Vec::new();

        let (mut x, mut y) = (start.0 as isize, start.1 as isize);
        let (x1, y1) = (end.0 as isize, end.1 as isize);

        let dx = (x1 - x).abs();
        let dy = -(y1 - y).abs();
        let sx = if x < x1 { 1 } else { -1 };
        let sy = if y < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            cells.push((x as usize, y as usize));

            if x == x1 && y == y1 {
                break;
            }

            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }

        Some(cells)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_index_and_centre() {
        let grid = Grid::new((10, 20), 2.0, 0.0);

        assert_eq!(grid.index(&Point2::new(0.0, 0.0)), Some((0, 0)));
        assert_eq!(grid.index(&Point2::new(3.9, 5.1)), Some((1, 2)));
        assert_eq!(grid.index(&Point2::new(-0.1, 5.0)), None);
        assert_eq!(grid.index(&Point2::new(20.0, 5.0)), None);
        assert_eq!(grid.index(&Point2::new(5.0, 41.0)), None);

        assert_eq!(grid.cell_centre((1, 2)), Point2::new(3.0, 5.0));
    }

    #[test]
    fn test_mark_disc_and_scale() {
        let mut grid = Grid::new((10, 10), 1.0, 0.0);

        grid.mark_disc((5, 5), 2, 1.0);

        assert_eq!(grid.get((5, 5)), Some(1.0));
        assert_eq!(grid.get((7, 5)), Some(1.0));
        assert_eq!(grid.get((8, 5)), Some(0.0));
        // Corners of the bounding square are outside the disc
        assert_eq!(grid.get((7, 7)), Some(0.0));

        // Marking never lowers a cell
        grid.mark_disc((5, 5), 1, 0.5);
        assert_eq!(grid.get((5, 5)), Some(1.0));

        grid.scale(0.5);
        assert_eq!(grid.get((5, 5)), Some(0.5));
    }

    #[test]
    fn test_disc_near_edge_is_clipped() {
        let mut grid = Grid::new((5, 5), 1.0, 0.0);

        grid.mark_disc((0, 0), 3, 1.0);
        assert_eq!(grid.get((0, 0)), Some(1.0));
        assert_eq!(grid.get((3, 0)), Some(1.0));
    }

    #[test]
    fn test_line_cells() {
        let grid = Grid::new((10, 10), 1.0, 0.0);

        let cells = grid
            .line_cells(&Point2::new(0.5, 0.5), &Point2::new(4.5, 0.5))
            .unwrap();
        assert_eq!(cells, vec![(0, 0), (1, 0), (2, 0), (3, 0), (4, 0)]);

        let diag = grid
            .line_cells(&Point2::new(0.5, 0.5), &Point2::new(3.5, 3.5))
            .unwrap();
        assert_eq!(diag.first(), Some(&(0, 0)));
        assert_eq!(diag.last(), Some(&(3, 3)));

        // Out-of-bounds endpoints fail
        assert!(grid
            .line_cells(&Point2::new(0.5, 0.5), &Point2::new(50.0, 0.5))
            .is_none());
    }
}

//! # Geofence zones
//!
//! Axis-aligned rectangular zones in the world frame. Safe zones bound where the vehicle may
//! operate, restricted zones must never be entered.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An axis-aligned rectangular zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,

    pub min_x_m: f64,
    pub min_y_m: f64,
    pub max_x_m: f64,
    pub max_y_m: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Zone {
    pub fn new(name: &str, min_m: Point2<f64>, max_m: Point2<f64>) -> Self {
        Self {
            name: name.to_string(),
            min_x_m: min_m.x,
            min_y_m: min_m.y,
            max_x_m: max_m.x,
            max_y_m: max_m.y,
        }
    }

    /// True if the given position lies inside the zone, boundary included.
    pub fn contains(&self, position_m: &Point2<f64>) -> bool {
        position_m.x >= self.min_x_m
            && position_m.x <= self.max_x_m
            && position_m.y >= self.min_y_m
            && position_m.y <= self.max_y_m
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_contains() {
        let zone = Zone::new("pit_a", Point2::new(10.0, 10.0), Point2::new(20.0, 30.0));

        assert!(zone.contains(&Point2::new(15.0, 20.0)));
        assert!(zone.contains(&Point2::new(10.0, 10.0)));
        assert!(zone.contains(&Point2::new(20.0, 30.0)));
        assert!(!zone.contains(&Point2::new(9.9, 20.0)));
        assert!(!zone.contains(&Point2::new(15.0, 30.1)));
    }
}

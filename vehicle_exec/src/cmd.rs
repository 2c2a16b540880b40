//! # Manoeuvre commands
//!
//! The discrete drive demands produced by the path follower and the safety chain, and consumed by
//! the motor interface.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The type of manoeuvre to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MnvrAction {
    /// Bring the vehicle to rest.
    Stop,

    /// Drive along the current heading.
    Forward,

    /// Rotate towards the left (anticlockwise).
    TurnLeft,

    /// Rotate towards the right (clockwise).
    TurnRight,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A demand to the drive motors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorCommand {
    /// The manoeuvre to perform
    pub action: MnvrAction,

    /// Normalised speed demand in `[0, 1]`
    pub speed: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MotorCommand {
    /// Create a new command, clamping the speed demand into `[0, 1]`.
    pub fn new(action: MnvrAction, speed: f64) -> Self {
        Self {
            action,
            speed: speed.max(0.0).min(1.0),
        }
    }

    /// An immediate stop demand.
    pub fn stop() -> Self {
        Self {
            action: MnvrAction::Stop,
            speed: 0.0,
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self.action, MnvrAction::Stop)
    }
}

impl Default for MotorCommand {
    fn default() -> Self {
        Self::stop()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_speed_clamped() {
        assert_eq!(MotorCommand::new(MnvrAction::Forward, 1.7).speed, 1.0);
        assert_eq!(MotorCommand::new(MnvrAction::Forward, -0.3).speed, 0.0);
        assert!(MotorCommand::stop().is_stop());
    }
}

//! # Telemetry
//!
//! The readings the safety monitor evaluates, and the source seam they arrive through. Every
//! reading is optional: a check whose reading is absent is skipped rather than failed.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::time::Instant;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A snapshot of vehicle health readings.
#[derive(Debug, Clone, Copy)]
pub struct Telemetry {
    /// Time the snapshot was taken
    pub timestamp: Instant,

    /// Ground speed
    pub speed_ms: Option<f64>,

    /// Drive electronics temperature
    pub temperature_c: Option<f64>,

    /// Battery bus voltage
    pub battery_v: Option<f64>,

    /// Roll angle
    pub roll_deg: Option<f64>,

    /// Pitch angle
    pub pitch_deg: Option<f64>,

    /// Range to the nearest obstacle on any proximity sensor
    pub obstacle_distance_cm: Option<f64>,
}

/// Simulated telemetry for the exec: nominal readings with a slowly draining battery.
///
/// Obstacle proximity is not reported here, the exec fills it in from the simulated obstacle
/// field at the vehicle's current pose.
pub struct SimTelemetrySource {
    battery_v: f64,

    /// Voltage drained per poll
    drain_v: f64,
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A source of telemetry snapshots.
///
/// `poll` returns `None` when no new snapshot is available, which the monitor treats as a
/// potential communication loss.
pub trait TelemetrySource {
    fn poll(&mut self) -> Option<Telemetry>;
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Telemetry {
    /// A snapshot with no readings, taken now.
    pub fn empty(timestamp: Instant) -> Self {
        Self {
            timestamp,
            speed_ms: None,
            temperature_c: None,
            battery_v: None,
            roll_deg: None,
            pitch_deg: None,
            obstacle_distance_cm: None,
        }
    }
}

impl SimTelemetrySource {
    pub fn new(initial_battery_v: f64, drain_v: f64) -> Self {
        Self {
            battery_v: initial_battery_v,
            drain_v,
        }
    }
}

impl TelemetrySource for SimTelemetrySource {
    fn poll(&mut self) -> Option<Telemetry> {
        self.battery_v = (self.battery_v - self.drain_v).max(0.0);

        Some(Telemetry {
            timestamp: Instant::now(),
            speed_ms: Some(0.0),
            temperature_c: Some(35.0),
            battery_v: Some(self.battery_v),
            roll_deg: Some(1.0),
            pitch_deg: Some(2.0),
            obstacle_distance_cm: None,
        })
    }
}

//! # Safety monitor
//!
//! Continuously evaluates telemetry and pose against configured limits. Every breached limit is
//! logged as a violation; the monitor aggregates the trailing violation window into a safety
//! state and escalates through it:
//!
//! - advisory violations raise the state to `Warning` or `Critical`,
//! - dangerous conditions additionally force an immediate stop via the global halt flag,
//! - conditions past their emergency tier latch an emergency stop which only an explicit
//!   external reset clears,
//! - a deeply discharged battery triggers a single return-home request.
//!
//! The halt flag is always set before any event is fanned out, so listeners can never observe an
//! emergency that the drive chain does not yet know about.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod telemetry;
pub mod zone;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

// Internal imports
use crate::loc::Pose;

// Re-exports
pub use telemetry::{SimTelemetrySource, Telemetry, TelemetrySource};
pub use zone::Zone;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Aggregated safety state, ordered by severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum SafetyState {
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl Default for SafetyState {
    fn default() -> Self {
        Self::Normal
    }
}

/// Severity of a single violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Critical,
}

/// The limit a violation breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    SpeedExceeded,
    AccelerationExceeded,
    ObstacleTooClose,
    TemperatureHigh,
    BatteryLow,
    SlopeTooSteep,
    OutsideSafeZone,
    RestrictedZoneEntry,
    CommunicationLoss,
    OperationTimeExceeded,
}

/// Events fanned out to registered listeners as the monitor escalates.
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyEvent {
    StateChanged { from: SafetyState, to: SafetyState },
    ForcedStop { reason: ViolationKind },
    EmergencyStop { reason: ViolationKind },
    ReturnHome,
}

/// Errors raised while writing the violation report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Cannot serialise the safety report: {0}")]
    SerialiseError(#[from] serde_json::Error),

    #[error("Cannot write the safety report: {0}")]
    FileWriteError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A single logged violation.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyViolation {
    /// Time the violation was raised
    #[serde(skip)]
    pub timestamp: Instant,

    /// Session-relative time of the violation, for export
    pub time_s: f64,

    pub kind: ViolationKind,

    pub severity: Severity,

    pub description: String,

    /// The measured value which breached the limit
    pub value: f64,
}

/// The violation log as written to disk at the end of a session.
#[derive(Serialize)]
struct SafetyReport<'a> {
    /// UTC time the report was generated, RFC 3339
    generated: String,

    /// Safety state at the time of the report
    state: SafetyState,

    num_violations: usize,

    violations: &'a [SafetyViolation],
}

/// Parameters for the safety monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyParams {
    /// Maximum permitted ground speed
    pub max_speed_ms: f64,

    /// Maximum permitted change in speed per second
    pub max_accel_ms2: f64,

    /// Obstacle range below which violations are raised. Half this range forces a stop, a third
    /// of it latches an emergency stop
    pub min_obstacle_distance_cm: f64,

    /// Maximum permitted slope, combined from roll and pitch. 1.5x is critical, 2x latches an
    /// emergency stop
    pub max_slope_deg: f64,

    /// Maximum permitted temperature
    pub max_temperature_c: f64,

    /// Margin above the maximum temperature at which the violation becomes critical
    pub temp_critical_margin_c: f64,

    /// Margin above the maximum temperature which latches an emergency stop
    pub temp_emergency_margin_c: f64,

    /// Minimum battery voltage
    pub min_battery_v: f64,

    /// Margin below the minimum at which the violation becomes critical
    pub battery_critical_margin_v: f64,

    /// Margin below the minimum which triggers return-home
    pub battery_return_margin_v: f64,

    /// Maximum continuous operation time
    pub max_operation_time_s: f64,

    /// Length of the trailing window violations are aggregated over
    pub violation_window_s: f64,

    /// Number of warnings in the window above which the state becomes `Warning`
    pub warning_count_threshold: usize,

    /// Telemetry silence after which the state becomes critical
    pub comms_critical_timeout_s: f64,

    /// Telemetry silence which latches an emergency stop
    pub comms_emergency_timeout_s: f64,

    /// Zones the vehicle should stay within. Empty disables the check
    pub safe_zones: Vec<Zone>,

    /// Zones the vehicle must never enter
    pub restricted_zones: Vec<Zone>,
}

/// The safety monitor.
pub struct SafetyMonitor {
    params: SafetyParams,

    state: SafetyState,

    /// Global halt flag, shared with the control loop
    halt: Arc<AtomicBool>,

    /// Set while an emergency stop is latched
    emergency_active: bool,

    /// Set once return-home has been triggered, cleared when the battery recovers
    return_home_latched: bool,

    /// Append-only violation log, in raise order
    violations: Vec<SafetyViolation>,

    /// Index of the first violation still inside the aggregation window. Never rewinds, so
    /// aggregation over a long session does not rescan the whole log
    window_start: usize,

    /// Most recent telemetry snapshot
    last_telemetry: Option<Telemetry>,

    /// Time telemetry was last received
    last_rx: Instant,

    /// Previous speed sample, for the acceleration check
    prev_speed: Option<(Instant, f64)>,

    start_time: Instant,

    listeners: Vec<Box<dyn Fn(&SafetyEvent) + Send>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for SafetyParams {
    fn default() -> Self {
        Self {
            max_speed_ms: 2.0,
            max_accel_ms2: 1.5,
            min_obstacle_distance_cm: 30.0,
            max_slope_deg: 25.0,
            max_temperature_c: 80.0,
            temp_critical_margin_c: 10.0,
            temp_emergency_margin_c: 15.0,
            min_battery_v: 10.5,
            battery_critical_margin_v: 0.5,
            battery_return_margin_v: 1.0,
            max_operation_time_s: 8.0 * 3600.0,
            violation_window_s: 60.0,
            warning_count_threshold: 3,
            comms_critical_timeout_s: 5.0,
            comms_emergency_timeout_s: 10.0,
            safe_zones: Vec::new(),
            restricted_zones: Vec::new(),
        }
    }
}

impl SafetyMonitor {
    pub fn new(params: SafetyParams, halt: Arc<AtomicBool>) -> Self {
        let now = Instant::now();
        Self {
            params,
            state: SafetyState::Normal,
            halt,
            emergency_active: false,
            return_home_latched: false,
            violations: Vec::new(),
            window_start: 0,
            last_telemetry: None,
            last_rx: now,
            prev_speed: None,
            start_time: now,
            listeners: Vec::new(),
        }
    }

    /// Register a listener for safety events.
    pub fn add_listener<F: Fn(&SafetyEvent) + Send + 'static>(&mut self, listener: F) {
        self.listeners.push(Box::new(listener));
    }

    pub fn state(&self) -> SafetyState {
        self.state
    }

    pub fn violations(&self) -> &[SafetyViolation] {
        &self.violations
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_active
    }

    /// Replace the limits at runtime.
    pub fn set_params(&mut self, params: SafetyParams) {
        self.params = params;
    }

    /// Write the full violation log to the given path as pretty-printed JSON.
    ///
    /// Written into the session directory at the end of each run so that violations can be
    /// audited offline.
    pub fn write_report(&self, path: &std::path::Path) -> Result<(), ReportError> {
        let report = SafetyReport {
            generated: Utc::now().to_rfc3339(),
            state: self.state,
            num_violations: self.violations.len(),
            violations: &self.violations,
        };

        fs::write(path, serde_json::to_string_pretty(&report)?)?;

        info!(
            "Safety report written to {:?} ({} violations)",
            path,
            self.violations.len()
        );

        Ok(())
    }

    /// Run every check against the latest telemetry and pose, then aggregate the state.
    ///
    /// Passing `None` reuses the last received telemetry; the communication-loss check runs
    /// against the time telemetry was last actually received.
    pub fn evaluate(
        &mut self,
        telemetry: Option<&Telemetry>,
        pose: &Pose,
        now: Instant,
    ) -> SafetyState {
        let fresh = telemetry.is_some();
        if let Some(tm) = telemetry {
            self.last_rx = tm.timestamp;
            self.last_telemetry = Some(*tm);
        }

        if let Some(tm) = self.last_telemetry {
            self.check_speed(&tm, fresh, now);
            self.check_obstacle(&tm, now);
            self.check_temperature(&tm, now);
            self.check_battery(&tm, now);
            self.check_slope(&tm, now);
        }
        self.check_zones(pose, now);
        self.check_comms(now);
        self.check_operation_time(now);

        self.aggregate(now)
    }

    /// Clear a latched emergency stop. An explicit external operation.
    pub fn reset_emergency(&mut self) {
        if !self.emergency_active && self.state != SafetyState::Emergency {
            return;
        }

        info!("Emergency stop reset");
        self.emergency_active = false;
        self.halt.store(false, Ordering::SeqCst);

        let from = self.state;
        self.state = SafetyState::Normal;
        self.emit(&SafetyEvent::StateChanged {
            from,
            to: self.state,
        });
    }

    // ---- CHECKS ----

    fn check_speed(&mut self, tm: &Telemetry, fresh: bool, now: Instant) {
        let speed = match tm.speed_ms {
            Some(s) => s,
            None => return,
        };

        if speed > self.params.max_speed_ms {
            self.raise(
                ViolationKind::SpeedExceeded,
                Severity::Critical,
                format!("Speed {:.2} m/s over limit {:.2} m/s", speed, self.params.max_speed_ms),
                speed,
                now,
            );
        }

        if fresh {
            if let Some((t0, v0)) = self.prev_speed {
                let dt_s = tm.timestamp.saturating_duration_since(t0).as_secs_f64();
                if dt_s > 1e-6 {
                    let accel = (speed - v0).abs() / dt_s;
                    if accel > self.params.max_accel_ms2 {
                        self.raise(
                            ViolationKind::AccelerationExceeded,
                            Severity::Warning,
                            format!("Acceleration {:.2} m/s^2 over limit", accel),
                            accel,
                            now,
                        );
                    }
                }
            }
            self.prev_speed = Some((tm.timestamp, speed));
        }
    }

    fn check_obstacle(&mut self, tm: &Telemetry, now: Instant) {
        let distance = match tm.obstacle_distance_cm {
            Some(d) => d,
            None => return,
        };

        let threshold = self.params.min_obstacle_distance_cm;
        if distance >= threshold {
            return;
        }

        if distance <= threshold / 3.0 {
            self.raise(
                ViolationKind::ObstacleTooClose,
                Severity::Critical,
                format!("Obstacle at {:.0} cm, emergency stop", distance),
                distance,
                now,
            );
            self.emergency_stop(ViolationKind::ObstacleTooClose);
        } else if distance <= threshold / 2.0 {
            self.raise(
                ViolationKind::ObstacleTooClose,
                Severity::Critical,
                format!("Obstacle at {:.0} cm, stopping", distance),
                distance,
                now,
            );
            self.forced_stop(ViolationKind::ObstacleTooClose);
        } else {
            self.raise(
                ViolationKind::ObstacleTooClose,
                Severity::Warning,
                format!("Obstacle at {:.0} cm", distance),
                distance,
                now,
            );
        }
    }

    fn check_temperature(&mut self, tm: &Telemetry, now: Instant) {
        let temp = match tm.temperature_c {
            Some(t) => t,
            None => return,
        };

        let max = self.params.max_temperature_c;
        if temp <= max {
            return;
        }

        if temp > max + self.params.temp_emergency_margin_c {
            self.raise(
                ViolationKind::TemperatureHigh,
                Severity::Critical,
                format!("Temperature {:.1} C, emergency stop", temp),
                temp,
                now,
            );
            self.emergency_stop(ViolationKind::TemperatureHigh);
        } else if temp > max + self.params.temp_critical_margin_c {
            self.raise(
                ViolationKind::TemperatureHigh,
                Severity::Critical,
                format!("Temperature {:.1} C over limit {:.1} C", temp, max),
                temp,
                now,
            );
        } else {
            self.raise(
                ViolationKind::TemperatureHigh,
                Severity::Warning,
                format!("Temperature {:.1} C over limit {:.1} C", temp, max),
                temp,
                now,
            );
        }
    }

    fn check_battery(&mut self, tm: &Telemetry, now: Instant) {
        let voltage = match tm.battery_v {
            Some(v) => v,
            None => return,
        };

        let min = self.params.min_battery_v;
        if voltage >= min {
            self.return_home_latched = false;
            return;
        }

        if voltage < min - self.params.battery_return_margin_v {
            self.raise(
                ViolationKind::BatteryLow,
                Severity::Critical,
                format!("Battery {:.2} V deeply discharged, returning home", voltage),
                voltage,
                now,
            );
            if !self.return_home_latched {
                self.return_home_latched = true;
                self.emit(&SafetyEvent::ReturnHome);
            }
        } else if voltage < min - self.params.battery_critical_margin_v {
            self.raise(
                ViolationKind::BatteryLow,
                Severity::Critical,
                format!("Battery {:.2} V under limit {:.2} V", voltage, min),
                voltage,
                now,
            );
        } else {
            self.raise(
                ViolationKind::BatteryLow,
                Severity::Warning,
                format!("Battery {:.2} V under limit {:.2} V", voltage, min),
                voltage,
                now,
            );
        }
    }

    fn check_slope(&mut self, tm: &Telemetry, now: Instant) {
        let (roll, pitch) = match (tm.roll_deg, tm.pitch_deg) {
            (Some(r), Some(p)) => (r, p),
            _ => return,
        };

        let slope = (roll * roll + pitch * pitch).sqrt();
        let max = self.params.max_slope_deg;
        if slope <= max {
            return;
        }

        if slope > 2.0 * max {
            self.raise(
                ViolationKind::SlopeTooSteep,
                Severity::Critical,
                format!("Slope {:.1} deg, emergency stop", slope),
                slope,
                now,
            );
            self.emergency_stop(ViolationKind::SlopeTooSteep);
        } else if slope > 1.5 * max {
            self.raise(
                ViolationKind::SlopeTooSteep,
                Severity::Critical,
                format!("Slope {:.1} deg over limit {:.1} deg", slope, max),
                slope,
                now,
            );
        } else {
            self.raise(
                ViolationKind::SlopeTooSteep,
                Severity::Warning,
                format!("Slope {:.1} deg over limit {:.1} deg", slope, max),
                slope,
                now,
            );
        }
    }

    fn check_zones(&mut self, pose: &Pose, now: Instant) {
        if !self.params.safe_zones.is_empty()
            && !self
                .params
                .safe_zones
                .iter()
                .any(|z| z.contains(&pose.position_m))
        {
            self.raise(
                ViolationKind::OutsideSafeZone,
                Severity::Warning,
                format!("Position {:?} outside all safe zones", pose.position_m),
                0.0,
                now,
            );
        }

        let entered = self
            .params
            .restricted_zones
            .iter()
            .find(|z| z.contains(&pose.position_m))
            .map(|z| z.name.clone());

        if let Some(name) = entered {
            self.raise(
                ViolationKind::RestrictedZoneEntry,
                Severity::Critical,
                format!("Entered restricted zone {}", name),
                0.0,
                now,
            );
            self.forced_stop(ViolationKind::RestrictedZoneEntry);
        }
    }

    fn check_comms(&mut self, now: Instant) {
        let silence_s = now.saturating_duration_since(self.last_rx).as_secs_f64();

        if silence_s > self.params.comms_emergency_timeout_s {
            self.raise(
                ViolationKind::CommunicationLoss,
                Severity::Critical,
                format!("No telemetry for {:.1} s, emergency stop", silence_s),
                silence_s,
                now,
            );
            self.emergency_stop(ViolationKind::CommunicationLoss);
        } else if silence_s > self.params.comms_critical_timeout_s {
            self.raise(
                ViolationKind::CommunicationLoss,
                Severity::Critical,
                format!("No telemetry for {:.1} s", silence_s),
                silence_s,
                now,
            );
        }
    }

    fn check_operation_time(&mut self, now: Instant) {
        let elapsed_s = now.saturating_duration_since(self.start_time).as_secs_f64();
        if elapsed_s > self.params.max_operation_time_s {
            self.raise(
                ViolationKind::OperationTimeExceeded,
                Severity::Warning,
                format!("Operating continuously for {:.0} s", elapsed_s),
                elapsed_s,
                now,
            );
        }
    }

    // ---- ESCALATION ----

    fn raise(
        &mut self,
        kind: ViolationKind,
        severity: Severity,
        description: String,
        value: f64,
        now: Instant,
    ) {
        match severity {
            Severity::Warning => warn!("Safety violation: {}", description),
            Severity::Critical => error!("Safety violation: {}", description),
        }

        self.violations.push(SafetyViolation {
            timestamp: now,
            time_s: util::session::get_elapsed_seconds(),
            kind,
            severity,
            description,
            value,
        });
    }

    /// Stop the vehicle immediately. The halt flag is set before the event goes out.
    fn forced_stop(&mut self, reason: ViolationKind) {
        self.halt.store(true, Ordering::SeqCst);
        self.emit(&SafetyEvent::ForcedStop { reason });
    }

    /// Latch an emergency stop. Only `reset_emergency` clears it.
    fn emergency_stop(&mut self, reason: ViolationKind) {
        self.halt.store(true, Ordering::SeqCst);

        if !self.emergency_active {
            error!("EMERGENCY STOP: {:?}", reason);
            self.emergency_active = true;
            self.emit(&SafetyEvent::EmergencyStop { reason });
        }
    }

    /// Aggregate the trailing violation window into the safety state.
    ///
    /// Upward transitions take effect immediately. Downward transitions relax one level per
    /// evaluation as the window drains, and `Emergency` never relaxes on its own.
    fn aggregate(&mut self, now: Instant) -> SafetyState {
        // The log is raised in time order, so expired violations form a prefix and the window
        // start only ever moves forwards
        if let Some(cutoff) =
            now.checked_sub(Duration::from_secs_f64(self.params.violation_window_s))
        {
            while self.window_start < self.violations.len()
                && self.violations[self.window_start].timestamp < cutoff
            {
                self.window_start += 1;
            }
        }

        let mut warnings = 0usize;
        let mut criticals = 0usize;
        for v in &self.violations[self.window_start..] {
            match v.severity {
                Severity::Warning => warnings += 1,
                Severity::Critical => criticals += 1,
            }
        }

        let target = if self.emergency_active {
            SafetyState::Emergency
        } else if criticals > 0 {
            SafetyState::Critical
        } else if warnings > self.params.warning_count_threshold {
            SafetyState::Warning
        } else {
            SafetyState::Normal
        };

        let next = if self.state == SafetyState::Emergency {
            SafetyState::Emergency
        } else if target > self.state {
            target
        } else if target < self.state {
            step_down(self.state)
        } else {
            self.state
        };

        if next != self.state {
            warn!("Safety state {:?} -> {:?}", self.state, next);
            let from = self.state;
            self.state = next;
            self.emit(&SafetyEvent::StateChanged { from, to: next });
        }

        self.state
    }

    fn emit(&self, event: &SafetyEvent) {
        for listener in &self.listeners {
            listener(event);
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn step_down(state: SafetyState) -> SafetyState {
    match state {
        SafetyState::Emergency => SafetyState::Critical,
        SafetyState::Critical => SafetyState::Warning,
        SafetyState::Warning | SafetyState::Normal => SafetyState::Normal,
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::Point2;
    use std::sync::Mutex;

    fn monitor() -> (SafetyMonitor, Arc<AtomicBool>, Arc<Mutex<Vec<SafetyEvent>>>) {
        let halt = Arc::new(AtomicBool::new(false));
        let mut mon = SafetyMonitor::new(SafetyParams::default(), halt.clone());

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        mon.add_listener(move |e| sink.lock().unwrap().push(e.clone()));

        (mon, halt, events)
    }

    fn nominal(now: Instant) -> Telemetry {
        Telemetry {
            timestamp: now,
            speed_ms: Some(1.0),
            temperature_c: Some(40.0),
            battery_v: Some(12.0),
            roll_deg: Some(2.0),
            pitch_deg: Some(3.0),
            obstacle_distance_cm: Some(500.0),
        }
    }

    #[test]
    fn test_nominal_is_normal() {
        let (mut mon, halt, _) = monitor();
        let now = Instant::now();

        let state = mon.evaluate(Some(&nominal(now)), &Pose::default(), now);

        assert_eq!(state, SafetyState::Normal);
        assert!(!halt.load(Ordering::SeqCst));
        assert!(mon.violations().is_empty());
    }

    #[test]
    fn test_obstacle_at_half_threshold_forces_stop() {
        let (mut mon, halt, events) = monitor();
        let now = Instant::now();

        // Threshold 30, reading exactly at half
        let mut tm = nominal(now);
        tm.obstacle_distance_cm = Some(15.0);

        let state = mon.evaluate(Some(&tm), &Pose::default(), now);

        assert_eq!(state, SafetyState::Critical);
        assert!(halt.load(Ordering::SeqCst));
        assert!(events.lock().unwrap().iter().any(|e| matches!(
            e,
            SafetyEvent::ForcedStop {
                reason: ViolationKind::ObstacleTooClose
            }
        )));
    }

    #[test]
    fn test_obstacle_at_third_threshold_is_emergency() {
        let (mut mon, halt, _) = monitor();
        let now = Instant::now();

        let mut tm = nominal(now);
        tm.obstacle_distance_cm = Some(9.0);

        let state = mon.evaluate(Some(&tm), &Pose::default(), now);

        assert_eq!(state, SafetyState::Emergency);
        assert!(halt.load(Ordering::SeqCst));
        assert!(mon.is_emergency_stopped());
    }

    #[test]
    fn test_emergency_sticky_until_reset() {
        let (mut mon, halt, _) = monitor();
        let now = Instant::now();

        let mut tm = nominal(now);
        tm.temperature_c = Some(100.0);
        assert_eq!(
            mon.evaluate(Some(&tm), &Pose::default(), now),
            SafetyState::Emergency
        );

        // Clean telemetry well outside the violation window does not clear it
        let later = now + Duration::from_secs(120);
        let state = mon.evaluate(Some(&nominal(later)), &Pose::default(), later);
        assert_eq!(state, SafetyState::Emergency);
        assert!(halt.load(Ordering::SeqCst));

        mon.reset_emergency();
        assert_eq!(mon.state(), SafetyState::Normal);
        assert!(!halt.load(Ordering::SeqCst));
    }

    #[test]
    fn test_battery_return_home_triggers_once() {
        let (mut mon, _, events) = monitor();
        let now = Instant::now();

        for i in 0..5 {
            let t = now + Duration::from_secs(i);
            let mut tm = nominal(t);
            tm.battery_v = Some(9.0);
            mon.evaluate(Some(&tm), &Pose::default(), t);
        }

        let count = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == SafetyEvent::ReturnHome)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_warning_aggregation_and_decay() {
        let (mut mon, _, _) = monitor();
        let now = Instant::now();

        // A mildly low battery raises one warning per evaluation
        for i in 0..3 {
            let t = now + Duration::from_secs(i);
            let mut tm = nominal(t);
            tm.battery_v = Some(10.2);
            assert_eq!(
                mon.evaluate(Some(&tm), &Pose::default(), t),
                SafetyState::Normal
            );
        }

        // The fourth pushes the window over the threshold
        let t = now + Duration::from_secs(3);
        let mut tm = nominal(t);
        tm.battery_v = Some(10.2);
        assert_eq!(mon.evaluate(Some(&tm), &Pose::default(), t), SafetyState::Warning);

        // Once the window drains the state relaxes
        let later = now + Duration::from_secs(120);
        assert_eq!(
            mon.evaluate(Some(&nominal(later)), &Pose::default(), later),
            SafetyState::Normal
        );
    }

    #[test]
    fn test_critical_steps_down_through_warning() {
        let (mut mon, _, _) = monitor();
        let now = Instant::now();

        let mut tm = nominal(now);
        tm.speed_ms = Some(5.0);
        assert_eq!(
            mon.evaluate(Some(&tm), &Pose::default(), now),
            SafetyState::Critical
        );

        // After the window drains the state relaxes one level per evaluation
        let later = now + Duration::from_secs(120);
        assert_eq!(
            mon.evaluate(Some(&nominal(later)), &Pose::default(), later),
            SafetyState::Warning
        );
        let later = later + Duration::from_secs(1);
        assert_eq!(
            mon.evaluate(Some(&nominal(later)), &Pose::default(), later),
            SafetyState::Normal
        );
    }

    #[test]
    fn test_comms_loss_escalates() {
        let (mut mon, halt, _) = monitor();
        let now = Instant::now();

        mon.evaluate(Some(&nominal(now)), &Pose::default(), now);

        // Six seconds of silence is critical
        let state = mon.evaluate(None, &Pose::default(), now + Duration::from_secs(6));
        assert_eq!(state, SafetyState::Critical);
        assert!(!mon.is_emergency_stopped());

        // Eleven seconds latches an emergency stop
        let state = mon.evaluate(None, &Pose::default(), now + Duration::from_secs(11));
        assert_eq!(state, SafetyState::Emergency);
        assert!(halt.load(Ordering::SeqCst));
    }

    #[test]
    fn test_zone_checks() {
        let halt = Arc::new(AtomicBool::new(false));
        let mut mon = SafetyMonitor::new(
            SafetyParams {
                safe_zones: vec![Zone::new(
                    "site",
                    Point2::new(0.0, 0.0),
                    Point2::new(100.0, 100.0),
                )],
                restricted_zones: vec![Zone::new(
                    "blast_area",
                    Point2::new(40.0, 40.0),
                    Point2::new(60.0, 60.0),
                )],
                ..Default::default()
            },
            halt.clone(),
        );

        let now = Instant::now();

        // Outside the safe zone is only a warning
        let pose = Pose::new(Point2::new(150.0, 50.0), 0.0);
        mon.evaluate(Some(&nominal(now)), &pose, now);
        assert!(mon
            .violations()
            .iter()
            .any(|v| v.kind == ViolationKind::OutsideSafeZone));
        assert!(!halt.load(Ordering::SeqCst));

        // Entering a restricted zone forces a stop
        let pose = Pose::new(Point2::new(50.0, 50.0), 0.0);
        let state = mon.evaluate(Some(&nominal(now)), &pose, now);
        assert_eq!(state, SafetyState::Critical);
        assert!(halt.load(Ordering::SeqCst));
    }

    #[test]
    fn test_slope_tiers() {
        let (mut mon, _, _) = monitor();
        let now = Instant::now();

        // Combined slope just over the 25 degree limit
        let mut tm = nominal(now);
        tm.roll_deg = Some(20.0);
        tm.pitch_deg = Some(20.0);
        mon.evaluate(Some(&tm), &Pose::default(), now);

        let v = mon
            .violations()
            .iter()
            .find(|v| v.kind == ViolationKind::SlopeTooSteep)
            .unwrap();
        assert_eq!(v.severity, Severity::Warning);

        // Past twice the limit latches an emergency stop
        let mut tm = nominal(now);
        tm.roll_deg = Some(40.0);
        tm.pitch_deg = Some(40.0);
        assert_eq!(
            mon.evaluate(Some(&tm), &Pose::default(), now),
            SafetyState::Emergency
        );
    }

    #[test]
    fn test_missing_readings_skip_checks() {
        let (mut mon, _, _) = monitor();
        let now = Instant::now();

        let state = mon.evaluate(Some(&Telemetry::empty(now)), &Pose::default(), now);

        assert_eq!(state, SafetyState::Normal);
        assert!(mon.violations().is_empty());
    }

    #[test]
    fn test_window_advances_but_log_is_kept() {
        let (mut mon, _, _) = monitor();
        let now = Instant::now();

        // Four warnings push the window over the threshold
        for i in 0..4 {
            let t = now + Duration::from_secs(i);
            let mut tm = nominal(t);
            tm.battery_v = Some(10.2);
            mon.evaluate(Some(&tm), &Pose::default(), t);
        }
        assert_eq!(mon.state(), SafetyState::Warning);

        // Once those expire the state relaxes and the expired prefix is no longer counted
        let later = now + Duration::from_secs(120);
        assert_eq!(
            mon.evaluate(Some(&nominal(later)), &Pose::default(), later),
            SafetyState::Normal
        );
        assert_eq!(mon.window_start, 4);

        // Fresh warnings after the advance still aggregate correctly
        for i in 0..4 {
            let t = later + Duration::from_secs(i);
            let mut tm = nominal(t);
            tm.battery_v = Some(10.2);
            mon.evaluate(Some(&tm), &Pose::default(), t);
        }
        assert_eq!(mon.state(), SafetyState::Warning);

        // The full log remains for audit
        assert_eq!(mon.violations().len(), 8);
    }

    #[test]
    fn test_report_written_as_json() {
        let (mut mon, _, _) = monitor();
        let now = Instant::now();

        let mut tm = nominal(now);
        tm.speed_ms = Some(5.0);
        mon.evaluate(Some(&tm), &Pose::default(), now);

        let path = std::env::temp_dir().join(format!(
            "safety_report_test_{}.json",
            std::process::id()
        ));
        mon.write_report(&path).unwrap();

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(report["state"], "Critical");
        assert_eq!(report["num_violations"], 1);
        assert_eq!(report["violations"][0]["kind"], "SpeedExceeded");
        assert!(report["generated"].is_string());
    }
}

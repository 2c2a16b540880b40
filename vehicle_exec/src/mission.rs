//! # Mission management
//!
//! Holds the waypoint queue and decides where the vehicle should go next. Waypoints are served
//! highest priority first, creation order among equals. When the queue runs dry the vehicle is
//! sent back to the dock, which is a protected waypoint that can never be removed.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::{info, warn};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// What kind of work happens at a waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaypointCategory {
    /// A mining site, arrival starts an extraction cycle.
    Mining,

    /// The charging dock, the target of return-home.
    Dock,

    /// A plain navigation target.
    Generic,
}

/// Lifecycle state of a waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaypointStatus {
    Pending,
    Active,
    Completed,
}

/// Events emitted as the mission progresses, fanned out to registered listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum MissionEvent {
    /// The given waypoint has been reached and marked completed.
    WaypointCompleted(u32),

    /// A mining waypoint has been reached, an extraction cycle should begin.
    MiningStarted(u32),

    /// The vehicle is heading back to the dock.
    ReturnHomeStarted,

    /// The vehicle has docked and the mission is over.
    MissionComplete,
}

#[derive(Debug, Error)]
pub enum MissionError {
    #[error("No waypoint with id {0} exists")]
    UnknownWaypoint(u32),

    #[error("The dock waypoint cannot be removed")]
    DockProtected,

    #[error("A waypoint with id {0} already exists")]
    DuplicateId(u32),

    #[error("The mission has no dock waypoint")]
    NoDock,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A single mission waypoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Waypoint {
    pub id: u32,

    pub name: String,

    /// Position in the world frame
    pub position_m: Point2<f64>,

    pub category: WaypointCategory,

    /// Higher priorities are served first
    pub priority: i32,

    #[serde(default = "default_status")]
    pub status: WaypointStatus,
}

fn default_status() -> WaypointStatus {
    WaypointStatus::Pending
}

/// Mission manager.
pub struct MissionManager {
    /// All waypoints in creation order
    waypoints: Vec<Waypoint>,

    /// Id of the waypoint currently being driven to
    active_id: Option<u32>,

    /// Set once the vehicle has been told to head back to the dock
    returning_home: bool,

    /// Cleared when the vehicle docks at the end of the mission
    mission_active: bool,

    listeners: Vec<Box<dyn Fn(&MissionEvent) + Send>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MissionManager {
    pub fn new() -> Self {
        Self {
            waypoints: Vec::new(),
            active_id: None,
            returning_home: false,
            mission_active: false,
            listeners: Vec::new(),
        }
    }

    /// Register a listener for mission events.
    pub fn add_listener<F: Fn(&MissionEvent) + Send + 'static>(&mut self, listener: F) {
        self.listeners.push(Box::new(listener));
    }

    /// Load the mission's waypoints and activate it. There must be exactly one dock.
    pub fn load(&mut self, waypoints: Vec<Waypoint>) -> Result<(), MissionError> {
        if !waypoints
            .iter()
            .any(|w| w.category == WaypointCategory::Dock)
        {
            return Err(MissionError::NoDock);
        }

        for (i, w) in waypoints.iter().enumerate() {
            if waypoints[..i].iter().any(|o| o.id == w.id) {
                return Err(MissionError::DuplicateId(w.id));
            }
        }

        info!("Mission loaded with {} waypoints", waypoints.len());

        self.waypoints = waypoints;
        self.active_id = None;
        self.returning_home = false;
        self.mission_active = true;

        Ok(())
    }

    /// Add a waypoint to the running mission.
    pub fn add_waypoint(&mut self, waypoint: Waypoint) -> Result<(), MissionError> {
        if self.waypoints.iter().any(|w| w.id == waypoint.id) {
            return Err(MissionError::DuplicateId(waypoint.id));
        }

        self.waypoints.push(waypoint);
        Ok(())
    }

    /// Remove a pending waypoint. The dock is protected.
    pub fn remove_waypoint(&mut self, id: u32) -> Result<(), MissionError> {
        let index = self
            .waypoints
            .iter()
            .position(|w| w.id == id)
            .ok_or(MissionError::UnknownWaypoint(id))?;

        if self.waypoints[index].category == WaypointCategory::Dock {
            return Err(MissionError::DockProtected);
        }

        if self.active_id == Some(id) {
            self.active_id = None;
        }

        self.waypoints.remove(index);
        Ok(())
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn is_active(&self) -> bool {
        self.mission_active
    }

    pub fn is_returning_home(&self) -> bool {
        self.returning_home
    }

    pub fn active_waypoint(&self) -> Option<&Waypoint> {
        self.active_id
            .and_then(|id| self.waypoints.iter().find(|w| w.id == id))
    }

    /// Pick the next waypoint to drive to and mark it active.
    ///
    /// Returns `None` when there is nothing left to do: either the mission is over, or the
    /// vehicle is already heading somewhere.
    pub fn next_target(&mut self) -> Option<Waypoint> {
        if !self.mission_active || self.active_id.is_some() {
            return None;
        }

        let target_id = if self.returning_home {
            self.dock_id()?
        } else {
            // Highest priority first, creation order among equals, docks excluded from normal
            // rotation
            let mut best: Option<(usize, i32)> = None;
            for (i, w) in self.waypoints.iter().enumerate() {
                if w.status != WaypointStatus::Pending || w.category == WaypointCategory::Dock {
                    continue;
                }
                match best {
                    Some((_, p)) if w.priority <= p => (),
                    _ => best = Some((i, w.priority)),
                }
            }

            match best {
                Some((i, _)) => self.waypoints[i].id,
                None => {
                    // Queue exhausted, head home
                    self.request_return_home();
                    self.dock_id()?
                }
            }
        };

        let wp = self.waypoints.iter_mut().find(|w| w.id == target_id)?;
        wp.status = WaypointStatus::Active;
        self.active_id = Some(target_id);

        Some(wp.clone())
    }

    /// Record arrival at the given waypoint.
    pub fn arrived(&mut self, id: u32) -> Result<(), MissionError> {
        let wp = self
            .waypoints
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or(MissionError::UnknownWaypoint(id))?;

        wp.status = WaypointStatus::Completed;
        let category = wp.category;
        let name = wp.name.clone();

        if self.active_id == Some(id) {
            self.active_id = None;
        }

        info!("Arrived at waypoint {} ({})", id, name);
        self.emit(&MissionEvent::WaypointCompleted(id));

        match category {
            WaypointCategory::Mining => self.emit(&MissionEvent::MiningStarted(id)),
            WaypointCategory::Dock => {
                if self.returning_home {
                    info!("Docked, mission complete");
                    self.returning_home = false;
                    self.mission_active = false;
                    self.emit(&MissionEvent::MissionComplete);
                }
            }
            WaypointCategory::Generic => (),
        }

        Ok(())
    }

    /// Send the vehicle back to the dock. Idempotent: repeated requests while already returning
    /// produce no further events.
    pub fn request_return_home(&mut self) {
        if self.returning_home || !self.mission_active {
            return;
        }

        if self.dock_id().is_none() {
            warn!("Return home requested but the mission has no dock");
            return;
        }

        info!("Returning home");
        self.returning_home = true;

        // Abandon the current target so the dock is picked next
        if let Some(id) = self.active_id.take() {
            if let Some(wp) = self.waypoints.iter_mut().find(|w| w.id == id) {
                if wp.status == WaypointStatus::Active {
                    wp.status = WaypointStatus::Pending;
                }
            }
        }

        self.emit(&MissionEvent::ReturnHomeStarted);
    }

    fn dock_id(&self) -> Option<u32> {
        self.waypoints
            .iter()
            .find(|w| w.category == WaypointCategory::Dock)
            .map(|w| w.id)
    }

    fn emit(&self, event: &MissionEvent) {
        for listener in &self.listeners {
            listener(event);
        }
    }
}

impl Default for MissionManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn wp(id: u32, priority: i32, category: WaypointCategory) -> Waypoint {
        Waypoint {
            id,
            name: format!("wp_{}", id),
            position_m: Point2::new(10.0 * id as f64, 0.0),
            category,
            priority,
            status: WaypointStatus::Pending,
        }
    }

    fn mission() -> (MissionManager, Arc<Mutex<Vec<MissionEvent>>>) {
        let mut mgr = MissionManager::new();
        let events = Arc::new(Mutex::new(Vec::new()));

        let sink = events.clone();
        mgr.add_listener(move |e| sink.lock().unwrap().push(e.clone()));

        (mgr, events)
    }

    #[test]
    fn test_priority_then_fifo_order() {
        let (mut mgr, _) = mission();
        mgr.load(vec![
            wp(1, 0, WaypointCategory::Dock),
            wp(2, 3, WaypointCategory::Generic),
            wp(3, 1, WaypointCategory::Generic),
            wp(4, 2, WaypointCategory::Generic),
            // Same priority as 4, created later
            wp(5, 2, WaypointCategory::Generic),
        ])
        .unwrap();

        let mut served = Vec::new();
        while let Some(target) = mgr.next_target() {
            served.push(target.id);
            mgr.arrived(target.id).unwrap();
            if !mgr.is_active() {
                break;
            }
        }

        // Priorities 3, 2, 2, 1 then the dock
        assert_eq!(served, vec![2, 4, 5, 3, 1]);
        assert!(!mgr.is_active());
    }

    #[test]
    fn test_mining_event_on_arrival() {
        let (mut mgr, events) = mission();
        mgr.load(vec![
            wp(1, 0, WaypointCategory::Dock),
            wp(2, 1, WaypointCategory::Mining),
        ])
        .unwrap();

        let target = mgr.next_target().unwrap();
        assert_eq!(target.id, 2);
        mgr.arrived(2).unwrap();

        let events = events.lock().unwrap();
        assert!(events.contains(&MissionEvent::WaypointCompleted(2)));
        assert!(events.contains(&MissionEvent::MiningStarted(2)));
    }

    #[test]
    fn test_auto_return_home_when_exhausted() {
        let (mut mgr, events) = mission();
        mgr.load(vec![
            wp(1, 0, WaypointCategory::Dock),
            wp(2, 1, WaypointCategory::Generic),
        ])
        .unwrap();

        let target = mgr.next_target().unwrap();
        mgr.arrived(target.id).unwrap();

        // Queue is now empty, the next target is the dock
        let dock = mgr.next_target().unwrap();
        assert_eq!(dock.id, 1);
        assert!(mgr.is_returning_home());
        assert!(events
            .lock()
            .unwrap()
            .contains(&MissionEvent::ReturnHomeStarted));

        mgr.arrived(1).unwrap();
        assert!(!mgr.is_active());
        assert!(events
            .lock()
            .unwrap()
            .contains(&MissionEvent::MissionComplete));
    }

    #[test]
    fn test_return_home_idempotent() {
        let (mut mgr, events) = mission();
        mgr.load(vec![
            wp(1, 0, WaypointCategory::Dock),
            wp(2, 1, WaypointCategory::Generic),
        ])
        .unwrap();

        mgr.request_return_home();
        mgr.request_return_home();
        mgr.request_return_home();

        let count = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == MissionEvent::ReturnHomeStarted)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_dock_protected() {
        let (mut mgr, _) = mission();
        mgr.load(vec![
            wp(1, 0, WaypointCategory::Dock),
            wp(2, 1, WaypointCategory::Generic),
        ])
        .unwrap();

        assert!(matches!(
            mgr.remove_waypoint(1),
            Err(MissionError::DockProtected)
        ));
        assert!(mgr.remove_waypoint(2).is_ok());
        assert!(matches!(
            mgr.remove_waypoint(99),
            Err(MissionError::UnknownWaypoint(99))
        ));
    }

    #[test]
    fn test_load_requires_dock_and_unique_ids() {
        let (mut mgr, _) = mission();

        assert!(matches!(
            mgr.load(vec![wp(2, 1, WaypointCategory::Generic)]),
            Err(MissionError::NoDock)
        ));

        assert!(matches!(
            mgr.load(vec![
                wp(1, 0, WaypointCategory::Dock),
                wp(1, 1, WaypointCategory::Generic)
            ]),
            Err(MissionError::DuplicateId(1))
        ));
    }

    #[test]
    fn test_return_home_abandons_active_target() {
        let (mut mgr, _) = mission();
        mgr.load(vec![
            wp(1, 0, WaypointCategory::Dock),
            wp(2, 1, WaypointCategory::Generic),
        ])
        .unwrap();

        let target = mgr.next_target().unwrap();
        assert_eq!(target.id, 2);

        mgr.request_return_home();
        let dock = mgr.next_target().unwrap();
        assert_eq!(dock.id, 1);

        // The abandoned waypoint is pending again, not lost
        assert_eq!(
            mgr.waypoints()
                .iter()
                .find(|w| w.id == 2)
                .unwrap()
                .status,
            WaypointStatus::Pending
        );
    }
}

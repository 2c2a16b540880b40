//! Main vehicle-side executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise all modules
//!     - Safety loop (2 Hz, background thread):
//!         - Telemetry acquisition
//!         - Limit checks and state escalation
//!     - Main loop (5 Hz):
//!         - Obstacle sensing and map ingestion
//!         - Mission target selection and plan requests
//!         - Path following
//!         - Pose integration
//!         - Motor driving

// ---------------------------------------------------------------------------
// USE MODULES FROM LIBRARY
// ---------------------------------------------------------------------------

use vehicle_lib::{
    cmd::{MnvrAction, MotorCommand},
    data_store::{DataStore, SafeModeCause},
    follower::{FollowerMode, PathFollower, PathFollowerParams},
    loc::{Pose, PoseTracker, PoseTrackerParams},
    map::{CostMap, CostMapParams},
    mission::{MissionEvent, MissionManager, Waypoint, WaypointCategory},
    motor::{MotorInterface, SimMotors},
    nav::PathPlannerParams,
    nav_mgr::{NavMgr, PlanOutcome},
    safety::{
        SafetyEvent, SafetyMonitor, SafetyParams, SafetyState, SimTelemetrySource, TelemetrySource,
    },
    sim::{SimEnvironment, SimParams},
};

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{info, warn};
use serde::Deserialize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::channel,
    Arc, RwLock,
};
use std::thread;
use std::time::{Duration, Instant};

// Internal
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Target period of one control cycle.
const CYCLE_PERIOD_S: f64 = 0.2;

/// Number of control cycles per second
const CYCLE_FREQUENCY_HZ: f64 = 1.0 / CYCLE_PERIOD_S;

/// Target period of one safety cycle.
const SAFETY_PERIOD_S: f64 = 0.5;

/// Minimum gap between successive plan requests for the same target.
const PLAN_RETRY_PERIOD_S: f64 = 1.0;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Mission parameters, the waypoint set loaded at boot.
#[derive(Deserialize)]
struct MissionParams {
    waypoints: Vec<Waypoint>,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("vehicle_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Trace, &session).wrap_err("Failed to initialise logging")?;

    info!("SmartRover Vehicle Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let cost_map_params: CostMapParams =
        util::params::load("cost_map.toml").wrap_err("Could not load cost map params")?;
    let planner_params: PathPlannerParams =
        util::params::load("path_planner.toml").wrap_err("Could not load path planner params")?;
    let follower_params: PathFollowerParams =
        util::params::load("follower.toml").wrap_err("Could not load follower params")?;
    let tracker_params: PoseTrackerParams =
        util::params::load("pose_tracker.toml").wrap_err("Could not load pose tracker params")?;
    let safety_params: SafetyParams =
        util::params::load("safety.toml").wrap_err("Could not load safety params")?;
    let mission_params: MissionParams =
        util::params::load("mission.toml").wrap_err("Could not load mission params")?;
    let sim_params: SimParams =
        util::params::load("sim.toml").wrap_err("Could not load sim params")?;

    info!("Exec parameters loaded");

    // ---- INITIALISE DATASTORE ----

    info!("Initialising modules...");

    let mut ds = DataStore::default();

    // ---- INITIALISE MODULES ----

    // The vehicle boots at the dock
    let dock_position = mission_params
        .waypoints
        .iter()
        .find(|w| matches!(w.category, WaypointCategory::Dock))
        .map(|w| w.position_m)
        .ok_or_else(|| eyre!("The mission has no dock waypoint"))?;

    let max_speed_ms = tracker_params.max_speed_ms;
    let mut tracker = PoseTracker::new(tracker_params, Pose::new(dock_position, 0.0));
    ds.pose = *tracker.pose();

    let mut follower = PathFollower::new(follower_params);

    let cost_map = CostMap::new(cost_map_params).wrap_err("Failed to create the cost map")?;
    let mut nav_mgr =
        NavMgr::new(planner_params, cost_map).wrap_err("Failed to start the navigation manager")?;
    info!("NavMgr init complete");

    // Shared with the safety loop, which reads obstacle proximity from it
    let sim_env = Arc::new(SimEnvironment::new(sim_params));

    let mut mission = MissionManager::new();
    let (mission_tx, mission_rx) = channel();
    mission.add_listener(move |event| {
        let _ = mission_tx.send(event.clone());
    });
    mission
        .load(mission_params.waypoints)
        .wrap_err("Failed to load the mission")?;
    info!("Mission loaded with {} waypoints", mission.waypoints().len());

    let mut motors = SimMotors::new();

    info!("Module initialisation complete\n");

    // ---- INITIALISE SAFETY LOOP ----

    let halt = Arc::new(AtomicBool::new(false));
    let shutdown = Arc::new(AtomicBool::new(false));
    let shared_pose = Arc::new(RwLock::new(ds.pose));
    let shared_safety_state = Arc::new(RwLock::new(SafetyState::Normal));

    let (safety_tx, safety_rx) = channel();

    let safety_jh = {
        let halt = halt.clone();
        let shutdown = shutdown.clone();
        let shared_pose = shared_pose.clone();
        let shared_safety_state = shared_safety_state.clone();
        let sim_env = sim_env.clone();
        let report_path = session.session_root.join("safety_report.json");

        thread::Builder::new()
            .name("safety_mon".into())
            .spawn(move || {
                let mut monitor = SafetyMonitor::new(safety_params, halt);
                monitor.add_listener(move |event| {
                    let _ = safety_tx.send(event.clone());
                });

                let mut telemetry_source = SimTelemetrySource::new(12.6, 0.0);

                while !shutdown.load(Ordering::SeqCst) {
                    let pose = match shared_pose.read() {
                        Ok(p) => *p,
                        Err(_) => break,
                    };

                    // The proximity reading comes from the same obstacle field the vehicle
                    // is driving through
                    let mut telemetry = telemetry_source.poll();
                    if let Some(ref mut tm) = telemetry {
                        tm.obstacle_distance_cm = sim_env.nearest_obstacle_cm(&pose);
                    }

                    let state = monitor.evaluate(telemetry.as_ref(), &pose, Instant::now());

                    match shared_safety_state.write() {
                        Ok(mut s) => *s = state,
                        Err(_) => break,
                    }

                    thread::sleep(Duration::from_secs_f64(SAFETY_PERIOD_S));
                }

                if let Err(e) = monitor.write_report(&report_path) {
                    warn!("Failed to write the safety report: {}", e);
                }
            })
            .wrap_err("Failed to start the safety loop")?
    };
    info!("Safety loop started");

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let mut current_target: Option<Waypoint> = None;
    let mut last_plan_attempt: Option<Instant> = None;
    let mut mission_complete = false;

    'main: loop {
        // Get cycle start time
        let cycle_start_instant = Instant::now();

        // Clear items that need wiping at the start of the cycle
        ds.cycle_start(CYCLE_FREQUENCY_HZ);

        // ---- DATA INPUT ----

        ds.pose = *tracker.pose();
        *shared_pose
            .write()
            .map_err(|_| eyre!("Pose lock poisoned"))? = ds.pose;

        ds.safety_state = *shared_safety_state
            .read()
            .map_err(|_| eyre!("Safety state lock poisoned"))?;

        // Sight obstacles and fold them into the cost map
        let observations = sim_env.observe(&ds.pose, cycle_start_instant);
        if !observations.is_empty() {
            nav_mgr
                .ingest_observations(&observations, cycle_start_instant)
                .wrap_err("Failed to ingest obstacle observations")?;
        }

        // ---- SAFETY EVENT PROCESSING ----

        while let Ok(event) = safety_rx.try_recv() {
            match event {
                SafetyEvent::ForcedStop { reason } => {
                    warn!("Forced stop: {:?}", reason);
                    nav_mgr.abort().wrap_err("Failed to abort planning")?;
                    follower.clear();
                    ds.pending_plan = None;
                }
                SafetyEvent::EmergencyStop { reason } => {
                    warn!("Emergency stop: {:?}", reason);
                    nav_mgr.abort().wrap_err("Failed to abort planning")?;
                    follower.clear();
                    ds.pending_plan = None;
                    current_target = None;
                }
                SafetyEvent::ReturnHome => {
                    mission.request_return_home();
                    nav_mgr.abort().wrap_err("Failed to abort planning")?;
                    follower.clear();
                    ds.pending_plan = None;
                    current_target = None;
                }
                SafetyEvent::StateChanged { from, to } => {
                    info!("Safety state changed {:?} -> {:?}", from, to);
                }
            }
        }

        // ---- SAFE MODE MANAGEMENT ----

        if halt.load(Ordering::SeqCst) {
            // A halt takes precedence over a planning-failure safe mode
            ds.make_unsafe(SafeModeCause::PlanningFailed).ok();
            ds.make_safe(SafeModeCause::SafetyHalt);
        } else {
            ds.make_unsafe(SafeModeCause::SafetyHalt).ok();
        }

        // ---- HOUSEKEEPING ----

        if ds.is_1_hz_cycle {
            info!(
                "Cycle {}: pose ({:.1}, {:.1}) m hdg {:.2} rad, safety {:?}, target {:?}",
                ds.num_cycles,
                ds.pose.position_m.x,
                ds.pose.position_m.y,
                ds.pose.heading_rad,
                ds.safety_state,
                ds.target_waypoint,
            );
        }

        // ---- AUTONOMY PROCESSING ----

        // Safe mode caused by a failed plan stops the motors but keeps the planner retrying,
        // so the vehicle can recover once the map changes
        let autonomy_permitted =
            !ds.safe || ds.safe_cause == Some(SafeModeCause::PlanningFailed);

        if autonomy_permitted && mission.is_active() {
            // Pick the next target once the previous one is done
            if current_target.is_none() {
                current_target = mission.next_target();
                if let Some(ref wp) = current_target {
                    info!("New target waypoint {} ({})", wp.id, wp.name);
                    last_plan_attempt = None;
                }
            }
            ds.target_waypoint = current_target.as_ref().map(|w| w.id);

            // Request a plan towards the target if we aren't already driving one
            if let Some(ref wp) = current_target {
                let need_plan = ds.pending_plan.is_none()
                    && !matches!(follower.mode(), FollowerMode::Following);
                let retry_ok = match last_plan_attempt {
                    Some(t) => {
                        cycle_start_instant.saturating_duration_since(t).as_secs_f64()
                            >= PLAN_RETRY_PERIOD_S
                    }
                    None => true,
                };

                if need_plan && retry_ok {
                    let id = nav_mgr
                        .request_plan(ds.pose.position_m, wp.position_m)
                        .wrap_err("Failed to request a plan")?;
                    ds.pending_plan = Some(id);
                    last_plan_attempt = Some(cycle_start_instant);
                }
            }

            // Collect any plan outcome
            match nav_mgr.poll().wrap_err("Planning worker failed")? {
                Some(PlanOutcome::Installed { request_id, path }) => {
                    info!(
                        "Plan {} installed with {} points over {:.1} m",
                        request_id,
                        path.num_points(),
                        path.length_m()
                    );
                    ds.make_unsafe(SafeModeCause::PlanningFailed).ok();
                    follower.set_path(path);
                    ds.pending_plan = None;
                }
                Some(PlanOutcome::Failed { request_id, error }) => {
                    warn!("Plan {} failed: {}", request_id, error);
                    ds.make_safe(SafeModeCause::PlanningFailed);
                    ds.pending_plan = None;
                }
                None => (),
            }
        }

        // ---- CONTROL ALGORITHM PROCESSING ----

        if ds.safe {
            ds.motor_cmd = MotorCommand::stop();
        } else if matches!(follower.mode(), FollowerMode::Following) {
            // Estimate current speed from the previous demand for the lookahead calculation
            let speed_ms = match motors.last_cmd().action {
                MnvrAction::Forward => motors.last_cmd().speed * max_speed_ms,
                _ => 0.0,
            };

            ds.motor_cmd = follower.steer(&ds.pose, speed_ms);
        } else {
            ds.motor_cmd = MotorCommand::stop();
        }

        motors
            .drive(&ds.motor_cmd)
            .wrap_err("Failed to drive the motors")?;
        tracker.integrate(&ds.motor_cmd, CYCLE_PERIOD_S);

        // ---- WAYPOINT ARRIVAL ----

        if matches!(follower.mode(), FollowerMode::Completed) {
            if let Some(wp) = current_target.take() {
                info!("Arrived at waypoint {} ({})", wp.id, wp.name);
                mission
                    .arrived(wp.id)
                    .wrap_err("Failed to mark waypoint arrival")?;
            }
            follower.clear();
            nav_mgr.abort().wrap_err("Failed to clear the driven path")?;
            ds.target_waypoint = None;
        }

        // ---- MISSION EVENT PROCESSING ----

        while let Ok(event) = mission_rx.try_recv() {
            match event {
                MissionEvent::WaypointCompleted(id) => info!("Waypoint {} completed", id),
                MissionEvent::MiningStarted(id) => {
                    info!("Mining extraction cycle started at waypoint {}", id)
                }
                MissionEvent::ReturnHomeStarted => info!("Returning to dock"),
                MissionEvent::MissionComplete => {
                    info!("Mission complete, docked");
                    mission_complete = true;
                }
            }
        }

        if mission_complete {
            motors
                .drive(&MotorCommand::stop())
                .wrap_err("Failed to stop the motors")?;
            break 'main;
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;

        // Get sleep duration
        match Duration::from_secs_f64(CYCLE_PERIOD_S).checked_sub(cycle_dur) {
            Some(d) => {
                ds.num_consec_cycle_overruns = 0;
                thread::sleep(d);
            }
            None => {
                warn!(
                    "Cycle overran by {:.06} s",
                    cycle_dur.as_secs_f64() - CYCLE_PERIOD_S
                );
                ds.num_consec_cycle_overruns += 1;
            }
        }

        // Increment cycle counter
        ds.num_cycles += 1;
    }

    // ---- SHUTDOWN ----

    shutdown.store(true, Ordering::SeqCst);
    safety_jh.join().ok();
    nav_mgr
        .shutdown()
        .wrap_err("Failed to stop the navigation manager")?;

    info!("End of execution");

    Ok(())
}

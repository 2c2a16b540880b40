//! # Navigation manager
//!
//! Owns the cost map, the path planner and the active path, and runs planning on a background
//! worker thread so the control loop is never blocked by a long search.
//!
//! Plan requests are tagged with a monotonically increasing id and the newest request always
//! wins: the worker only installs a result if its id is still the latest one requested, and
//! [`NavMgr::poll`] discards results for superseded requests. Aborting simply advances the
//! latest id so any in-flight result is dropped on arrival.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod worker;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::{info, warn};
use nalgebra::Point2;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{channel, Receiver, RecvError, SendError, Sender, TryRecvError},
        Arc, PoisonError, RwLock,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

// Internal imports
use crate::map::{CostMap, CostMapView, ObstacleObservation};
use crate::nav::{PathPlanner, PathPlannerParams, PlanningError};
use crate::path::Path;

use self::worker::worker_thread;
pub use self::worker::WorkerSignal;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The navigation manager.
pub struct NavMgr {
    shared: Arc<Shared>,

    worker_jh: Option<JoinHandle<Result<(), NavMgrError>>>,

    worker_sender: Sender<WorkerSignal>,
    worker_reciever: Receiver<WorkerSignal>,

    /// Next plan request id to hand out
    next_request_id: u64,
}

/// State shared between the main thread and the planning worker.
struct Shared {
    pub cost_map: RwLock<CostMap>,

    pub path_planner: RwLock<PathPlanner>,

    /// The path the follower should currently be driving
    pub active_path: RwLock<Option<Arc<Path>>>,

    /// Id of the most recently issued plan request. Results for any other id are stale.
    pub latest_request: AtomicU64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Outcome of a plan request, returned by [`NavMgr::poll`].
#[derive(Debug, Clone)]
pub enum PlanOutcome {
    /// The plan succeeded and is now the active path
    Installed { request_id: u64, path: Arc<Path> },

    /// The plan failed
    Failed {
        request_id: u64,
        error: PlanningError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum NavMgrError {
    #[error("Sync primitive is poisoned")]
    PoisonError,

    #[error("Failed to spawn the planning worker: {0}")]
    SpawnError(#[from] std::io::Error),

    #[error("Failed to send signal {0:?} to the planning worker")]
    SendError(WorkerSignal),

    #[error("Failed to receive signal from the planning worker")]
    RecvError,

    #[error("The planning worker has stopped")]
    WorkerStopped,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl NavMgr {
    /// Create a new navigation manager and start its planning worker.
    pub fn new(planner_params: PathPlannerParams, cost_map: CostMap) -> Result<Self, NavMgrError> {
        let shared = Arc::new(Shared {
            cost_map: RwLock::new(cost_map),
            path_planner: RwLock::new(PathPlanner::new(planner_params)),
            active_path: RwLock::new(None),
            latest_request: AtomicU64::new(0),
        });
        let shared_worker = shared.clone();

        let (worker_sender, rx) = channel();
        let (tx, worker_reciever) = channel();

        let worker_jh = thread::Builder::new()
            .name("nav_mgr::worker".into())
            .spawn(move || worker_thread(shared_worker, tx, rx))?;

        Ok(Self {
            shared,
            worker_jh: Some(worker_jh),
            worker_sender,
            worker_reciever,
            next_request_id: 1,
        })
    }

    /// Fold new obstacle observations into the cost map.
    pub fn ingest_observations(
        &self,
        observations: &[ObstacleObservation],
        now: Instant,
    ) -> Result<(), NavMgrError> {
        self.shared.cost_map.write()?.ingest(observations, now);
        Ok(())
    }

    /// A snapshot of the current cost map, safe to query without holding any lock.
    pub fn map_snapshot(&self) -> Result<CostMapView, NavMgrError> {
        Ok(self.shared.cost_map.read()?.snapshot())
    }

    /// Request a plan from `start` to `goal`, superseding any request still in flight.
    ///
    /// Returns the request id, which [`NavMgr::poll`] reports the outcome against.
    pub fn request_plan(
        &mut self,
        start: Point2<f64>,
        goal: Point2<f64>,
    ) -> Result<u64, NavMgrError> {
        let request_id = self.alloc_request_id();

        info!(
            "Plan request {} from {:?} towards {:?}",
            request_id, start, goal
        );

        self.worker_sender.send(WorkerSignal::Plan {
            request_id,
            start,
            goal,
        })?;

        Ok(request_id)
    }

    /// Drop the active path and discard any plan result still in flight.
    pub fn abort(&mut self) -> Result<(), NavMgrError> {
        // Advancing the latest id is enough to make the worker drop its result
        self.alloc_request_id();
        *self.shared.active_path.write()? = None;
        Ok(())
    }

    /// Poll for the outcome of the latest plan request.
    ///
    /// Results for superseded requests are silently discarded, so a returned outcome always
    /// refers to the most recent request whose result has arrived.
    pub fn poll(&mut self) -> Result<Option<PlanOutcome>, NavMgrError> {
        loop {
            let signal = match self.worker_reciever.try_recv() {
                Ok(s) => s,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(NavMgrError::WorkerStopped),
            };

            let latest = self.shared.latest_request.load(Ordering::SeqCst);

            match signal {
                WorkerSignal::Complete(request_id) if request_id == latest => {
                    let path = match *self.shared.active_path.read()? {
                        Some(ref p) => p.clone(),
                        None => continue,
                    };
                    return Ok(Some(PlanOutcome::Installed { request_id, path }));
                }
                WorkerSignal::Error(request_id, error) if request_id == latest => {
                    return Ok(Some(PlanOutcome::Failed { request_id, error }));
                }
                WorkerSignal::Complete(request_id) | WorkerSignal::Error(request_id, _) => {
                    info!("Discarding result for superseded plan request {}", request_id);
                }
                s => warn!("Unexpected signal from worker: {:?}", s),
            }
        }
    }

    /// The path the follower should currently be driving, if any.
    pub fn active_path(&self) -> Result<Option<Arc<Path>>, NavMgrError> {
        Ok(self.shared.active_path.read()?.clone())
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(mut self) -> Result<(), NavMgrError> {
        self.worker_sender.send(WorkerSignal::Stop)?;

        match self.worker_jh.take() {
            Some(jh) => jh.join().map_err(|_| NavMgrError::WorkerStopped)?,
            None => Ok(()),
        }
    }

    fn alloc_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        self.shared.latest_request.store(id, Ordering::SeqCst);
        id
    }
}

impl<G> From<PoisonError<G>> for NavMgrError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}

impl From<SendError<WorkerSignal>> for NavMgrError {
    fn from(e: SendError<WorkerSignal>) -> Self {
        Self::SendError(e.0)
    }
}

impl From<RecvError> for NavMgrError {
    fn from(_: RecvError) -> Self {
        Self::RecvError
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

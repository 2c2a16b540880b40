//! Worker thread which runs path planning without blocking the control loop.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use log::{debug, info};
use nalgebra::Point2;
use std::{
    sync::{
        atomic::Ordering,
        mpsc::{Receiver, Sender, TryRecvError},
        Arc,
    },
    time::Duration,
};

// Internal imports
use crate::nav::PlanningError;

use super::{NavMgrError, Shared};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum WorkerSignal {
    /// The worker should stop
    Stop,

    /// Plan a path between the given positions
    Plan {
        request_id: u64,
        start: Point2<f64>,
        goal: Point2<f64>,
    },

    /// The tagged request completed and its path is now the active path
    Complete(u64),

    /// The tagged request failed
    Error(u64, PlanningError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

pub(super) fn worker_thread(
    shared: Arc<Shared>,
    main_sender: Sender<WorkerSignal>,
    main_reciever: Receiver<WorkerSignal>,
) -> Result<(), NavMgrError> {
    while let Ok(signal) = main_reciever.recv() {
        // Drain the queue so only the newest plan request is served
        let mut signal = signal;
        loop {
            match main_reciever.try_recv() {
                Ok(s) => signal = s,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }

        let (request_id, start, goal) = match signal {
            WorkerSignal::Stop => break,
            WorkerSignal::Plan {
                request_id,
                start,
                goal,
            } => (request_id, start, goal),
            s => {
                debug!("Unexpected signal from main thread: {:?}", s);
                continue;
            }
        };

        if shared.latest_request.load(Ordering::SeqCst) != request_id {
            debug!("Plan request {} superseded before starting", request_id);
            continue;
        }

        // Snapshot the map so the control loop can keep ingesting while we search
        let view = { shared.cost_map.read()?.snapshot() };
        let (planner, timeout) = {
            let planner = shared.path_planner.read()?;
            let timeout = Duration::from_secs_f64(planner.params().deadline_s);
            (planner.clone(), timeout)
        };

        match planner.plan(&view, start, goal, timeout) {
            Ok(path) => {
                // Only install the result if no newer request has been issued since
                if shared.latest_request.load(Ordering::SeqCst) == request_id {
                    *shared.active_path.write()? = Some(Arc::new(path));
                    main_sender.send(WorkerSignal::Complete(request_id))?;
                } else {
                    info!("Dropping superseded plan result {}", request_id);
                }
            }
            Err(e) => {
                main_sender.send(WorkerSignal::Error(request_id, e))?;
            }
        }
    }

    Ok(())
}

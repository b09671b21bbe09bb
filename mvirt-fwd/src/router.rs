//! Router runtime: one control thread plus a pool of packet workers.

use crossbeam_channel::{Sender, bounded};
use tracing::{info, warn};

use crate::config::RouterConfig;
use crate::control::{ControlEvent, ControlHandle, ControlSync};
use crate::error::{FwdError, Result};
use crate::pipeline::ForwardingPipeline;
use crate::worker::{WorkerBackend, WorkerPool, WorkerStats};

/// A running router.
///
/// Dropping it stops the workers and the control thread without waiting for
/// the control thread.
pub struct Router {
    events: Sender<ControlEvent>,
    pipeline: ForwardingPipeline,
    control: ControlHandle,
    workers: WorkerPool,
}

/// Final state returned by [`Router::shutdown`].
pub struct RouterReport {
    /// The writer with the tables as they were at shutdown.
    pub control: ControlSync,
    pub workers: Vec<WorkerStats>,
}

impl Router {
    /// Build the tables from `config` and start the control thread and one
    /// worker per backend.
    pub fn start<B>(config: &RouterConfig, backends: Vec<B>) -> Result<Self>
    where
        B: WorkerBackend + 'static,
    {
        let sync = ControlSync::from_config(config)?;
        if backends.is_empty() {
            return Err(FwdError::Config("at least one worker backend is required".to_string()));
        }
        if backends.len() != config.workers {
            warn!(
                configured = config.workers,
                backends = backends.len(),
                "Worker count differs from configuration, using one worker per backend"
            );
        }

        let pipeline = sync.pipeline();
        let (events, events_rx) = bounded(config.event_queue_capacity);
        let control = sync.spawn(events_rx)?;
        let workers = WorkerPool::spawn(&pipeline, backends)?;

        info!(
            ports = config.ports.len(),
            workers = workers.len(),
            "Router started"
        );
        Ok(Router {
            events,
            pipeline,
            control,
            workers,
        })
    }

    /// Sender for route and neighbor events.
    pub fn events(&self) -> Sender<ControlEvent> {
        self.events.clone()
    }

    /// Queue one event for the control thread.
    pub fn send(&self, event: ControlEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| FwdError::ThreadPanicked("fwd-control".to_string()))
    }

    /// A pipeline over the live tables, for processing frames outside the workers.
    pub fn pipeline(&self) -> &ForwardingPipeline {
        &self.pipeline
    }

    pub fn worker_stats(&self) -> Vec<WorkerStats> {
        self.workers.stats()
    }

    /// Stop the workers, then the control thread after it applied the events
    /// queued so far.
    pub fn shutdown(self) -> Result<RouterReport> {
        let Router {
            events,
            pipeline: _,
            control,
            workers,
        } = self;

        let workers = workers.shutdown()?;
        drop(events);
        let control = control.stop()?;

        let total = workers
            .iter()
            .fold(WorkerStats::default(), |total, stats| total + *stats);
        info!(
            received = total.received,
            forwarded = total.forwarded,
            local = total.local,
            dropped = total.dropped,
            io_errors = total.io_errors,
            "Router stopped"
        );
        Ok(RouterReport { control, workers })
    }
}

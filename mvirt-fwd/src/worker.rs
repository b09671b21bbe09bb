//! Packet worker threads.
//!
//! Each worker owns one [`WorkerBackend`] (its NIC queues), pulls frames in
//! batches and runs them through the shared [`ForwardingPipeline`]. Workers are
//! pure readers of the forwarding tables.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use tracing::{debug, info, trace, warn};

use crate::error::{FwdError, Result};
use crate::pipeline::{Decision, ForwardingPipeline};

/// Maximum frames to process per iteration (batching)
const BATCH_LIMIT: usize = 64;

/// How long an idle worker waits for a frame before checking for shutdown
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// An Ethernet frame and the port it was received on (or is sent to).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub port: usize,
    pub data: Vec<u8>,
}

/// Result of a receive operation
#[derive(Debug)]
pub enum RecvResult {
    Frame(Frame),
    /// No frame arrived within the timeout
    WouldBlock,
    /// Backend is done (queues closed)
    Done,
}

/// Packet I/O of one worker: the NIC queues it owns plus the path to the
/// local network stack.
pub trait WorkerBackend: Send {
    /// Wait up to `timeout` for the next received frame.
    fn recv(&mut self, timeout: Duration) -> io::Result<RecvResult>;

    /// Send a frame out of `port`.
    fn transmit(&mut self, port: usize, frame: Frame) -> io::Result<()>;

    /// Hand a frame to the local network stack.
    fn deliver_local(&mut self, frame: Frame) -> io::Result<()>;
}

/// Backend over crossbeam channels.
///
/// Transmitted frames carry their egress port; locally delivered frames keep
/// their ingress port.
pub struct ChannelBackend {
    rx: Receiver<Frame>,
    tx: Sender<Frame>,
    local: Sender<Frame>,
}

impl ChannelBackend {
    pub fn new(rx: Receiver<Frame>, tx: Sender<Frame>, local: Sender<Frame>) -> Self {
        ChannelBackend { rx, tx, local }
    }
}

impl WorkerBackend for ChannelBackend {
    fn recv(&mut self, timeout: Duration) -> io::Result<RecvResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(RecvResult::Frame(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(RecvResult::WouldBlock),
            Err(RecvTimeoutError::Disconnected) => Ok(RecvResult::Done),
        }
    }

    fn transmit(&mut self, port: usize, mut frame: Frame) -> io::Result<()> {
        frame.port = port;
        self.tx
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "transmit queue closed"))
    }

    fn deliver_local(&mut self, frame: Frame) -> io::Result<()> {
        self.local
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "local queue closed"))
    }
}

#[derive(Default)]
struct WorkerCounters {
    received: AtomicU64,
    forwarded: AtomicU64,
    local: AtomicU64,
    dropped: AtomicU64,
    io_errors: AtomicU64,
}

impl WorkerCounters {
    #[inline]
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            local: self.local.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
        }
    }
}

/// Frame counters of one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub received: u64,
    pub forwarded: u64,
    pub local: u64,
    pub dropped: u64,
    /// Receive, transmit or local delivery failures
    pub io_errors: u64,
}

impl std::ops::Add for WorkerStats {
    type Output = WorkerStats;

    fn add(self, other: WorkerStats) -> WorkerStats {
        WorkerStats {
            received: self.received + other.received,
            forwarded: self.forwarded + other.forwarded,
            local: self.local + other.local,
            dropped: self.dropped + other.dropped,
            io_errors: self.io_errors + other.io_errors,
        }
    }
}

struct Worker<B> {
    id: usize,
    pipeline: ForwardingPipeline,
    backend: B,
    counters: Arc<WorkerCounters>,
    shutdown: Receiver<()>,
}

impl<B: WorkerBackend> Worker<B> {
    fn run(&mut self) {
        info!(worker = self.id, "Worker started");

        loop {
            match self.shutdown.try_recv() {
                Err(TryRecvError::Empty) => {}
                Ok(()) | Err(TryRecvError::Disconnected) => {
                    debug!(worker = self.id, "Worker shutting down");
                    break;
                }
            }

            if !self.process_batch() {
                info!(worker = self.id, "Backend closed");
                break;
            }
        }

        let stats = self.counters.snapshot();
        info!(
            worker = self.id,
            received = stats.received,
            forwarded = stats.forwarded,
            local = stats.local,
            dropped = stats.dropped,
            io_errors = stats.io_errors,
            "Worker stopped"
        );
    }

    /// Process up to `BATCH_LIMIT` frames. Returns false once the backend is done.
    fn process_batch(&mut self) -> bool {
        let mut timeout = POLL_TIMEOUT;

        for _ in 0..BATCH_LIMIT {
            match self.backend.recv(timeout) {
                Ok(RecvResult::Frame(frame)) => self.handle_frame(frame),
                Ok(RecvResult::WouldBlock) => break,
                Ok(RecvResult::Done) => return false,
                Err(e) => {
                    warn!(worker = self.id, error = %e, "Receive failed");
                    WorkerCounters::inc(&self.counters.io_errors);
                    break;
                }
            }
            // Drain what is already queued without waiting.
            timeout = Duration::ZERO;
        }
        true
    }

    fn handle_frame(&mut self, mut frame: Frame) {
        WorkerCounters::inc(&self.counters.received);

        let result = match self.pipeline.process(&mut frame.data, frame.port) {
            Decision::Forward(port) => {
                WorkerCounters::inc(&self.counters.forwarded);
                self.backend.transmit(port, frame)
            }
            Decision::DeliverLocal => {
                WorkerCounters::inc(&self.counters.local);
                self.backend.deliver_local(frame)
            }
            Decision::Drop => {
                WorkerCounters::inc(&self.counters.dropped);
                Ok(())
            }
        };

        if let Err(e) = result {
            trace!(worker = self.id, error = %e, "Failed to send frame");
            WorkerCounters::inc(&self.counters.io_errors);
        }
    }
}

struct WorkerHandle {
    id: usize,
    thread: Option<JoinHandle<()>>,
    shutdown: Sender<()>,
    counters: Arc<WorkerCounters>,
}

impl WorkerHandle {
    fn stop(&self) {
        let _ = self.shutdown.try_send(());
    }

    fn join(&mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| FwdError::ThreadPanicked(format!("fwd-worker-{}", self.id))),
            None => Ok(()),
        }
    }
}

/// A fixed pool of packet workers, one per backend.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Start one named worker thread per backend.
    pub fn spawn<B>(pipeline: &ForwardingPipeline, backends: Vec<B>) -> Result<Self>
    where
        B: WorkerBackend + 'static,
    {
        // Dropping a partially built pool stops the workers already started.
        let mut pool = WorkerPool {
            workers: Vec::with_capacity(backends.len()),
        };

        for (id, backend) in backends.into_iter().enumerate() {
            let (shutdown_tx, shutdown_rx) = bounded(1);
            let counters = Arc::new(WorkerCounters::default());
            let mut worker = Worker {
                id,
                pipeline: pipeline.clone(),
                backend,
                counters: Arc::clone(&counters),
                shutdown: shutdown_rx,
            };

            let thread = thread::Builder::new()
                .name(format!("fwd-worker-{id}"))
                .spawn(move || worker.run())?;

            pool.workers.push(WorkerHandle {
                id,
                thread: Some(thread),
                shutdown: shutdown_tx,
                counters,
            });
        }

        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Current counters of every worker.
    pub fn stats(&self) -> Vec<WorkerStats> {
        self.workers
            .iter()
            .map(|worker| worker.counters.snapshot())
            .collect()
    }

    /// Stop all workers, wait for them and return their final counters.
    pub fn shutdown(mut self) -> Result<Vec<WorkerStats>> {
        for worker in &self.workers {
            worker.stop();
        }

        let mut result = Ok(());
        for worker in &mut self.workers {
            if let Err(e) = worker.join() {
                result = Err(e);
            }
        }
        result.map(|()| self.stats())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.stop();
        }
        for worker in &mut self.workers {
            let _ = worker.join();
        }
    }
}

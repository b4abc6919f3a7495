//! Watchdog worker: runs the name query off the dispatch thread.
//!
//! The name query can block forever, so the resolver never issues it
//! itself. A single long-lived worker thread waits for work, runs the query
//! and sends the reply back; the dispatch side waits for that reply only
//! up to a deadline.
//!
//! # Protocol
//!
//! ```text
//! dispatch                          worker
//!    | --- work (ObjectRef) --------> |   blocks on work, no timeout
//!    |                                |   query_name (may hang)
//!    | <-------- reply (NameReply) -- |
//!    |   waits at most `deadline`
//! ```
//!
//! Both directions are single-slot channels and at most one query is in
//! flight. When the deadline passes, the worker is abandoned through the
//! configured [`TerminationStrategy`] and its channels go with it, so a
//! reply that arrives late can never be read by the next request. The next
//! query spawns a fresh worker.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::kernel::{KernelObjects, ObjectRef};
use crate::protocol::NAME_BUFFER_LEN;

/// Name given to every worker thread.
pub const WORKER_THREAD_NAME: &str = "handlename-watchdog";

/// Reply produced by the worker for one query.
#[derive(Clone)]
pub struct NameReply {
    /// Reported length of the name record; 0 when the query failed.
    pub len: usize,
    /// Name record, valid up to `len`.
    pub buffer: [u8; NAME_BUFFER_LEN],
}

impl fmt::Debug for NameReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameReply")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Outcome of a guarded query.
#[derive(Debug)]
pub enum WatchdogOutcome {
    /// The worker answered within the deadline.
    Completed(NameReply),
    /// The deadline passed; the worker was abandoned.
    TimedOut,
    /// The worker was gone (it panicked); it was discarded.
    WorkerLost,
}

/// Watchdog errors.
#[derive(Debug, Error)]
pub enum WatchdogError {
    /// The worker thread could not be created.
    #[error("failed to spawn watchdog worker: {0}")]
    Spawn(#[source] io::Error),
}

struct WorkerChannels {
    work_tx: SyncSender<ObjectRef>,
    reply_rx: Receiver<NameReply>,
}

/// A worker that missed its deadline, handed to a [`TerminationStrategy`].
pub struct AbandonedWorker {
    thread: JoinHandle<()>,
    channels: WorkerChannels,
}

impl AbandonedWorker {
    /// The worker's thread.
    #[must_use]
    pub const fn thread(&self) -> &JoinHandle<()> {
        &self.thread
    }

    /// Release the dispatch side and leave the thread running.
    ///
    /// If the blocked call ever returns, the worker finds its channels
    /// disconnected and exits.
    pub fn detach(self) {
        drop(self);
    }

    /// Release the thread handle but leak the dispatch side of the
    /// channels.
    ///
    /// For use after the thread was killed: a thread killed mid-send can
    /// leave channel internals locked, and dropping them would then block.
    pub fn forget(self) {
        let Self { thread, channels } = self;
        std::mem::forget(channels);
        drop(thread);
    }
}

/// How a worker that missed its deadline is disposed of.
pub trait TerminationStrategy: Send + Sync {
    /// Short name used in log fields.
    fn name(&self) -> &'static str;

    /// Dispose of `worker`. Must not block on it.
    fn abandon(&self, worker: AbandonedWorker);
}

/// Portable strategy: leave the blocked thread behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detach;

impl TerminationStrategy for Detach {
    fn name(&self) -> &'static str {
        "detach"
    }

    fn abandon(&self, worker: AbandonedWorker) {
        worker.detach();
    }
}

struct Worker {
    thread: JoinHandle<()>,
    channels: WorkerChannels,
}

impl Worker {
    fn into_abandoned(self) -> AbandonedWorker {
        AbandonedWorker {
            thread: self.thread,
            channels: self.channels,
        }
    }
}

/// Owner of the (at most one) worker thread.
pub struct Watchdog<K: KernelObjects> {
    kernel: Arc<K>,
    strategy: Box<dyn TerminationStrategy>,
    worker: Option<Worker>,
    generation: u64,
}

impl<K: KernelObjects> Watchdog<K> {
    /// Create a watchdog. No thread is started until the first query.
    #[must_use]
    pub fn new(kernel: Arc<K>, strategy: Box<dyn TerminationStrategy>) -> Self {
        Self {
            kernel,
            strategy,
            worker: None,
            generation: 0,
        }
    }

    /// Number of workers spawned so far.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` while a worker is held.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Query `object`'s name on the worker, waiting at most `deadline`.
    ///
    /// `object` must stay open until this returns; after a timeout the
    /// abandoned worker may still be using it, so the caller should close
    /// it only once it no longer matters what the worker does with it.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::Spawn`] if a worker was needed and could
    /// not be created.
    pub fn query(
        &mut self,
        object: ObjectRef,
        deadline: Duration,
    ) -> Result<WatchdogOutcome, WatchdogError> {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => self.spawn()?,
        };

        if worker.channels.work_tx.try_send(object).is_err() {
            self.discard(worker);
            return Ok(WatchdogOutcome::WorkerLost);
        }

        match worker.channels.reply_rx.recv_timeout(deadline) {
            Ok(reply) => {
                trace!(%object, len = reply.len, "watchdog query completed");
                self.worker = Some(worker);
                Ok(WatchdogOutcome::Completed(reply))
            },
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    %object,
                    generation = self.generation,
                    deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    strategy = self.strategy.name(),
                    "name query exceeded deadline; abandoning worker and any resources its \
                     pending call holds"
                );
                self.strategy.abandon(worker.into_abandoned());
                Ok(WatchdogOutcome::TimedOut)
            },
            Err(RecvTimeoutError::Disconnected) => {
                self.discard(worker);
                Ok(WatchdogOutcome::WorkerLost)
            },
        }
    }

    fn spawn(&mut self) -> Result<Worker, WatchdogError> {
        let (work_tx, work_rx) = mpsc::sync_channel(1);
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let kernel = Arc::clone(&self.kernel);

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(kernel.as_ref(), &work_rx, &reply_tx))
            .map_err(WatchdogError::Spawn)?;

        self.generation += 1;
        debug!(generation = self.generation, "spawned watchdog worker");
        Ok(Worker {
            thread,
            channels: WorkerChannels { work_tx, reply_rx },
        })
    }

    fn discard(&self, worker: Worker) {
        warn!(
            generation = self.generation,
            "watchdog worker exited unexpectedly; discarding it"
        );
        worker.into_abandoned().detach();
    }
}

fn run_worker<K: KernelObjects>(
    kernel: &K,
    work_rx: &Receiver<ObjectRef>,
    reply_tx: &SyncSender<NameReply>,
) {
    while let Ok(object) = work_rx.recv() {
        let mut buffer = [0u8; NAME_BUFFER_LEN];
        let len = match kernel.query_name(object, &mut buffer) {
            Ok(len) => len,
            Err(err) => {
                debug!(%object, error = %err, "name query failed");
                0
            },
        };
        if reply_tx.send(NameReply { len, buffer }).is_err() {
            break;
        }
    }
}

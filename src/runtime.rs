//! Threaded runtime: bounded worker pools over the engine.
//!
//! Requests are routed by kind to one of two pools so a burst of
//! submissions cannot starve session traffic: admissions run the full
//! deconfliction pipeline, while envelopes and maintenance passes touch
//! the session registry. Each pool is a bounded crossbeam channel feeding
//! a fixed set of worker threads; a full queue is reported to the caller
//! instead of blocking.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::debug;

use crate::engine::{ArbiterEngine, EnvelopeAck, MaintenanceReport, SubmitOutcome};
use crate::envelope::Envelope;
use crate::error::{ArbError, ArbResult, ExecutionError};
use crate::grant::Grant;

/// Worker pool sizing.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Threads running the admission pipeline.
    pub admission_workers: usize,

    /// Threads applying session envelopes and maintenance.
    pub negotiation_workers: usize,

    /// Bounded depth of each request queue.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            admission_workers: 4,
            negotiation_workers: 2,
            queue_capacity: 64,
        }
    }
}

/// A request accepted by the runtime.
#[derive(Debug)]
pub enum ArbRequest {
    /// Run the admission pipeline on a proposal.
    Submit {
        /// The proposed grant.
        grant: Grant,
    },

    /// Apply a session message.
    Envelope {
        /// The message to apply.
        envelope: Envelope,
    },

    /// Drive expiry, deadlines, and finalization.
    Maintain {
        /// The instant deadlines are evaluated against.
        now: DateTime<Utc>,
    },
}

/// The reply to a completed request.
#[derive(Debug)]
pub enum ArbResponse {
    /// Result of an admission.
    Submit(SubmitOutcome),

    /// Result of a session message.
    Envelope(EnvelopeAck),

    /// Result of a maintenance pass.
    Maintenance(MaintenanceReport),
}

struct Job {
    request: ArbRequest,
    reply: Sender<ArbResult<ArbResponse>>,
}

/// A pending result. Dropping the handle abandons the reply; the worker
/// still completes the request.
#[derive(Debug)]
pub struct ExecutionHandle {
    receiver: Receiver<ArbResult<ArbResponse>>,
}

impl ExecutionHandle {
    /// Blocks until the request completes.
    ///
    /// # Errors
    ///
    /// Fails if the worker pool shut down before replying, or with the
    /// request's own error.
    pub fn join(self) -> ArbResult<ArbResponse> {
        self.receiver
            .recv()
            .map_err(|_| ExecutionError::Disconnected {
                path: "reply".to_string(),
            })?
    }

    /// Blocks until the request completes or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Fails with a timeout error when the deadline passes first.
    pub fn join_timeout(self, timeout: Duration) -> ArbResult<ArbResponse> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                Err(ExecutionError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }
                .into())
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(ExecutionError::Disconnected {
                    path: "reply".to_string(),
                }
                .into())
            }
        }
    }
}

struct WorkerPool {
    path: &'static str,
    capacity: usize,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn(
        path: &'static str,
        workers: usize,
        capacity: usize,
        engine: &Arc<ArbiterEngine>,
    ) -> ArbResult<Self> {
        // At least one worker, or the queue would disconnect on return.
        let workers = workers.max(1);
        let (sender, receiver) = bounded::<Job>(capacity);
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = receiver.clone();
            let engine = Arc::clone(engine);
            let handle = std::thread::Builder::new()
                .name(format!("{path}-{index}"))
                .spawn(move || {
                    for job in &receiver {
                        let result = execute(&engine, job.request);
                        // A dropped handle means nobody wants the reply.
                        let _ = job.reply.send(result);
                    }
                })
                .map_err(|e| ArbError::internal(format!("failed to spawn {path} worker: {e}")))?;
            handles.push(handle);
        }
        Ok(Self {
            path,
            capacity,
            sender: Some(sender),
            workers: handles,
        })
    }

    fn dispatch(&self, request: ArbRequest) -> ArbResult<ExecutionHandle> {
        let (reply, receiver) = bounded(1);
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| ExecutionError::Disconnected {
                path: self.path.to_string(),
            })?;
        match sender.try_send(Job { request, reply }) {
            Ok(()) => Ok(ExecutionHandle { receiver }),
            Err(TrySendError::Full(_)) => Err(ExecutionError::QueueFull {
                path: self.path.to_string(),
                capacity: self.capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(ExecutionError::Disconnected {
                path: self.path.to_string(),
            }
            .into()),
        }
    }

    fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn execute(engine: &ArbiterEngine, request: ArbRequest) -> ArbResult<ArbResponse> {
    match request {
        ArbRequest::Submit { grant } => {
            engine.submit_proposal(grant).map(ArbResponse::Submit)
        }
        ArbRequest::Envelope { envelope } => {
            engine.apply_envelope(&envelope).map(ArbResponse::Envelope)
        }
        ArbRequest::Maintain { now } => {
            engine.run_maintenance(now).map(ArbResponse::Maintenance)
        }
    }
}

/// Threaded front-end over an [`ArbiterEngine`].
pub struct ArbRuntime {
    engine: Arc<ArbiterEngine>,
    admission: WorkerPool,
    negotiation: WorkerPool,
}

impl ArbRuntime {
    /// Starts the worker pools.
    ///
    /// # Errors
    ///
    /// Fails if a worker thread cannot be spawned.
    pub fn start(config: RuntimeConfig, engine: Arc<ArbiterEngine>) -> ArbResult<Self> {
        let admission = WorkerPool::spawn(
            "admission",
            config.admission_workers,
            config.queue_capacity,
            &engine,
        )?;
        let negotiation = WorkerPool::spawn(
            "negotiation",
            config.negotiation_workers,
            config.queue_capacity,
            &engine,
        )?;
        debug!(
            admission_workers = config.admission_workers,
            negotiation_workers = config.negotiation_workers,
            "runtime started"
        );
        Ok(Self {
            engine,
            admission,
            negotiation,
        })
    }

    /// The engine behind the pools, for direct queries.
    #[must_use]
    pub fn engine(&self) -> &Arc<ArbiterEngine> {
        &self.engine
    }

    /// Enqueues a request on the pool for its kind.
    ///
    /// # Errors
    ///
    /// Fails when the target queue is full or the pool has shut down.
    pub fn submit(&self, request: ArbRequest) -> ArbResult<ExecutionHandle> {
        match request {
            ArbRequest::Submit { .. } => self.admission.dispatch(request),
            ArbRequest::Envelope { .. } | ArbRequest::Maintain { .. } => {
                self.negotiation.dispatch(request)
            }
        }
    }

    /// Stops accepting requests and joins every worker.
    pub fn shutdown(&mut self) {
        self.admission.shutdown();
        self.negotiation.shutdown();
    }
}

impl Drop for ArbRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

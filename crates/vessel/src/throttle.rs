//! Shared limits on concurrent I/O and health checks.

use crate::config::{ConfigError, InterpreterConfig};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vessel_core::StepError;

/// A counting semaphore bounding concurrent transfers.
///
/// Clones share the same slots, so one limiter handed to every download
/// step caps downloads process-wide.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// A held [`RateLimiter`] slot, returned on drop.
pub type RateLimitSlot = OwnedSemaphorePermit;

impl RateLimiter {
    /// Creates a limiter allowing `capacity` holders at once.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Waits for a free slot, giving up with [`StepError::Cancelled`] once `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<RateLimitSlot, StepError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StepError::Cancelled),
            permit = Arc::clone(&self.slots).acquire_owned() => {
                permit.map_err(|_| StepError::Cancelled)
            }
        }
    }
}

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A fixed set of workers running submitted jobs in FIFO order.
///
/// At most `size` jobs run at once; further submissions wait in the queue.
/// Must be created inside a tokio runtime.
#[derive(Debug, Clone)]
pub struct WorkPool {
    queue: mpsc::UnboundedSender<Job>,
    stopped: CancellationToken,
    size: usize,
}

impl WorkPool {
    /// Spawns `size` workers.
    pub fn new(size: usize) -> Self {
        let (queue, jobs) = mpsc::unbounded_channel::<Job>();
        let jobs = Arc::new(Mutex::new(jobs));
        let stopped = CancellationToken::new();

        for worker in 0..size {
            let jobs = Arc::clone(&jobs);
            let stopped = stopped.clone();
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = stopped.cancelled() => None,
                        job = async { jobs.lock().await.recv().await } => job,
                    };
                    let Some(job) = next else { break };
                    if let Err(err) = tokio::spawn(job).await {
                        warn!(worker, error = %err, "work-pool-job-failed");
                    }
                }
                debug!(worker, "work-pool-worker-stopped");
            });
        }

        Self {
            queue,
            stopped,
            size,
        }
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Queues `job` to run on the next free worker.
    pub fn submit<F>(&self, job: F) -> Result<(), StepError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.stopped.is_cancelled() {
            return Err(StepError::Join("work pool is stopped".to_string()));
        }
        self.queue
            .send(Box::pin(job))
            .map_err(|_| StepError::Join("work pool is stopped".to_string()))
    }

    /// Stops the workers once their current job finishes. Queued jobs are dropped.
    pub fn shutdown(&self) {
        self.stopped.cancel();
    }
}

/// The shared limiters for one interpreter process.
#[derive(Debug, Clone)]
pub struct Throttles {
    /// Shared by every download step.
    pub downloads: RateLimiter,
    /// Shared by every upload step.
    pub uploads: RateLimiter,
    /// Runs every monitor's health checks.
    pub health_checks: WorkPool,
}

impl Throttles {
    /// Builds the limiters described by `config`.
    pub fn from_config(config: &InterpreterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            downloads: RateLimiter::new(config.max_concurrent_downloads),
            uploads: RateLimiter::new(config.max_concurrent_uploads),
            health_checks: WorkPool::new(config.health_check_work_pool_size),
        })
    }
}

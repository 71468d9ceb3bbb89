//! Run blocking work off the async scheduler.
//!
//! Image filters, text splitting and other CPU-bound transforms go through a
//! [`TaskOffloader`]. It owns a semaphore sized to the number of jobs allowed
//! in flight; callers past that limit either queue ([`TaskOffloader::run`]) or
//! are turned away ([`TaskOffloader::try_run`]). The awaiting task yields while
//! the job runs, so other sessions keep moving.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, oneshot};
use tracing::{debug, warn};

/// Where an offloaded job executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pool {
    /// The runtime's shared blocking thread pool.
    #[default]
    Shared,
    /// A fresh OS thread for this job alone, for long CPU-heavy work that
    /// should not occupy a shared blocking slot.
    Dedicated,
}

#[derive(Debug, Clone)]
pub struct OffloadConfig {
    /// Jobs allowed to run at once across all pools.
    pub max_in_flight: usize,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            max_in_flight: std::thread::available_parallelism().map_or(4, |n| n.get()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OffloadError {
    /// The job itself returned an error.
    #[error(transparent)]
    Job(#[from] anyhow::Error),
    #[error("offloaded job panicked")]
    Panicked,
    /// `try_run` found every slot taken.
    #[error("offload pool is saturated ({in_flight} jobs in flight)")]
    Saturated { in_flight: usize },
    /// The offloader was shut down before a slot was granted.
    #[error("offload pool is closed")]
    Closed,
    #[error("could not start an offload thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub struct TaskOffloader {
    permits: Arc<Semaphore>,
    config: OffloadConfig,
}

impl Default for TaskOffloader {
    fn default() -> Self {
        Self::new(OffloadConfig::default())
    }
}

impl TaskOffloader {
    pub fn new(config: OffloadConfig) -> Self {
        let slots = config.max_in_flight.max(1);
        Self {
            permits: Arc::new(Semaphore::new(slots)),
            config: OffloadConfig {
                max_in_flight: slots,
            },
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.config.max_in_flight
    }

    pub fn in_flight(&self) -> usize {
        self.config.max_in_flight - self.permits.available_permits()
    }

    /// Stop granting slots. Queued and later callers fail with
    /// [`OffloadError::Closed`]; jobs already running finish normally.
    pub fn shutdown(&self) {
        self.permits.close();
        debug!(in_flight = self.in_flight(), "offloader shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.permits.is_closed()
    }

    /// Run `job` on the shared pool, waiting for a free slot if needed.
    pub async fn run<T, F>(&self, job: F) -> Result<T, OffloadError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_on(Pool::Shared, job).await
    }

    /// Run `job` on the given pool, waiting for a free slot if needed.
    pub async fn run_on<T, F>(&self, pool: Pool, job: F) -> Result<T, OffloadError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| OffloadError::Closed)?;
        execute(pool, permit, job).await
    }

    /// Run `job` only if a slot is free right now.
    pub async fn try_run<T, F>(&self, pool: Pool, job: F) -> Result<T, OffloadError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => OffloadError::Saturated {
                    in_flight: self.in_flight(),
                },
                TryAcquireError::Closed => OffloadError::Closed,
            })?;
        execute(pool, permit, job).await
    }
}

async fn execute<T, F>(pool: Pool, permit: OwnedSemaphorePermit, job: F) -> Result<T, OffloadError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    debug!(?pool, "offloading job");
    let outcome = match pool {
        Pool::Shared => tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "offloaded job did not complete");
            OffloadError::Panicked
        })?,
        Pool::Dedicated => {
            let (tx, rx) = oneshot::channel();
            std::thread::Builder::new()
                .name("katbot-offload".to_string())
                .spawn(move || {
                    let _permit = permit;
                    let _ = tx.send(job());
                })
                .map_err(OffloadError::Spawn)?;
            rx.await.map_err(|_| {
                warn!("dedicated offload thread exited without a result");
                OffloadError::Panicked
            })?
        }
    };
    outcome.map_err(OffloadError::Job)
}

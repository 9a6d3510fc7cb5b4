use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use synthpool_core::{Device, DispatchConfig, Job, Payload, SynthResult};

use crate::error::DispatchError;
use crate::future::ResultFuture;
use crate::queue::BoundedQueue;
use crate::stats::{Statistics, StatisticsSnapshot};
use crate::worker::{WorkerHandle, WorkerStatus};

/// Result slot shared by a waiting caller and the worker that runs its job.
pub(super) type JobFuture = ResultFuture<SynthResult<Payload>>;

/// A job sitting in the queue together with the future its caller waits on.
#[derive(Debug)]
pub(super) struct QueuedJob {
    pub(super) job: Job,
    pub(super) slot: Arc<JobFuture>,
}

/// State shared between the dispatcher and every worker thread.
#[derive(Debug)]
pub(super) struct Shared {
    pub(super) queue: BoundedQueue<QueuedJob>,
    pub(super) stats: Statistics,
    /// Cleared once at shutdown; worker loops observe it within one poll interval.
    pub(super) running: AtomicBool,
}

/// Routes synthesis jobs to a fixed pool of single-job workers.
///
/// Lifecycle: [`Dispatcher::new`] → [`Dispatcher::start`] → any number of
/// concurrent [`Dispatcher::submit`] calls → [`Dispatcher::shutdown`].
#[derive(Debug)]
pub struct Dispatcher {
    pub(super) config: DispatchConfig,
    pub(super) shared: Arc<Shared>,
    /// Status handles of workers that survived bootstrap. Fixed after `start`.
    pub(super) workers: Vec<Arc<WorkerHandle>>,
    pub(super) threads: Mutex<Vec<JoinHandle<()>>>,
    pub(super) next_job_id: AtomicU64,
    pub(super) device: Device,
    pub(super) model_name: String,
    pub(super) started_at: Option<Instant>,
}

impl Dispatcher {
    /// Create a dispatcher with an empty, not-yet-started pool.
    pub fn new(config: DispatchConfig) -> Result<Self, DispatchError> {
        config.validate()?;
        let shared = Arc::new(Shared {
            queue: BoundedQueue::new(config.queue_capacity),
            stats: Statistics::default(),
            running: AtomicBool::new(false),
        });

        Ok(Self {
            device: config.device,
            model_name: config.model_name.clone(),
            config,
            shared,
            workers: Vec::new(),
            threads: Mutex::new(Vec::new()),
            next_job_id: AtomicU64::new(1),
            started_at: None,
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Whether `start` has run and `shutdown` has not.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Number of workers serving jobs.
    pub fn pool_size(&self) -> usize {
        self.workers.len()
    }

    /// Number of workers the config asked for.
    pub fn requested_workers(&self) -> usize {
        self.config.worker_count
    }

    /// Device the engine loader resolved at bootstrap.
    pub fn device(&self) -> Device {
        self.device
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Per-worker busy state, each read under that worker's own lock.
    pub fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.workers.iter().map(|w| w.status()).collect()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.is_running() {
            self.shutdown();
        }
    }
}

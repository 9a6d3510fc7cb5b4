use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use synthpool_core::{deadline_after, Device, SynthError};

use crate::engine::EngineLoader;
use crate::error::DispatchError;
use crate::worker::{millis, panic_message, Worker};

use super::execution::worker_loop;
use super::Dispatcher;

/// How often shutdown re-checks whether worker threads have exited.
const JOIN_POLL: Duration = Duration::from_millis(10);

/// Which bootstrap step excluded a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapStage {
    Load,
    Warmup,
    Spawn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BootstrapFailure {
    pub worker_id: usize,
    pub stage: BootstrapStage,
    pub message: String,
}

/// Outcome of [`Dispatcher::start`].
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub requested: usize,
    /// Ids of workers that loaded, warmed up, and are now polling the queue.
    pub ready: Vec<usize>,
    pub failures: Vec<BootstrapFailure>,
    pub device: Device,
    pub elapsed: Duration,
}

impl BootstrapReport {
    /// A pool with zero workers cannot serve anything.
    pub fn is_healthy(&self) -> bool {
        !self.ready.is_empty()
    }
}

/// Outcome of [`Dispatcher::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Queued jobs completed with `ShuttingDown` instead of running.
    pub drained: usize,
    pub joined: usize,
    /// Threads still busy when the shutdown timeout expired (left detached).
    pub abandoned: usize,
}

impl Dispatcher {
    /// Load and warm up every worker sequentially, then start their threads.
    ///
    /// Workers that fail to load or warm up are logged and excluded, never
    /// retried. An empty pool is not an error: the dispatcher keeps running
    /// and rejects submissions with `WorkerUnavailable` so health checks can
    /// surface it.
    pub fn start(&mut self, loader: &dyn EngineLoader) -> Result<BootstrapReport, DispatchError> {
        if self.started_at.is_some() {
            return Err(DispatchError::AlreadyStarted);
        }

        let started = Instant::now();
        let device = loader.resolve_device(self.config.device);
        self.device = device;
        self.model_name = loader.model_name().to_string();
        info!(
            "Bootstrapping {} workers (model: {}, device: {})",
            self.config.worker_count, self.model_name, device
        );

        let mut ready_workers = Vec::with_capacity(self.config.worker_count);
        let mut failures = Vec::new();
        for id in 0..self.config.worker_count {
            match self.bootstrap_worker(loader, id, device) {
                Ok(worker) => ready_workers.push(worker),
                Err(failure) => {
                    error!(
                        worker = failure.worker_id,
                        stage = ?failure.stage,
                        error = %failure.message,
                        "worker excluded from pool"
                    );
                    failures.push(failure);
                }
            }
        }

        self.shared.running.store(true, Ordering::Release);
        self.started_at = Some(Instant::now());

        let mut ready = Vec::with_capacity(ready_workers.len());
        let mut threads = Vec::with_capacity(ready_workers.len());
        for worker in ready_workers {
            let id = worker.id();
            let handle = worker.handle();
            match self.spawn_worker(worker) {
                Ok(thread) => {
                    self.workers.push(handle);
                    threads.push(thread);
                    ready.push(id);
                }
                Err(e) => {
                    error!(worker = id, error = %e, "failed to spawn worker thread");
                    failures.push(BootstrapFailure {
                        worker_id: id,
                        stage: BootstrapStage::Spawn,
                        message: e.to_string(),
                    });
                }
            }
        }
        *self.threads.lock().unwrap_or_else(PoisonError::into_inner) = threads;

        if ready.is_empty() {
            error!("No workers available; dispatcher will report itself unhealthy");
        } else {
            info!(
                "Pool ready: {}/{} workers in {:.1}s",
                ready.len(),
                self.config.worker_count,
                started.elapsed().as_secs_f64()
            );
        }

        Ok(BootstrapReport {
            requested: self.config.worker_count,
            ready,
            failures,
            device,
            elapsed: started.elapsed(),
        })
    }

    fn bootstrap_worker(
        &self,
        loader: &dyn EngineLoader,
        id: usize,
        device: Device,
    ) -> Result<Worker, BootstrapFailure> {
        let fail = |stage, message: String| BootstrapFailure {
            worker_id: id,
            stage,
            message,
        };

        let load_start = Instant::now();
        let engine = match panic::catch_unwind(AssertUnwindSafe(|| loader.load(id, device))) {
            Ok(Ok(engine)) => engine,
            Ok(Err(e)) => return Err(fail(BootstrapStage::Load, e.to_string())),
            Err(panic) => {
                let msg = format!("loader panicked: {}", panic_message(panic.as_ref()));
                return Err(fail(BootstrapStage::Load, msg));
            }
        };
        let load_time = load_start.elapsed();

        let mut worker = Worker::new(id, engine, self.config.max_input_length);
        let warmup_time = worker
            .warm_up(&self.config.warmup_text)
            .map_err(|msg| fail(BootstrapStage::Warmup, msg))?;

        info!(
            worker = id,
            load_ms = millis(load_time),
            warmup_ms = millis(warmup_time),
            "worker loaded"
        );
        Ok(worker)
    }

    fn spawn_worker(&self, worker: Worker) -> std::io::Result<JoinHandle<()>> {
        let shared = Arc::clone(&self.shared);
        let poll_interval = self.config.poll_interval();
        thread::Builder::new()
            .name(format!("synth-worker-{}", worker.id()))
            .spawn(move || worker_loop(worker, shared, poll_interval))
    }

    /// Stop accepting work, fail queued jobs with `ShuttingDown`, and join
    /// worker threads within the configured shutdown timeout.
    ///
    /// In-flight jobs run to completion; a thread still busy at the deadline
    /// is left detached and counted as abandoned. Safe to call repeatedly.
    pub fn shutdown(&self) -> ShutdownReport {
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        if was_running {
            info!("Dispatcher shutdown requested");
        }

        let queued = self.shared.queue.close();
        let drained = queued.len();
        for entry in queued {
            if entry.slot.complete(Err(SynthError::ShuttingDown)) {
                self.shared.stats.record_aborted();
            }
        }

        let mut pending: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner));
        let deadline = deadline_after(self.config.shutdown_timeout());
        let mut joined = 0;
        loop {
            let (finished, running): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|h| h.is_finished());
            for handle in finished {
                if handle.join().is_err() {
                    warn!("worker thread exited with a panic");
                }
                joined += 1;
            }
            pending = running;
            if pending.is_empty() || Instant::now() >= deadline {
                break;
            }
            thread::sleep(JOIN_POLL);
        }

        for handle in &pending {
            warn!(
                thread = handle.thread().name().unwrap_or("unnamed"),
                "worker thread still busy at shutdown timeout; detaching"
            );
        }

        let report = ShutdownReport {
            drained,
            joined,
            abandoned: pending.len(),
        };
        if was_running {
            info!(
                drained = report.drained,
                joined = report.joined,
                abandoned = report.abandoned,
                "Dispatcher stopped"
            );
        }
        report
    }
}

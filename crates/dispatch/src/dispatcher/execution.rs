use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use chrono::Utc;
use synthpool_core::{
    deadline_after, validate_text, Job, JobId, Payload, SynthError, SynthResult, SynthesisRequest,
};

use crate::future::ResultFuture;
use crate::queue::PushError;
use crate::worker::{millis, Worker};

use super::core::{JobFuture, QueuedJob, Shared};
use super::Dispatcher;

/// Consumption loop run by every worker thread until shutdown.
///
/// Pops the shared queue with a bounded wait so a cleared running flag is
/// noticed within one poll interval.
pub(super) fn worker_loop(mut worker: Worker, shared: Arc<Shared>, poll_interval: Duration) {
    let id = worker.id();
    info!(worker = id, "worker started");

    while shared.running.load(Ordering::Acquire) {
        let Some(QueuedJob { job, slot }) = shared.queue.pop_timeout(poll_interval) else {
            continue;
        };

        if slot.is_settled() || job.is_expired() {
            debug!(worker = id, job = %job.id, "skipping job its caller no longer waits for");
            continue;
        }

        debug!(worker = id, job = %job.id, "dispatching job");
        let result = worker.run(&job);
        let inference_time = result.as_ref().map(|p| p.inference_time).ok();

        if slot.complete(result) {
            match inference_time {
                Some(t) => shared.stats.record_success(t),
                None => shared.stats.record_failure(),
            }
        } else {
            debug!(worker = id, job = %job.id, "discarding result of timed-out job");
        }
    }

    info!(worker = id, "worker stopped");
}

impl Dispatcher {
    /// Submit a job and block until it completes, fails, or times out.
    ///
    /// A full queue is rejected immediately with `QueueFull`; the caller is
    /// never blocked waiting for queue space. On timeout a still-queued job
    /// is removed, and a result produced later by a worker is discarded.
    /// `timeout = None` uses the configured default.
    pub fn submit(&self, request: SynthesisRequest, timeout: Option<Duration>) -> SynthResult<Payload> {
        if !self.is_running() {
            return Err(SynthError::ShuttingDown);
        }
        if self.workers.is_empty() {
            return Err(SynthError::WorkerUnavailable);
        }
        validate_text(&request.text, self.config.max_input_length)?;

        let timeout = timeout.unwrap_or_else(|| self.config.default_timeout());
        let submitted_at = Utc::now();
        let deadline = deadline_after(timeout);
        self.shared.stats.record_submitted();

        let mut accepted: Option<(JobId, Arc<JobFuture>)> = None;
        let pushed = self.shared.queue.try_push_with(|| {
            let id = JobId(self.next_job_id.fetch_add(1, Ordering::Relaxed));
            let job = Job::with_deadline(id, request, submitted_at, deadline);
            let slot = Arc::new(ResultFuture::new());
            accepted = Some((id, Arc::clone(&slot)));
            QueuedJob { job, slot }
        });

        match pushed {
            Ok(()) => {}
            Err(PushError::Full) => {
                self.shared.stats.record_rejected();
                debug!(capacity = self.queue_capacity(), "queue full, rejecting job");
                return Err(SynthError::QueueFull {
                    capacity: self.queue_capacity(),
                });
            }
            Err(PushError::Closed) => {
                self.shared.stats.record_aborted();
                return Err(SynthError::ShuttingDown);
            }
        }
        let Some((job_id, slot)) = accepted else {
            return Err(SynthError::ShuttingDown);
        };

        if let Some(result) = slot.wait_timeout(timeout) {
            return result;
        }

        if self.shared.queue.remove_first(|q| q.job.id == job_id).is_some() {
            debug!(job = %job_id, "removed timed-out job from queue");
        }
        if slot.complete(Err(SynthError::TimedOut(timeout))) {
            self.shared.stats.record_timeout();
            warn!(job = %job_id, timeout_ms = millis(timeout), "job timed out");
            return Err(SynthError::TimedOut(timeout));
        }

        // A worker settled the slot between our wait expiring and our claim.
        slot.wait_timeout(Duration::ZERO)
            .unwrap_or(Err(SynthError::TimedOut(timeout)))
    }
}

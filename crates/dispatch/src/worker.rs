//! Single-concurrency execution unit owning one loaded computation handle.
//!
//! A [`Worker`] lives on its own thread and processes one job at a time,
//! inline. Its observable state lives behind a per-worker lock in a
//! [`WorkerHandle`] so status readers never see a torn busy/job/start-time
//! combination and never contend with other workers.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use synthpool_core::{validate_text, Audio, Job, JobId, Payload, SynthError, SynthResult, SynthesisParams};

use crate::engine::SynthesisEngine;

/// Characters of input text kept in a task descriptor.
const PREVIEW_CHARS: usize = 32;

/// What a busy worker is currently doing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDescriptor {
    pub job_id: JobId,
    pub text_preview: String,
    pub speaker: String,
}

impl TaskDescriptor {
    fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            text_preview: job.preview(PREVIEW_CHARS),
            speaker: job.params.speaker.clone(),
        }
    }
}

/// Busy flag, current job and start time as one value, so they change together.
#[derive(Debug, Default)]
enum Activity {
    #[default]
    Idle,
    Busy {
        task: TaskDescriptor,
        started_at: Instant,
    },
}

#[derive(Debug, Default)]
struct WorkerState {
    activity: Activity,
    jobs_completed: u64,
    jobs_failed: u64,
}

/// Read-only view of one worker for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub id: usize,
    pub busy: bool,
    pub current_task: Option<TaskDescriptor>,
    pub elapsed_ms: Option<u64>,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
}

/// Shared, lock-guarded state of a worker. Cheap to clone via `Arc`.
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    state: Mutex<WorkerState>,
}

impl WorkerHandle {
    fn new(id: usize) -> Self {
        Self {
            id,
            state: Mutex::new(WorkerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.lock().activity, Activity::Busy { .. })
    }

    pub fn status(&self) -> WorkerStatus {
        let state = self.lock();
        let (current_task, elapsed) = match &state.activity {
            Activity::Idle => (None, None),
            Activity::Busy { task, started_at } => (Some(task.clone()), Some(started_at.elapsed())),
        };
        WorkerStatus {
            id: self.id,
            busy: current_task.is_some(),
            current_task,
            elapsed_ms: elapsed.map(millis),
            jobs_completed: state.jobs_completed,
            jobs_failed: state.jobs_failed,
        }
    }

    fn begin(&self, task: TaskDescriptor) {
        self.lock().activity = Activity::Busy {
            task,
            started_at: Instant::now(),
        };
    }

    fn finish(&self, succeeded: bool) {
        let mut state = self.lock();
        state.activity = Activity::Idle;
        if succeeded {
            state.jobs_completed += 1;
        } else {
            state.jobs_failed += 1;
        }
    }
}

pub struct Worker {
    handle: Arc<WorkerHandle>,
    engine: Box<dyn SynthesisEngine>,
    max_input_length: usize,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.handle.id)
            .field("max_input_length", &self.max_input_length)
            .finish_non_exhaustive()
    }
}

impl Worker {
    pub fn new(id: usize, engine: Box<dyn SynthesisEngine>, max_input_length: usize) -> Self {
        Self {
            handle: Arc::new(WorkerHandle::new(id)),
            engine,
            max_input_length,
        }
    }

    pub fn id(&self) -> usize {
        self.handle.id
    }

    pub fn handle(&self) -> Arc<WorkerHandle> {
        Arc::clone(&self.handle)
    }

    /// Process one job inline, blocking for the full inference time.
    ///
    /// Invalid input is rejected before the engine is touched and leaves the
    /// worker state unchanged. Engine errors and panics come back as
    /// `SynthesisFailed`; the worker stays usable either way.
    pub fn run(&mut self, job: &Job) -> SynthResult<Payload> {
        validate_text(&job.text, self.max_input_length)?;

        self.handle.begin(TaskDescriptor::from_job(job));
        let started = Instant::now();
        let outcome = self.invoke(&job.text, &job.params);
        let inference_time = started.elapsed();

        let result = match outcome {
            Ok(audio) => {
                debug!(worker = self.id(), job = %job.id, elapsed_ms = millis(inference_time), "synthesis complete");
                Ok(Payload {
                    job_id: job.id,
                    worker_id: self.id(),
                    text: job.text.clone(),
                    speaker: job.params.speaker.clone(),
                    audio,
                    inference_time,
                })
            }
            Err(message) => {
                warn!(worker = self.id(), job = %job.id, error = %message, "synthesis failed");
                Err(SynthError::SynthesisFailed(message))
            }
        };

        self.handle.finish(result.is_ok());
        result
    }

    /// Exercise a freshly loaded engine once. Does not count as a job.
    pub fn warm_up(&mut self, text: &str) -> Result<Duration, String> {
        let started = Instant::now();
        self.invoke(text, &SynthesisParams::default())?;
        Ok(started.elapsed())
    }

    fn invoke(&mut self, text: &str, params: &SynthesisParams) -> Result<Audio, String> {
        let engine = &mut self.engine;
        match panic::catch_unwind(AssertUnwindSafe(|| engine.synthesize(text, params))) {
            Ok(Ok(audio)) => Ok(audio),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(format!("engine panicked: {}", panic_message(panic.as_ref()))),
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use synthpool_core::config::MAX_TIMEOUT_SECS;
use synthpool_core::{
    Audio, Device, DispatchConfig, EngineError, JobId, SynthError, SynthesisParams, SynthesisRequest,
};

use crate::dispatcher::{BootstrapStage, Dispatcher};
use crate::engine::{EngineLoader, SynthesisEngine};
use crate::error::DispatchError;

/// Loader whose engines sleep for `delay` and fail on texts starting with "fail".
#[derive(Default)]
struct MockLoader {
    delay: Duration,
    fail_load: Vec<usize>,
    panic_load: Vec<usize>,
    /// Workers whose engine errors on every call, warmup included.
    broken: Vec<usize>,
    /// Texts the engines were asked to synthesize, warmup excluded.
    seen: Arc<Mutex<Vec<String>>>,
}

impl MockLoader {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl EngineLoader for MockLoader {
    fn model_name(&self) -> &str {
        "mock-tacotron"
    }

    fn load(&self, worker_id: usize, _device: Device) -> Result<Box<dyn SynthesisEngine>, EngineError> {
        if self.panic_load.contains(&worker_id) {
            panic!("checkpoint truncated");
        }
        if self.fail_load.contains(&worker_id) {
            return Err(EngineError::Load("out of memory".into()));
        }
        Ok(Box::new(MockEngine {
            delay: self.delay,
            broken: self.broken.contains(&worker_id),
            seen: Arc::clone(&self.seen),
            warmed: false,
        }))
    }
}

struct MockEngine {
    delay: Duration,
    broken: bool,
    seen: Arc<Mutex<Vec<String>>>,
    warmed: bool,
}

impl SynthesisEngine for MockEngine {
    fn synthesize(&mut self, text: &str, _params: &SynthesisParams) -> Result<Audio, EngineError> {
        if self.broken {
            return Err(EngineError::Inference("weights corrupted".into()));
        }
        if !self.warmed {
            self.warmed = true;
        } else {
            self.seen.lock().unwrap().push(text.to_string());
            thread::sleep(self.delay);
        }
        if text.starts_with("fail") {
            return Err(EngineError::Inference("decoder did not converge".into()));
        }
        Ok(Audio {
            bytes: text.as_bytes().to_vec(),
            sample_rate: 22050,
            format: "wav".into(),
        })
    }
}

fn config(workers: usize, capacity: usize) -> DispatchConfig {
    DispatchConfig {
        worker_count: workers,
        queue_capacity: capacity,
        default_timeout_secs: 5,
        poll_interval_ms: 20,
        shutdown_timeout_secs: 2,
        ..DispatchConfig::default()
    }
}

fn started(cfg: DispatchConfig, loader: &MockLoader) -> Arc<Dispatcher> {
    let mut dispatcher = Dispatcher::new(cfg).unwrap();
    dispatcher.start(loader).unwrap();
    Arc::new(dispatcher)
}

fn submit_in_background(
    dispatcher: &Arc<Dispatcher>,
    text: &str,
) -> thread::JoinHandle<Result<synthpool_core::Payload, SynthError>> {
    let d = Arc::clone(dispatcher);
    let request = SynthesisRequest::new(text);
    thread::spawn(move || d.submit(request, None))
}

#[test]
fn submit_returns_payload() {
    let loader = MockLoader::default();
    let d = started(config(2, 10), &loader);

    let payload = d.submit(SynthesisRequest::new("你好"), None).unwrap();

    assert_eq!(payload.text, "你好");
    assert_eq!(payload.audio.bytes, "你好".as_bytes());
    assert_eq!(payload.speaker, "default");
    assert!(payload.worker_id < 2);

    let stats = d.statistics();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.succeeded, 1);
    assert!(stats.avg_inference_ms.is_some());
    assert_eq!(loader.seen(), vec!["你好".to_string()]);
}

#[test]
fn custom_params_reach_payload() {
    let loader = MockLoader::default();
    let d = started(config(1, 10), &loader);

    let params = SynthesisParams {
        speaker: "narrator".into(),
        ..SynthesisParams::default()
    };
    let payload = d
        .submit(SynthesisRequest::new("hi").with_params(params), None)
        .unwrap();
    assert_eq!(payload.speaker, "narrator");
}

#[test]
fn job_ids_follow_submission_order() {
    let loader = MockLoader::default();
    let d = started(config(1, 10), &loader);

    let ids: Vec<JobId> = (0..3)
        .map(|i| d.submit(SynthesisRequest::new(format!("n{i}")), None).unwrap().job_id)
        .collect();
    assert_eq!(ids, vec![JobId(1), JobId(2), JobId(3)]);
}

#[test]
fn invalid_input_is_rejected_before_counting() {
    let loader = MockLoader::default();
    let d = started(config(1, 10), &loader);

    let blank = d.submit(SynthesisRequest::new("   "), None).unwrap_err();
    assert!(matches!(blank, SynthError::InvalidInput(_)));

    let long = "字".repeat(501);
    let too_long = d.submit(SynthesisRequest::new(long), None).unwrap_err();
    assert!(matches!(too_long, SynthError::InvalidInput(_)));

    // Exactly at the limit is fine; length counts characters, not bytes.
    let at_limit = "字".repeat(500);
    assert!(d.submit(SynthesisRequest::new(at_limit), None).is_ok());

    let stats = d.statistics();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.finished(), 1);
}

#[test]
fn full_queue_rejects_immediately() {
    let loader = MockLoader::with_delay(Duration::from_millis(300));
    let d = started(config(1, 1), &loader);

    let running = submit_in_background(&d, "first");
    thread::sleep(Duration::from_millis(60));
    let queued = submit_in_background(&d, "second");
    thread::sleep(Duration::from_millis(60));
    assert_eq!(d.queue_len(), 1);

    let t0 = Instant::now();
    let err = d.submit(SynthesisRequest::new("third"), None).unwrap_err();
    assert_eq!(err, SynthError::QueueFull { capacity: 1 });
    assert!(t0.elapsed() < Duration::from_millis(100));

    assert!(running.join().unwrap().is_ok());
    assert!(queued.join().unwrap().is_ok());

    let stats = d.statistics();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.succeeded, 2);
    assert!(!loader.seen().contains(&"third".to_string()));
}

#[test]
fn timeout_of_running_job_discards_late_result() {
    let loader = MockLoader::with_delay(Duration::from_millis(400));
    let d = started(config(1, 10), &loader);

    let timeout = Duration::from_millis(100);
    let err = d
        .submit(SynthesisRequest::new("slow"), Some(timeout))
        .unwrap_err();
    assert_eq!(err, SynthError::TimedOut(timeout));
    assert_eq!(d.queue_len(), 0);

    // Let the worker finish; its result must not change the outcome counters.
    thread::sleep(Duration::from_millis(450));
    let stats = d.statistics();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.succeeded, 0);
    assert_eq!(stats.finished(), stats.submitted);

    assert!(d.submit(SynthesisRequest::new("next"), None).is_ok());
}

#[test]
fn timeout_of_queued_job_removes_it() {
    let loader = MockLoader::with_delay(Duration::from_millis(300));
    let d = started(config(1, 10), &loader);

    let running = submit_in_background(&d, "blocking");
    thread::sleep(Duration::from_millis(50));

    let err = d
        .submit(SynthesisRequest::new("waiting"), Some(Duration::from_millis(100)))
        .unwrap_err();
    assert!(matches!(err, SynthError::TimedOut(_)));
    assert_eq!(d.queue_len(), 0);

    assert!(running.join().unwrap().is_ok());
    thread::sleep(Duration::from_millis(60));
    assert_eq!(loader.seen(), vec!["blocking".to_string()]);
}

#[test]
fn worker_survives_failed_job() {
    let loader = MockLoader::default();
    let d = started(config(1, 10), &loader);

    let err = d.submit(SynthesisRequest::new("fail hard"), None).unwrap_err();
    assert_eq!(err, SynthError::SynthesisFailed("decoder did not converge".into()));

    let payload = d.submit(SynthesisRequest::new("recovered"), None).unwrap();
    assert_eq!(payload.worker_id, 0);

    let stats = d.statistics();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.succeeded, 1);

    let status = &d.worker_statuses()[0];
    assert_eq!(status.jobs_failed, 1);
    assert_eq!(status.jobs_completed, 1);
    assert!(!status.busy);
}

#[test]
fn bootstrap_excludes_failed_workers() {
    let loader = MockLoader {
        fail_load: vec![1],
        panic_load: vec![3],
        broken: vec![2],
        ..MockLoader::default()
    };
    let mut d = Dispatcher::new(config(5, 10)).unwrap();
    let report = d.start(&loader).unwrap();

    assert!(report.is_healthy());
    assert_eq!(report.requested, 5);
    assert_eq!(report.ready, vec![0, 4]);
    assert_eq!(report.device, Device::Cpu);

    let stages: Vec<(usize, BootstrapStage)> =
        report.failures.iter().map(|f| (f.worker_id, f.stage)).collect();
    assert_eq!(
        stages,
        vec![
            (1, BootstrapStage::Load),
            (2, BootstrapStage::Warmup),
            (3, BootstrapStage::Load),
        ]
    );
    assert!(report.failures[2].message.contains("checkpoint truncated"));

    assert_eq!(d.pool_size(), 2);
    assert_eq!(d.requested_workers(), 5);
    let ids: Vec<usize> = d.worker_statuses().iter().map(|w| w.id).collect();
    assert_eq!(ids, vec![0, 4]);

    let payload = d.submit(SynthesisRequest::new("served"), None).unwrap();
    assert!(payload.worker_id == 0 || payload.worker_id == 4);
}

#[test]
fn empty_pool_reports_worker_unavailable() {
    let loader = MockLoader {
        fail_load: vec![0, 1],
        ..MockLoader::default()
    };
    let mut d = Dispatcher::new(config(2, 10)).unwrap();
    let report = d.start(&loader).unwrap();

    assert!(!report.is_healthy());
    assert!(d.is_running());
    assert_eq!(d.pool_size(), 0);

    let err = d.submit(SynthesisRequest::new("anyone?"), None).unwrap_err();
    assert_eq!(err, SynthError::WorkerUnavailable);
    assert_eq!(d.statistics().submitted, 0);
}

#[test]
fn start_twice_is_rejected() {
    let loader = MockLoader::default();
    let mut d = Dispatcher::new(config(1, 10)).unwrap();
    d.start(&loader).unwrap();

    assert!(matches!(d.start(&loader), Err(DispatchError::AlreadyStarted)));
    assert_eq!(d.pool_size(), 1);
}

#[test]
fn invalid_config_is_rejected() {
    let err = Dispatcher::new(config(0, 10)).unwrap_err();
    assert!(matches!(err, DispatchError::Config(_)));
}

#[test]
fn submit_before_start_is_refused() {
    let d = Dispatcher::new(config(1, 10)).unwrap();
    let err = d.submit(SynthesisRequest::new("early"), None).unwrap_err();
    assert_eq!(err, SynthError::ShuttingDown);
}

#[test]
fn busy_flag_tracks_running_job() {
    let loader = MockLoader::with_delay(Duration::from_millis(250));
    let d = started(config(1, 10), &loader);
    assert!(!d.worker_statuses()[0].busy);

    let handle = submit_in_background(&d, "a sentence long enough to be truncated in previews");
    thread::sleep(Duration::from_millis(80));

    let status = &d.worker_statuses()[0];
    assert!(status.busy);
    let task = status.current_task.as_ref().unwrap();
    assert_eq!(task.job_id, JobId(1));
    assert!(task.text_preview.ends_with('…'));
    assert!(status.elapsed_ms.unwrap() >= 50);

    handle.join().unwrap().unwrap();
    let status = &d.worker_statuses()[0];
    assert!(!status.busy);
    assert!(status.current_task.is_none());
    assert_eq!(status.jobs_completed, 1);
}

#[test]
fn shutdown_drains_queue_and_joins_workers() {
    let loader = MockLoader::with_delay(Duration::from_millis(300));
    let d = started(config(1, 10), &loader);

    let in_flight = submit_in_background(&d, "in flight");
    thread::sleep(Duration::from_millis(50));
    let queued = submit_in_background(&d, "queued");
    thread::sleep(Duration::from_millis(50));

    let report = d.shutdown();
    assert_eq!(report.drained, 1);
    assert_eq!(report.joined, 1);
    assert_eq!(report.abandoned, 0);
    assert!(!d.is_running());

    assert!(in_flight.join().unwrap().is_ok());
    assert_eq!(queued.join().unwrap().unwrap_err(), SynthError::ShuttingDown);

    let err = d.submit(SynthesisRequest::new("late"), None).unwrap_err();
    assert_eq!(err, SynthError::ShuttingDown);

    let stats = d.statistics();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.aborted, 1);
    assert_eq!(stats.finished(), stats.submitted);

    let again = d.shutdown();
    assert_eq!(again.drained, 0);
    assert_eq!(again.joined, 0);
}

#[test]
fn shutdown_detaches_worker_past_timeout() {
    let loader = MockLoader::with_delay(Duration::from_millis(400));
    let cfg = DispatchConfig {
        shutdown_timeout_secs: 0,
        ..config(1, 10)
    };
    let d = started(cfg, &loader);

    let in_flight = submit_in_background(&d, "long running");
    thread::sleep(Duration::from_millis(50));

    let report = d.shutdown();
    assert_eq!(report.joined, 0);
    assert_eq!(report.abandoned, 1);

    // The detached worker still completes the job it had started.
    assert!(in_flight.join().unwrap().is_ok());
}

#[test]
fn unbounded_timeout_is_served() {
    let loader = MockLoader::default();
    let d = started(config(1, 10), &loader);

    let payload = d.submit(SynthesisRequest::new("hi"), Some(Duration::MAX)).unwrap();
    assert_eq!(payload.text, "hi");

    let stats = d.statistics();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.finished(), stats.submitted);
    assert!(d.submit(SynthesisRequest::new("again"), None).is_ok());
}

#[test]
fn oversized_default_timeout_is_refused_at_construction() {
    let cfg = DispatchConfig {
        default_timeout_secs: u64::MAX,
        ..config(1, 10)
    };
    assert!(matches!(Dispatcher::new(cfg), Err(DispatchError::Config(_))));

    let loader = MockLoader::default();
    let cfg = DispatchConfig {
        default_timeout_secs: MAX_TIMEOUT_SECS,
        shutdown_timeout_secs: MAX_TIMEOUT_SECS,
        ..config(1, 10)
    };
    let d = started(cfg, &loader);
    assert!(d.submit(SynthesisRequest::new("longest allowed"), None).is_ok());

    let t0 = Instant::now();
    let report = d.shutdown();
    assert_eq!(report.joined, 1);
    assert!(t0.elapsed() < Duration::from_secs(2));
}

#[test]
fn concurrent_status_reads_see_consistent_state() {
    let loader = MockLoader::with_delay(Duration::from_millis(15));
    let d = started(config(2, 64), &loader);
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let d = Arc::clone(&d);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut busy_seen = 0usize;
                while !stop.load(Ordering::Acquire) {
                    for status in d.worker_statuses() {
                        assert_eq!(status.busy, status.current_task.is_some());
                        assert_eq!(status.busy, status.elapsed_ms.is_some());
                        if status.busy {
                            busy_seen += 1;
                        }
                    }
                }
                busy_seen
            })
        })
        .collect();

    let submitters: Vec<_> = (0..6)
        .map(|i| {
            let d = Arc::clone(&d);
            thread::spawn(move || {
                for j in 0..5 {
                    d.submit(SynthesisRequest::new(format!("line {i}-{j}")), None).unwrap();
                }
            })
        })
        .collect();
    for handle in submitters {
        handle.join().unwrap();
    }

    stop.store(true, Ordering::Release);
    let busy_seen: usize = readers.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(busy_seen > 0);

    let completed: u64 = d.worker_statuses().iter().map(|w| w.jobs_completed).sum();
    assert_eq!(completed, 30);
}

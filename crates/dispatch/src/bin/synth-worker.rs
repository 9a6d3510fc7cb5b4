//! synth-worker: boots a synthesis pool and serves requests from stdin.
//!
//! Each input line is one request: plain text, or a JSON
//! `{"text": "...", "params": {...}}` object. The line `:status` prints a
//! status snapshot. Results are written to stdout as one JSON object per line.
//!
//! The bundled engine is a tone generator standing in for a real model: it
//! renders one short sine burst per character as 16-bit PCM after a
//! configurable simulated inference latency.

use std::f32::consts::PI;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{info, warn};

use synthpool_core::config::load_dotenv;
use synthpool_core::{Audio, Device, DispatchConfig, EngineError, SynthesisParams, SynthesisRequest};
use synthpool_dispatch::{
    Dispatcher, EngineLoader, StatusReporter, SynthesisEngine, SystemTelemetry,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Synthesis worker pool fed from stdin.
#[derive(Parser, Debug)]
#[command(name = "synth-worker", version, about)]
struct Cli {
    /// Number of workers (overrides WORKERS).
    #[arg(long)]
    workers: Option<usize>,

    /// Queue capacity (overrides QUEUE_CAPACITY).
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Per-request timeout in seconds (overrides REQUEST_TIMEOUT).
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Maximum input length in characters (overrides MAX_TEXT_LENGTH).
    #[arg(long)]
    max_text_length: Option<usize>,

    /// auto, cpu, cuda or mps (overrides DEVICE).
    #[arg(long)]
    device: Option<Device>,

    /// Simulated inference latency of the demo engine, in milliseconds.
    #[arg(long, env = "DEMO_LATENCY_MS", default_value_t = 250)]
    latency_ms: u64,
}

impl Cli {
    fn apply(&self, config: &mut DispatchConfig) {
        if let Some(v) = self.workers {
            config.worker_count = v;
        }
        if let Some(v) = self.queue_capacity {
            config.queue_capacity = v;
        }
        if let Some(v) = self.timeout_secs {
            config.default_timeout_secs = v;
        }
        if let Some(v) = self.max_text_length {
            config.max_input_length = v;
        }
        if let Some(v) = self.device {
            config.device = v;
        }
    }
}

// ── Demo engine ─────────────────────────────────────────────────────

const TONE_SECS: f32 = 0.05;

struct ToneLoader {
    model_name: String,
    sample_rate: u32,
    latency: Duration,
}

impl EngineLoader for ToneLoader {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn load(&self, worker_id: usize, device: Device) -> Result<Box<dyn SynthesisEngine>, EngineError> {
        if device.is_gpu() {
            return Err(EngineError::Load(format!("tone engine has no {device} backend")));
        }
        info!(worker = worker_id, "loading tone engine");
        Ok(Box::new(ToneEngine {
            sample_rate: self.sample_rate,
            latency: self.latency,
        }))
    }
}

struct ToneEngine {
    sample_rate: u32,
    latency: Duration,
}

impl SynthesisEngine for ToneEngine {
    fn synthesize(&mut self, text: &str, params: &SynthesisParams) -> Result<Audio, EngineError> {
        thread::sleep(self.latency);

        let per_char = (self.sample_rate as f32 * TONE_SECS * params.length_scale.max(0.1)) as usize;
        let mut bytes = Vec::with_capacity(text.chars().count() * per_char * 2);
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            let freq = 200.0 + (u32::from(c) % 40) as f32 * 10.0;
            for n in 0..per_char {
                let t = n as f32 / self.sample_rate as f32;
                let sample = (2.0 * PI * freq * t).sin() * 0.3 * i16::MAX as f32;
                bytes.extend_from_slice(&(sample as i16).to_le_bytes());
            }
        }

        Ok(Audio {
            bytes,
            sample_rate: self.sample_rate,
            format: "pcm_s16le".to_string(),
        })
    }
}

// ── Request handling ────────────────────────────────────────────────

fn parse_line(line: &str) -> Result<SynthesisRequest, serde_json::Error> {
    if line.trim_start().starts_with('{') {
        serde_json::from_str(line)
    } else {
        Ok(SynthesisRequest::new(line))
    }
}

fn handle_request(dispatcher: &Dispatcher, request: SynthesisRequest) -> serde_json::Value {
    match dispatcher.submit(request, None) {
        Ok(payload) => serde_json::json!({
            "success": true,
            "job_id": payload.job_id,
            "worker_id": payload.worker_id,
            "speaker": payload.speaker,
            "sample_rate": payload.audio.sample_rate,
            "format": payload.audio.format,
            "audio_bytes": payload.audio.bytes.len(),
            "inference_ms": payload.inference_time.as_secs_f64() * 1000.0,
        }),
        Err(e) => serde_json::json!({
            "success": false,
            "kind": e.kind(),
            "error": e.to_string(),
            "retryable": e.is_retryable(),
        }),
    }
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let mut config = DispatchConfig::from_env();
    cli.apply(&mut config);
    config.log_summary();

    let loader = ToneLoader {
        model_name: config.model_name.clone(),
        sample_rate: config.sample_rate,
        latency: Duration::from_millis(cli.latency_ms),
    };

    // Bootstrap loads models sequentially; keep it off the async runtime.
    let (dispatcher, report) = tokio::task::spawn_blocking(move || {
        let mut dispatcher = Dispatcher::new(config)?;
        let report = dispatcher.start(&loader)?;
        anyhow::Ok((dispatcher, report))
    })
    .await??;

    if !report.is_healthy() {
        warn!("pool is empty; every request will fail with worker_unavailable");
    }

    let dispatcher = Arc::new(dispatcher);
    let telemetry = Arc::new(SystemTelemetry::new(dispatcher.device()));
    let reporter = StatusReporter::new(Arc::clone(&dispatcher), telemetry);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("synth-worker ready; reading requests from stdin");
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == ":status" {
                    println!("{}", serde_json::to_string(&reporter.snapshot())?);
                    continue;
                }
                match parse_line(line) {
                    Ok(request) => {
                        let d = Arc::clone(&dispatcher);
                        in_flight.spawn_blocking(move || handle_request(&d, request));
                    }
                    Err(e) => warn!(error = %e, "ignoring malformed request line"),
                }
            }
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                println!("{}", done?);
            }
        }
    }

    while let Some(done) = in_flight.join_next().await {
        println!("{}", done?);
    }

    let shutdown_dispatcher = Arc::clone(&dispatcher);
    let shutdown = tokio::task::spawn_blocking(move || shutdown_dispatcher.shutdown()).await?;
    info!(
        drained = shutdown.drained,
        joined = shutdown.joined,
        abandoned = shutdown.abandoned,
        "synth-worker exited"
    );
    println!("{}", serde_json::to_string(&dispatcher.statistics())?);
    Ok(())
}

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Device ────────────────────────────────────────────────────

/// Accelerator preference handed to the engine loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Auto,
    Cpu,
    Cuda,
    Mps,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Mps => "mps",
        }
    }

    pub fn is_gpu(&self) -> bool {
        matches!(self, Self::Cuda | Self::Mps)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "mps" => Ok(Self::Mps),
            other => Err(ConfigError::Invalid {
                field: "device",
                reason: format!("unknown device '{other}' (expected auto, cpu, cuda or mps)"),
            }),
        }
    }
}

// ── Dispatch config ───────────────────────────────────────────

/// Longest accepted request or shutdown timeout (one day).
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Pool and queue settings, read from the environment or deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of workers to bootstrap. Fixed for the process lifetime.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Maximum input length in characters.
    #[serde(default = "default_max_input_length")]
    pub max_input_length: usize,
    /// How long an idle worker blocks on the queue before rechecking shutdown.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub device: Device,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Text synthesized once by every freshly loaded worker.
    #[serde(default = "default_warmup_text")]
    pub warmup_text: String,
}

fn default_worker_count() -> usize { 4 }
fn default_queue_capacity() -> usize { 100 }
fn default_timeout_secs() -> u64 { 30 }
fn default_max_input_length() -> usize { 500 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_shutdown_timeout_secs() -> u64 { 10 }
fn default_model_name() -> String { "tts_models/zh-CN/baker/tacotron2-DDC-GST".to_string() }
fn default_sample_rate() -> u32 { 22050 }
fn default_warmup_text() -> String { "你好世界，这是一个文本转语音的测试。".to_string() }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            default_timeout_secs: default_timeout_secs(),
            max_input_length: default_max_input_length(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            device: Device::default(),
            model_name: default_model_name(),
            sample_rate: default_sample_rate(),
            warmup_text: default_warmup_text(),
        }
    }
}

impl DispatchConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SYNTHPOOL_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("SYNTHPOOL_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let d = Self::default();
        let device = profiled_env_opt(p, "DEVICE")
            .and_then(|v| match v.parse() {
                Ok(device) => Some(device),
                Err(e) => {
                    tracing::warn!("ignoring DEVICE: {}", e);
                    None
                }
            })
            .unwrap_or(d.device);

        Self {
            worker_count: profiled_env_parse(p, "WORKERS", d.worker_count),
            queue_capacity: profiled_env_parse(p, "QUEUE_CAPACITY", d.queue_capacity),
            default_timeout_secs: profiled_env_parse(p, "REQUEST_TIMEOUT", d.default_timeout_secs),
            max_input_length: profiled_env_parse(p, "MAX_TEXT_LENGTH", d.max_input_length),
            poll_interval_ms: profiled_env_parse(p, "POLL_INTERVAL_MS", d.poll_interval_ms),
            shutdown_timeout_secs: profiled_env_parse(p, "SHUTDOWN_TIMEOUT", d.shutdown_timeout_secs),
            device,
            model_name: profiled_env_or(p, "MODEL_NAME", &d.model_name),
            sample_rate: profiled_env_parse(p, "SAMPLE_RATE", d.sample_rate),
            warmup_text: profiled_env_or(p, "WARMUP_TEXT", &d.warmup_text),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be at least 1".to_string(),
                });
            }
            Ok(())
        }
        fn at_most(field: &'static str, value: u64, max: u64) -> Result<(), ConfigError> {
            if value > max {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be at most {max}"),
                });
            }
            Ok(())
        }

        positive("worker_count", self.worker_count as u64)?;
        positive("queue_capacity", self.queue_capacity as u64)?;
        positive("default_timeout_secs", self.default_timeout_secs)?;
        positive("max_input_length", self.max_input_length as u64)?;
        positive("poll_interval_ms", self.poll_interval_ms)?;
        at_most("default_timeout_secs", self.default_timeout_secs, MAX_TIMEOUT_SECS)?;
        at_most("shutdown_timeout_secs", self.shutdown_timeout_secs, MAX_TIMEOUT_SECS)?;
        at_most("poll_interval_ms", self.poll_interval_ms, MAX_TIMEOUT_SECS * 1000)?;
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Dispatch config:");
        tracing::info!("  pool:     workers={}, device={}", self.worker_count, self.device);
        tracing::info!("  queue:    capacity={}, poll={}ms", self.queue_capacity, self.poll_interval_ms);
        tracing::info!(
            "  requests: timeout={}s, max_text_length={}",
            self.default_timeout_secs,
            self.max_input_length
        );
        tracing::info!("  model:    {} @ {}Hz", self.model_name, self.sample_rate);
    }
}

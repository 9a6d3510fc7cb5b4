use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-job failure returned to the caller of `Dispatcher::submit`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("no workers available")]
    WorkerUnavailable,

    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

/// Wire-friendly tag for a [`SynthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    QueueFull,
    TimedOut,
    SynthesisFailed,
    WorkerUnavailable,
    ShuttingDown,
}

impl SynthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::QueueFull { .. } => ErrorKind::QueueFull,
            Self::TimedOut(_) => ErrorKind::TimedOut,
            Self::SynthesisFailed(_) => ErrorKind::SynthesisFailed,
            Self::WorkerUnavailable => ErrorKind::WorkerUnavailable,
            Self::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }

    /// Whether a caller may reasonably back off and submit the same job again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. } | Self::TimedOut(_) | Self::ShuttingDown
        )
    }
}

/// Failure reported by a computation handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    Load(String),

    #[error("{0}")]
    Inference(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("telemetry unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of one synthesis job.
pub type SynthResult<T> = Result<T, SynthError>;

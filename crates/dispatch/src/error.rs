use thiserror::Error;

use synthpool_core::ConfigError;

/// Lifecycle errors raised by the dispatcher itself (never per-job).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("dispatcher already started")]
    AlreadyStarted,
}

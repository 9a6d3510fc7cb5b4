pub mod config;
pub mod error;
pub mod job;

pub use config::{DispatchConfig, Device};
pub use error::*;
pub use job::*;

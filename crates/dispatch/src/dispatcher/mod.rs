//! Bounded-queue dispatcher routing synthesis jobs to a fixed worker pool.
//!
//! Callers block in [`Dispatcher::submit`] on a per-job result future while
//! each worker thread pops the shared queue independently. Only the queue
//! decides which worker takes which job; there is no idle-worker scan.
//!
//! Split into focused submodules:
//! - `core`: Dispatcher struct, constructor, and accessor methods
//! - `lifecycle`: pool bootstrap (load + warmup), thread spawn, and shutdown
//! - `execution`: worker consumption loop and `submit`

mod core;
mod execution;
mod lifecycle;
#[cfg(test)]
mod tests;

pub use self::core::Dispatcher;
pub use self::lifecycle::{BootstrapFailure, BootstrapReport, BootstrapStage, ShutdownReport};

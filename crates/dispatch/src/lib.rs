pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod future;
pub mod queue;
pub mod stats;
pub mod status;
pub mod telemetry;
pub mod worker;

pub use dispatcher::{BootstrapFailure, BootstrapReport, BootstrapStage, Dispatcher, ShutdownReport};
pub use engine::{EngineLoader, SynthesisEngine};
pub use error::DispatchError;
pub use future::ResultFuture;
pub use queue::{BoundedQueue, PushError};
pub use stats::{Statistics, StatisticsSnapshot};
pub use status::{Health, HealthState, QueueStatus, StatusReporter, StatusSnapshot};
pub use telemetry::{AcceleratorInfo, CpuUsage, MemoryUsage, SystemTelemetry, Telemetry};
pub use worker::{TaskDescriptor, Worker, WorkerHandle, WorkerStatus};

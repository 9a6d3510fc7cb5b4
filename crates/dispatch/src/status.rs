//! Read-only status aggregation over a running [`Dispatcher`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::dispatcher::Dispatcher;
use crate::stats::StatisticsSnapshot;
use crate::telemetry::{AcceleratorInfo, CpuUsage, MemoryUsage, Telemetry};
use crate::worker::WorkerStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Liveness answer for external health checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Health {
    pub status: HealthState,
    pub workers: usize,
    pub total_workers: usize,
    pub error: Option<String>,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    pub size: usize,
    pub capacity: usize,
}

/// Everything the transport layer may show about the pool.
///
/// Telemetry fields are `None` when their probe failed.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub health: Health,
    pub captured_at: DateTime<Utc>,
    pub uptime_secs: f64,
    pub model_name: String,
    pub device: String,
    pub pool_size: usize,
    pub requested_workers: usize,
    pub workers: Vec<WorkerStatus>,
    pub queue: QueueStatus,
    pub stats: StatisticsSnapshot,
    pub memory: Option<MemoryUsage>,
    pub cpu: Option<CpuUsage>,
    pub accelerator: Option<AcceleratorInfo>,
}

impl StatusSnapshot {
    pub fn busy_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.busy).count()
    }
}

pub struct StatusReporter {
    dispatcher: Arc<Dispatcher>,
    telemetry: Arc<dyn Telemetry>,
}

impl StatusReporter {
    pub fn new(dispatcher: Arc<Dispatcher>, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            dispatcher,
            telemetry,
        }
    }

    pub fn health(&self) -> Health {
        let d = &self.dispatcher;
        let error = if !d.is_running() {
            Some("dispatcher not running".to_string())
        } else if d.pool_size() == 0 {
            Some("no workers available".to_string())
        } else {
            None
        };

        Health {
            status: if error.is_none() {
                HealthState::Healthy
            } else {
                HealthState::Unhealthy
            },
            workers: d.pool_size(),
            total_workers: d.requested_workers(),
            error,
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let d = &self.dispatcher;

        StatusSnapshot {
            health: self.health(),
            captured_at: Utc::now(),
            uptime_secs: d.uptime().as_secs_f64(),
            model_name: d.model_name().to_string(),
            device: d.device().to_string(),
            pool_size: d.pool_size(),
            requested_workers: d.requested_workers(),
            workers: d.worker_statuses(),
            queue: QueueStatus {
                size: d.queue_len(),
                capacity: d.queue_capacity(),
            },
            stats: d.statistics(),
            memory: probe("memory", || self.telemetry.memory()),
            cpu: probe("cpu", || self.telemetry.cpu()),
            accelerator: probe("accelerator", || self.telemetry.accelerator()),
        }
    }
}

fn probe<T, E: std::fmt::Display>(name: &str, f: impl FnOnce() -> Result<T, E>) -> Option<T> {
    match f() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(probe = name, error = %e, "telemetry probe failed; omitting from status");
            None
        }
    }
}

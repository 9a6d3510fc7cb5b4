//! Best-effort host telemetry for status snapshots.
//!
//! Every probe returns a `Result`; the status reporter drops a failed probe's
//! field instead of failing the whole snapshot.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use synthpool_core::{Device, TelemetryError};

const MB: f64 = 1024.0 * 1024.0;

/// Frequencies at or below this are treated as bogus readings.
const MIN_PLAUSIBLE_FREQ_MHZ: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub rss_mb: f64,
    pub vms_mb: f64,
    /// Process RSS as a share of total system memory.
    pub percent: f64,
    pub system_total_mb: f64,
    pub system_available_mb: f64,
    pub system_used_mb: f64,
    pub system_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuUsage {
    pub process_percent: f64,
    pub system_percent: f64,
    pub core_count: usize,
    pub frequency_mhz: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceleratorInfo {
    pub available: bool,
    pub device_type: String,
    pub memory_total_mb: Option<f64>,
    pub memory_used_mb: Option<f64>,
    pub message: Option<String>,
}

/// Host metrics source consumed by the status reporter.
pub trait Telemetry: Send + Sync {
    fn memory(&self) -> Result<MemoryUsage, TelemetryError>;

    fn cpu(&self) -> Result<CpuUsage, TelemetryError>;

    fn accelerator(&self) -> Result<AcceleratorInfo, TelemetryError>;
}

/// [`Telemetry`] backed by `sysinfo`.
///
/// CPU percentages are deltas between successive calls, so the first
/// reading after construction is 0.
pub struct SystemTelemetry {
    system: Mutex<System>,
    pid: Option<Pid>,
    device: Device,
}

impl SystemTelemetry {
    /// `device` is the accelerator the pool resolved at bootstrap.
    pub fn new(device: Device) -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
            device,
        }
    }

    fn pid(&self) -> Result<Pid, TelemetryError> {
        self.pid
            .ok_or_else(|| TelemetryError::Unavailable("current process id unknown".to_string()))
    }

    fn refresh_process(system: &mut System, pid: Pid, kind: ProcessRefreshKind) {
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, kind);
    }
}

impl Telemetry for SystemTelemetry {
    fn memory(&self) -> Result<MemoryUsage, TelemetryError> {
        let pid = self.pid()?;
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();
        Self::refresh_process(&mut system, pid, ProcessRefreshKind::nothing().with_memory());

        let process = system
            .process(pid)
            .ok_or_else(|| TelemetryError::Unavailable(format!("process {pid} not found")))?;
        let total = system.total_memory() as f64;
        if total == 0.0 {
            return Err(TelemetryError::Unavailable("system memory unreported".to_string()));
        }
        let rss = process.memory() as f64;
        let used = system.used_memory() as f64;

        Ok(MemoryUsage {
            rss_mb: rss / MB,
            vms_mb: process.virtual_memory() as f64 / MB,
            percent: rss / total * 100.0,
            system_total_mb: total / MB,
            system_available_mb: system.available_memory() as f64 / MB,
            system_used_mb: used / MB,
            system_percent: used / total * 100.0,
        })
    }

    fn cpu(&self) -> Result<CpuUsage, TelemetryError> {
        let pid = self.pid()?;
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu_usage();
        system.refresh_cpu_frequency();
        Self::refresh_process(&mut system, pid, ProcessRefreshKind::nothing().with_cpu());

        let process_percent = system.process(pid).map(|p| p.cpu_usage()).unwrap_or(0.0);
        let frequency_mhz = system
            .cpus()
            .first()
            .map(|c| c.frequency())
            .filter(|&f| f > MIN_PLAUSIBLE_FREQ_MHZ);

        Ok(CpuUsage {
            process_percent: round2(f64::from(process_percent)),
            system_percent: round2(f64::from(system.global_cpu_usage())),
            core_count: system.cpus().len(),
            frequency_mhz,
        })
    }

    fn accelerator(&self) -> Result<AcceleratorInfo, TelemetryError> {
        Ok(accelerator_for(self.device))
    }
}

/// Accelerator summary for a resolved device. No vendor API is queried, so
/// GPU memory totals are left unset.
pub fn accelerator_for(device: Device) -> AcceleratorInfo {
    if device.is_gpu() {
        AcceleratorInfo {
            available: true,
            device_type: device.as_str().to_string(),
            memory_total_mb: None,
            memory_used_mb: None,
            message: Some("device memory statistics not reported".to_string()),
        }
    } else {
        AcceleratorInfo {
            available: false,
            device_type: Device::Cpu.as_str().to_string(),
            memory_total_mb: None,
            memory_used_mb: None,
            message: Some("No GPU acceleration available".to_string()),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

//! GPU detection

use nvml_wrapper::Nvml;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::GpuqResult;

/// Represents a GPU device as reported by the driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuDevice {
    /// Device index (PCI bus order)
    pub index: u32,
    /// Driver-assigned UUID, if reported
    pub uuid: Option<String>,
    /// Device name
    pub name: String,
    /// Total memory in bytes
    pub memory_total: u64,
    /// Free memory in bytes
    pub memory_free: u64,
    /// Current compute utilization percentage (0-100)
    pub utilization: Option<u32>,
}

impl GpuDevice {
    /// The metric the default selection policy maximizes
    pub fn free_capacity(&self) -> u64 {
        self.memory_free
    }

    /// Share of device memory in use, as a percentage
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_total == 0 {
            return 0.0;
        }
        let used = self.memory_total.saturating_sub(self.memory_free);
        used as f64 / self.memory_total as f64 * 100.0
    }

    /// Free memory in MiB
    pub fn memory_free_mib(&self) -> u64 {
        self.memory_free / (1024 * 1024)
    }
}

/// Detect NVIDIA GPUs using NVML
///
/// Every call takes a fresh reading; utilization changes outside of gpuq's
/// control, so nothing is cached between calls.
pub fn detect_gpus() -> GpuqResult<Vec<GpuDevice>> {
    let nvml = Nvml::init()?;
    let count = nvml.device_count()?;

    let mut devices = Vec::with_capacity(count as usize);
    for index in 0..count {
        let device = nvml.device_by_index(index)?;
        let memory = device.memory_info()?;

        devices.push(GpuDevice {
            index,
            uuid: device.uuid().ok(),
            name: device.name()?,
            memory_total: memory.total,
            memory_free: memory.free,
            utilization: device.utilization_rates().ok().map(|u| u.gpu),
        });
    }

    debug!(count = devices.len(), "Queried GPU inventory");
    Ok(devices)
}

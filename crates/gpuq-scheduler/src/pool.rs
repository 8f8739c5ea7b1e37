//! Resource pool: which devices are free, which one to take, and taking it

use gpuq_core::{detect_gpus, GpuDevice, GpuqResult, SelectionConfig};
use std::sync::Arc;
use tracing::debug;

use crate::binding::EnvBinder;
use crate::placement::{policy_for, select_best, MostFreeMemory, PriorityPolicy};
use crate::traits::{Binder, Inventory};

/// Inventory backed by NVML
#[derive(Debug, Clone, Copy, Default)]
pub struct NvmlInventory;

impl Inventory for NvmlInventory {
    fn enumerate(&self) -> GpuqResult<Vec<GpuDevice>> {
        detect_gpus()
    }
}

/// Thresholds a device must meet to be offered for claiming
///
/// Utilization limits are exclusive: a device sitting exactly at the limit is
/// already busy. A device claimed by another process shows up here once its
/// work starts, which is what keeps it from being handed out twice.
#[derive(Debug, Clone)]
pub struct AvailabilityFilter {
    /// Compute utilization must be below this, percent
    pub max_gpu_utilization: u32,
    /// Memory utilization must be below this, percent
    pub max_memory_utilization: u32,
    /// Minimum free memory, MiB
    pub min_free_memory_mib: u64,
    /// Device indices never offered
    pub exclude: Vec<u32>,
}

impl AvailabilityFilter {
    /// Filter that admits every device, however loaded
    pub fn permissive() -> Self {
        Self {
            max_gpu_utilization: u32::MAX,
            max_memory_utilization: u32::MAX,
            min_free_memory_mib: 0,
            exclude: Vec::new(),
        }
    }

    /// Whether `device` may be offered
    pub fn admits(&self, device: &GpuDevice) -> bool {
        !self.exclude.contains(&device.index)
            && device.utilization.unwrap_or(0) < self.max_gpu_utilization
            && device.memory_utilization() < f64::from(self.max_memory_utilization)
            && device.memory_free_mib() >= self.min_free_memory_mib
    }
}

impl From<&SelectionConfig> for AvailabilityFilter {
    fn from(config: &SelectionConfig) -> Self {
        Self {
            max_gpu_utilization: config.max_gpu_utilization,
            max_memory_utilization: config.max_memory_utilization,
            min_free_memory_mib: config.min_free_memory_mib,
            exclude: config.exclude.clone(),
        }
    }
}

/// Pool of interchangeable devices
///
/// Selection is pure; [`ResourcePool::bind`] is the only operation with a
/// side effect.
pub struct ResourcePool {
    inventory: Arc<dyn Inventory>,
    binder: Arc<dyn Binder>,
    policy: Arc<dyn PriorityPolicy>,
    filter: AvailabilityFilter,
}

impl ResourcePool {
    /// Create a pool that ranks by free memory and applies the default
    /// availability thresholds
    pub fn new(inventory: Arc<dyn Inventory>, binder: Arc<dyn Binder>) -> Self {
        Self {
            inventory,
            binder,
            policy: Arc::new(MostFreeMemory),
            filter: AvailabilityFilter::from(&SelectionConfig::default()),
        }
    }

    /// NVML inventory and environment binding, ranked and filtered per `config`
    pub fn from_config(config: &SelectionConfig) -> Self {
        Self::new(Arc::new(NvmlInventory), Arc::new(EnvBinder))
            .with_policy(policy_for(config.policy))
            .with_filter(config.into())
    }

    /// Replace the ranking policy
    pub fn with_policy(mut self, policy: Arc<dyn PriorityPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the availability filter
    pub fn with_filter(mut self, filter: AvailabilityFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Devices currently offered for claiming; empty when none are
    pub fn list_available(&self) -> GpuqResult<Vec<GpuDevice>> {
        let available: Vec<GpuDevice> = self
            .inventory
            .enumerate()?
            .into_iter()
            .filter(|d| {
                let admitted = self.filter.admits(d);
                if !admitted {
                    debug!(gpu = d.index, "GPU not available");
                }
                admitted
            })
            .collect();

        Ok(available)
    }

    /// Best candidate among `devices`, or `None` if there are none
    pub fn select_best(&self, devices: &[GpuDevice]) -> Option<GpuDevice> {
        select_best(self.policy.as_ref(), devices).cloned()
    }

    /// Bind the calling process to `device`
    pub fn bind(&self, device: &GpuDevice) -> GpuqResult<()> {
        self.binder.apply(device)
    }

    /// Whether the process's device context is already set up
    pub fn is_bound(&self) -> bool {
        self.binder.is_initialized()
    }

    /// Every device with its availability, for display
    pub fn survey(&self) -> GpuqResult<Vec<GpuDeviceStatus>> {
        Ok(self
            .inventory
            .enumerate()?
            .into_iter()
            .map(|device| GpuDeviceStatus {
                available: self.filter.admits(&device),
                device,
            })
            .collect())
    }
}

/// GPU device with availability status
#[derive(Debug, Clone)]
pub struct GpuDeviceStatus {
    /// Device information
    pub device: GpuDevice,
    /// Whether this device passes the availability filter
    pub available: bool,
}

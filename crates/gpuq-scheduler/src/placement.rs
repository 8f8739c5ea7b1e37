//! Device ranking

use gpuq_core::{GpuDevice, SelectionPolicy};
use std::cmp::Ordering;
use std::sync::Arc;

/// Strategy for ranking candidate devices
pub trait PriorityPolicy: Send + Sync {
    /// `Greater` means `a` is the better choice
    fn rank(&self, a: &GpuDevice, b: &GpuDevice) -> Ordering;
}

/// Prefer the device with the most free memory
pub struct MostFreeMemory;

impl PriorityPolicy for MostFreeMemory {
    fn rank(&self, a: &GpuDevice, b: &GpuDevice) -> Ordering {
        a.free_capacity().cmp(&b.free_capacity())
    }
}

/// Prefer the least busy device, then the one with the most free memory.
/// Devices that do not report utilization rank as fully busy.
pub struct LeastUtilized;

impl PriorityPolicy for LeastUtilized {
    fn rank(&self, a: &GpuDevice, b: &GpuDevice) -> Ordering {
        let busy = |d: &GpuDevice| d.utilization.unwrap_or(100);
        busy(b)
            .cmp(&busy(a))
            .then_with(|| a.free_capacity().cmp(&b.free_capacity()))
    }
}

/// Policy implementation for a configured policy name
pub fn policy_for(policy: SelectionPolicy) -> Arc<dyn PriorityPolicy> {
    match policy {
        SelectionPolicy::MostFreeMemory => Arc::new(MostFreeMemory),
        SelectionPolicy::LeastUtilized => Arc::new(LeastUtilized),
    }
}

/// Highest-ranked device; ties go to the one seen first
pub fn select_best<'a>(
    policy: &dyn PriorityPolicy,
    devices: &'a [GpuDevice],
) -> Option<&'a GpuDevice> {
    devices.iter().fold(None, |best, candidate| match best {
        Some(current) if policy.rank(candidate, current) != Ordering::Greater => Some(current),
        _ => Some(candidate),
    })
}

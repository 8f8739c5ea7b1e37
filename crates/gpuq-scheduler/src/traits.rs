//! Seams to the outside world: device inventory and device binding

use gpuq_core::{GpuDevice, GpuqResult};

/// Source of the current device inventory
pub trait Inventory: Send + Sync {
    /// Every device with its current readings. Called once per poll while at
    /// the head of the queue, so implementations must not cache.
    fn enumerate(&self) -> GpuqResult<Vec<GpuDevice>>;
}

/// Commits the calling process to a single device
pub trait Binder: Send + Sync {
    /// Whether the process's device context has already been set up, or its
    /// device visibility already fixed by someone else
    fn is_initialized(&self) -> bool;

    /// Bind the process to `device`. Called at most once per process.
    fn apply(&self, device: &GpuDevice) -> GpuqResult<()>;
}

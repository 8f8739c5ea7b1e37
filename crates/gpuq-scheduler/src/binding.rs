//! Binding the process to a single device through CUDA's visibility variables

use gpuq_core::{GpuDevice, GpuqError, GpuqResult};
use std::sync::OnceLock;
use tracing::info;

use crate::traits::Binder;

const VISIBLE_DEVICES: &str = "CUDA_VISIBLE_DEVICES";

/// Device index this process is bound to, set at most once
static BOUND_DEVICE: OnceLock<u32> = OnceLock::new();

/// Binds by restricting CUDA device visibility for this process and every
/// child it spawns afterwards.
///
/// Must run before anything in the process initializes a CUDA context; a
/// context created earlier has already picked its devices. A process started
/// with `CUDA_VISIBLE_DEVICES` already set counts as initialized too: binding
/// would replace a restriction chosen by someone else.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvBinder;

impl Binder for EnvBinder {
    fn is_initialized(&self) -> bool {
        BOUND_DEVICE.get().is_some() || std::env::var_os(VISIBLE_DEVICES).is_some()
    }

    fn apply(&self, device: &GpuDevice) -> GpuqResult<()> {
        if BOUND_DEVICE.get().is_none() {
            if let Some(preset) = std::env::var_os(VISIBLE_DEVICES) {
                return Err(GpuqError::Bind(format!(
                    "{} is already set to {:?}",
                    VISIBLE_DEVICES, preset
                )));
            }
        }

        BOUND_DEVICE.set(device.index).map_err(|_| {
            GpuqError::Bind(format!(
                "process is already bound to GPU {}",
                bound_device().map_or_else(|| "?".to_string(), |i| i.to_string())
            ))
        })?;

        for (key, value) in visible_devices_env(device) {
            std::env::set_var(key, value);
        }

        info!(gpu = device.index, name = %device.name, "Bound process to GPU");
        Ok(())
    }
}

/// Device index chosen by [`EnvBinder`], if any
pub fn bound_device() -> Option<u32> {
    BOUND_DEVICE.get().copied()
}

/// Environment that makes `device` the only visible CUDA device, numbered as
/// NVML numbers it
pub fn visible_devices_env(device: &GpuDevice) -> [(&'static str, String); 2] {
    [
        ("CUDA_DEVICE_ORDER", "PCI_BUS_ID".to_string()),
        (VISIBLE_DEVICES, device.index.to_string()),
    ]
}

//! CLI commands implementation

use anyhow::{Context, Result};
use gpuq_core::GpuqConfig;
use gpuq_queue::TicketQueue;
use gpuq_scheduler::binding::visible_devices_env;
use gpuq_scheduler::ResourcePool;
use tokio::process::Command;
use tracing::{debug, info};

/// Print every live ticket, oldest first
pub fn list(config: &GpuqConfig) -> Result<()> {
    let queue = TicketQueue::open(&config.queue)?;
    for ticket in queue.list()? {
        println!("{}", ticket);
    }
    Ok(())
}

/// Wait for a GPU, then run `command` on it and return its exit code
pub async fn run(config: &GpuqConfig, command: Vec<String>) -> Result<i32> {
    let (program, args) = command
        .split_first()
        .context("no command given")?;

    // Keep our place in the queue if the launching terminal goes away
    crate::hangup::ignore_hangup().context("failed to ignore SIGHUP")?;
    debug!("Ignoring SIGHUP while queued");

    let device = gpuq_scheduler::wait_for_turn(config).await?;

    let mut cmd = Command::new(program);
    cmd.args(args).envs(visible_devices_env(&device));

    info!(gpu = device.index, program = %program, "Running command");
    let status = cmd
        .status()
        .await
        .with_context(|| format!("failed to run {}", program))?;

    debug!(status = %status, "Command finished");
    Ok(status.code().unwrap_or(1))
}

/// Show GPU information
pub fn gpus(config: &GpuqConfig) -> Result<()> {
    let pool = ResourcePool::from_config(&config.selection);
    let devices = pool.survey()?;

    let available = devices.iter().filter(|s| s.available).count();
    println!("GPUs: {} total, {} available", devices.len(), available);

    if !devices.is_empty() {
        println!();
        for status in devices {
            let device = status.device;
            let mem_total = device.memory_total / (1024 * 1024);
            let mem_free = device.memory_free / (1024 * 1024);
            let utilization = device
                .utilization
                .map_or_else(|| "?".to_string(), |u| format!("{}%", u));
            println!(
                "[{}] {} - {}/{} MiB free - {} busy - {}",
                device.index,
                device.name,
                mem_free,
                mem_total,
                utilization,
                if status.available {
                    "Available"
                } else {
                    "In Use"
                }
            );
        }
    }

    Ok(())
}

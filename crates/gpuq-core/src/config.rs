//! Configuration types for gpuq

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuqConfig {
    /// Durable queue configuration
    pub queue: QueueConfig,
    /// Polling loop configuration
    pub arbiter: ArbiterConfig,
    /// Device selection configuration
    pub selection: SelectionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl GpuqConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::GpuqError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::GpuqError::Config(format!("Failed to read config file: {}", e))
        })?;
        toml::from_str(&content)
            .map_err(|e| crate::GpuqError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Durable queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Directory holding the queue state and its lock file
    pub path: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/gpuq"),
        }
    }
}

/// Polling loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Seconds to sleep before each check of the queue head
    pub poll_interval_secs: u64,
}

impl ArbiterConfig {
    /// Poll interval as a `Duration`, never shorter than one second
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
        }
    }
}

/// Device selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Ranking used to pick among available devices
    pub policy: SelectionPolicy,
    /// Only devices whose compute utilization (percent) is below this are offered
    pub max_gpu_utilization: u32,
    /// Only devices whose memory in use (percent) is below this are offered
    pub max_memory_utilization: u32,
    /// Devices with less free memory than this (MiB) are not offered
    pub min_free_memory_mib: u64,
    /// Device indices that are never offered
    pub exclude: Vec<u32>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::MostFreeMemory,
            max_gpu_utilization: 30,
            max_memory_utilization: 5,
            min_free_memory_mib: 0,
            exclude: Vec::new(),
        }
    }
}

/// Device ranking policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Prefer the device with the most free memory
    MostFreeMemory,
    /// Prefer the device with the lowest compute utilization
    LeastUtilized,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GpuqConfig::default();
        assert_eq!(config.queue.path, PathBuf::from("/tmp/gpuq"));
        assert_eq!(config.arbiter.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.selection.policy, SelectionPolicy::MostFreeMemory);
        assert_eq!(config.selection.max_gpu_utilization, 30);
        assert_eq!(config.selection.max_memory_utilization, 5);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let config = ArbiterConfig {
            poll_interval_secs: 0,
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_config_parse() {
        let toml_str = r#"
[queue]
path = "/var/run/gpuq"

[arbiter]
poll_interval_secs = 5

[selection]
policy = "least-utilized"
max_memory_utilization = 10
exclude = [3]
"#;
        let config: GpuqConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.queue.path, PathBuf::from("/var/run/gpuq"));
        assert_eq!(config.arbiter.poll_interval_secs, 5);
        assert_eq!(config.selection.policy, SelectionPolicy::LeastUtilized);
        assert_eq!(config.selection.max_memory_utilization, 10);
        assert_eq!(config.selection.max_gpu_utilization, 30);
        assert_eq!(config.selection.exclude, vec![3]);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_from_missing_file() {
        let err = GpuqConfig::from_file(std::path::Path::new("/nonexistent/gpuq.toml"))
            .unwrap_err();
        assert!(matches!(err, crate::GpuqError::Config(_)));
    }
}

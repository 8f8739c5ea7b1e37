//! Error types for gpuq

use thiserror::Error;

use crate::HolderId;

/// Main error type for gpuq
#[derive(Error, Debug)]
pub enum GpuqError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The durable queue is unreachable or corrupt
    #[error("Storage error: {0}")]
    Storage(String),

    /// Pruning left no tickets in the queue
    #[error("Queue is empty")]
    QueueEmpty,

    /// A pop was attempted by someone other than the current head
    #[error("Ticket of holder {expected} is not at the head of the queue (head: {actual})")]
    NotHead {
        /// Holder of the ticket the caller tried to pop
        expected: HolderId,
        /// Holder currently at the head, if any
        actual: String,
    },

    /// Binding the process to a device failed
    #[error("Bind error: {0}")]
    Bind(String),

    /// Arbitration was requested in a state where it can no longer be honoured
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// GPU inventory error
    #[error("GPU error: {0}")]
    Gpu(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for gpuq operations
pub type GpuqResult<T> = Result<T, GpuqError>;

impl From<serde_json::Error> for GpuqError {
    fn from(err: serde_json::Error) -> Self {
        GpuqError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GpuqError {
    fn from(err: toml::de::Error) -> Self {
        GpuqError::Config(err.to_string())
    }
}

impl From<nvml_wrapper::error::NvmlError> for GpuqError {
    fn from(err: nvml_wrapper::error::NvmlError) -> Self {
        GpuqError::Gpu(err.to_string())
    }
}

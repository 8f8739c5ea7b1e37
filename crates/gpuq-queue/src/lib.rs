//! gpuq-queue: Durable ticket queue
//!
//! This crate provides the queue every contending process shares:
//! - Crash-safe file storage guarded by `flock`
//! - Liveness checks for ticket holders
//! - FIFO ticket operations with stale-entry pruning

pub mod liveness;
pub mod lock;
pub mod queue;
pub mod store;

pub use liveness::{LivenessOracle, ProcessLiveness};
pub use queue::TicketQueue;
pub use store::{FileQueueStore, MemoryQueueStore, QueueStore};

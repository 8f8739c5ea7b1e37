//! gpuq-scheduler: Device arbitration for gpuq
//!
//! This crate decides which process gets which GPU:
//! - Device inventory and binding seams
//! - Availability filtering and device ranking
//! - The polling arbiter that serializes claims in queue order

pub mod arbiter;
pub mod binding;
pub mod placement;
pub mod pool;
pub mod traits;

pub use arbiter::{wait_for_turn, Arbiter, ArbiterState, PollOutcome};
pub use binding::EnvBinder;
pub use placement::PriorityPolicy;
pub use pool::{AvailabilityFilter, NvmlInventory, ResourcePool};
pub use traits::{Binder, Inventory};

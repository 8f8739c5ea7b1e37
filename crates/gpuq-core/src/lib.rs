//! gpuq-core: Core types for the gpuq arbiter
//!
//! This crate provides the fundamental types shared by the other gpuq crates:
//! - Tickets and holder identities
//! - GPU device descriptions and NVML inventory queries
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod gpu;
pub mod ticket;

pub use config::*;
pub use error::*;
pub use gpu::*;
pub use ticket::*;

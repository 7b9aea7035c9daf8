//! Inference-Warden Library
//!
//! Supervises a fleet of long-running worker processes: per-worker stall
//! detection and restart, process-tree termination, staggered startup,
//! periodic fleet restarts and signal-driven shutdown.

#[cfg(not(unix))]
compile_error!("inference-warden manages POSIX process trees and requires a unix target");

pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod platform;
pub mod signal;
pub mod supervisor;
pub mod terminator;
pub mod utils;
pub mod worker;

// Re-export commonly used types for convenience
pub use config::SupervisorConfig;
pub use crate::core::models::*;
pub use error::{SupervisorError, SupervisorResult};
pub use supervisor::FleetSupervisor;
pub use terminator::{ProcessTerminator, Termination};
pub use worker::{run_worker, WorkerLoop};

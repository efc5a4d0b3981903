//! Core orchestration logic.
//!
//! This module contains:
//! - Plan: provisioning plan definitions and loading
//! - StateStore/RunLock: durable phase journal and run-level locking
//! - Driver: the pipeline loop walking phases through the bridge

pub mod driver;
pub mod plan;
pub mod state;

// Re-export commonly used types
pub use driver::{Driver, DriverPaths, PipelineError};
pub use plan::{CompletionCheck, ForceSpec, Phase, PhaseKind, Plan, PlanDefaults};
pub use state::{LockError, RunLock, StateStore};

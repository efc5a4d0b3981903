//! provis - Remote provisioning pipeline for a sandboxed device environment
//!
//! Drives a multi-phase installation pipeline against a single remote
//! sandbox reached through a debug-bridge process.
//!
//! # Architecture
//!
//! - Every remote invocation goes through one execution bridge, which
//!   assembles the environment and quoting in a single place
//! - Phase transitions are appended to a durable journal; an interrupted
//!   run resumes at the first non-completed phase
//! - Cross-build phases get placeholder libraries for target-runtime
//!   libraries that only exist on the device
//!
//! # Modules
//!
//! - `bridge`: Execution bridge to the remote sandbox
//! - `core`: Plan model, phase state store, pipeline driver
//! - `shim`: Placeholder-library resolver for cross-builds
//! - `collect`: Build-artifact collection into stable buckets
//! - `domain`: Data structures (RemoteCommand, records, reports)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a provisioning plan end to end
//! provis run plans/provision.yaml
//!
//! # Re-run a single phase, ignoring its completed marker
//! provis phase plans/provision.yaml native-xbuild --force
//!
//! # Inspect persisted phase state
//! provis status
//! ```

pub mod bridge;
pub mod cli;
pub mod collect;
pub mod config;
pub mod core;
pub mod domain;
pub mod shim;

// Re-export main types at crate root for convenience
pub use bridge::{AdbBridge, Bridge, BridgeError};
pub use collect::ArtifactCollector;
pub use core::{Driver, ForceSpec, Phase, PipelineError, Plan, RunLock, StateStore};
pub use domain::{
    Artifact, ArtifactKind, CollectionSummary, ExecutionResult, FailureKind, PhaseOutcome,
    PhaseRecord, PhaseStatus, PipelineOutcome, PipelineReport, RemoteCommand,
};
pub use shim::{ShimDirectory, ShimError, ShimResolver};

//! Domain types for the provisioning pipeline.
//!
//! This module contains the core data structures:
//! - RemoteCommand/ExecutionResult: the bridge's request and reply shapes
//! - PhaseRecord: durable per-phase state transitions
//! - Artifact: collected build outputs
//! - PipelineReport: the final per-phase outcome summary

pub mod artifact;
pub mod command;
pub mod record;
pub mod report;

// Re-export commonly used types
pub use artifact::{Artifact, ArtifactKind, CollectionSummary};
pub use command::{shell_quote, ExecutionResult, RemoteCommand};
pub use record::{FailureKind, PhaseRecord, PhaseStatus};
pub use report::{PhaseOutcome, PipelineOutcome, PipelineReport};

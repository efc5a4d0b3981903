//! Durable per-phase state records.
//!
//! Every phase transition is appended to a journal as one of these
//! records. Replaying the journal reconstructs the pipeline's progress, so
//! a process restart resumes at the first non-completed phase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One appended phase transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// Phase identifier (unique within a plan)
    pub phase_id: String,

    /// The state the phase transitioned into
    pub status: PhaseStatus,

    /// When this transition was recorded
    pub attempted_at: DateTime<Utc>,

    /// Time taken in milliseconds (for terminal transitions)
    pub duration_ms: Option<u64>,

    /// Error message if the phase failed
    pub error: Option<String>,

    /// Classified failure cause if the phase failed
    pub failure_kind: Option<FailureKind>,
}

impl PhaseRecord {
    /// Create a record for a transition happening now
    pub fn new(phase_id: impl Into<String>, status: PhaseStatus) -> Self {
        Self {
            phase_id: phase_id.into(),
            status,
            attempted_at: Utc::now(),
            duration_ms: None,
            error: None,
            failure_kind: None,
        }
    }

    /// Attach a duration
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attach an error message
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach a classified failure cause
    pub fn with_failure_kind(mut self, kind: FailureKind) -> Self {
        self.failure_kind = Some(kind);
        self
    }
}

/// Lifecycle state of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Not yet started
    Pending,

    /// Currently executing through the bridge
    Running,

    /// Completion check satisfied
    Completed,

    /// Terminal failure
    Failed,

    /// Not executed (prior completed marker, or the pipeline halted first)
    Skipped,
}

impl PhaseStatus {
    /// Whether the phase reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Classified cause of a phase failure.
///
/// Timeouts are treated like non-zero exits for halt/continue policy but
/// recorded distinctly for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The transport could not reach the remote target
    BridgeUnavailable,

    /// The remote command exited non-zero
    NonZeroExit,

    /// No response within the configured bound
    Timeout,

    /// Placeholder-library generation failed
    ShimGeneration,

    /// The command exited zero but the completion check was not satisfied
    CompletionUnmet,
}

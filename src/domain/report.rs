//! Final pipeline report.
//!
//! The report enumerates every phase of the plan with its terminal
//! status, including phases never reached after a halt, so a human can
//! see at a glance what needs manual intervention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::CollectionSummary;
use super::record::{FailureKind, PhaseStatus};

/// Outcome of one phase within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseOutcome {
    /// Phase identifier
    pub phase_id: String,

    /// Terminal status for this run
    pub status: PhaseStatus,

    /// Classified failure cause, if failed
    pub failure_kind: Option<FailureKind>,

    /// Error message, if failed
    pub error: Option<String>,

    /// Time taken in milliseconds, if executed
    pub duration_ms: Option<u64>,

    /// Placeholder libraries substituted for this phase's link step
    pub shims: Vec<String>,

    /// Human-readable detail ("already completed", "not reached", ...)
    pub note: Option<String>,
}

impl PhaseOutcome {
    /// A phase that has not been looked at yet
    pub fn pending(phase_id: impl Into<String>) -> Self {
        Self {
            phase_id: phase_id.into(),
            status: PhaseStatus::Pending,
            failure_kind: None,
            error: None,
            duration_ms: None,
            shims: Vec::new(),
            note: None,
        }
    }
}

/// Overall result of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// Every phase completed or was legitimately skipped
    Succeeded,

    /// Completed, but one or more best-effort phases failed
    Degraded,

    /// Halted on a hard phase failure (or the bridge was unreachable)
    Halted,
}

impl PipelineOutcome {
    /// Process exit code for this outcome.
    ///
    /// 0 = full success, 1 = halted, 2 = completed with best-effort
    /// failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::Halted => 1,
            Self::Degraded => 2,
        }
    }
}

/// The final report for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Unique identifier for this run
    pub run_id: Uuid,

    /// Name of the plan that was executed
    pub plan_name: String,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished
    pub finished_at: DateTime<Utc>,

    /// Overall outcome
    pub outcome: PipelineOutcome,

    /// Per-phase outcomes, in plan order, one entry per phase
    pub phases: Vec<PhaseOutcome>,

    /// Artifacts collected across all successful phases
    pub collected: CollectionSummary,
}

impl PipelineReport {
    /// Render the report as a human-readable table
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Run {} ({}): {:?}\n\n",
            self.run_id, self.plan_name, self.outcome
        ));
        out.push_str(&format!("{:<20} {:<11} DETAIL\n", "PHASE", "STATUS"));
        out.push_str(&format!("{}\n", "-".repeat(60)));

        for phase in &self.phases {
            let status = format!("{:?}", phase.status).to_lowercase();
            let mut detail = String::new();

            if let Some(ms) = phase.duration_ms {
                detail.push_str(&format!("{}ms", ms));
            }
            if let Some(kind) = phase.failure_kind {
                if !detail.is_empty() {
                    detail.push_str(", ");
                }
                detail.push_str(&format!("{:?}", kind));
            }
            if let Some(ref err) = phase.error {
                if !detail.is_empty() {
                    detail.push_str(": ");
                }
                detail.push_str(err);
            }
            if let Some(ref note) = phase.note {
                if !detail.is_empty() {
                    detail.push_str("; ");
                }
                detail.push_str(note);
            }
            if !phase.shims.is_empty() {
                if !detail.is_empty() {
                    detail.push_str(" ");
                }
                detail.push_str(&format!("[shims: {}]", phase.shims.join(", ")));
            }

            out.push_str(&format!("{:<20} {:<11} {}\n", phase.phase_id, status, detail));
        }

        out.push_str(&format!(
            "\nArtifacts: {} copied, {} unchanged, {} failed\n",
            self.collected.copied, self.collected.unchanged, self.collected.failed
        ));

        out
    }

    /// Look up the outcome for a single phase
    pub fn phase(&self, phase_id: &str) -> Option<&PhaseOutcome> {
        self.phases.iter().find(|p| p.phase_id == phase_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_distinguish_halt_from_degraded() {
        assert_eq!(PipelineOutcome::Succeeded.exit_code(), 0);
        assert_eq!(PipelineOutcome::Halted.exit_code(), 1);
        assert_eq!(PipelineOutcome::Degraded.exit_code(), 2);
    }

    #[test]
    fn test_render_lists_every_phase() {
        let report = PipelineReport {
            run_id: Uuid::new_v4(),
            plan_name: "provision".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcome: PipelineOutcome::Halted,
            phases: vec![
                PhaseOutcome {
                    status: PhaseStatus::Completed,
                    duration_ms: Some(12),
                    ..PhaseOutcome::pending("python-core")
                },
                PhaseOutcome {
                    status: PhaseStatus::Failed,
                    failure_kind: Some(FailureKind::Timeout),
                    ..PhaseOutcome::pending("sci-stack")
                },
                PhaseOutcome {
                    status: PhaseStatus::Skipped,
                    note: Some("not reached: pipeline halted".to_string()),
                    ..PhaseOutcome::pending("native-xbuild")
                },
            ],
            collected: CollectionSummary::default(),
        };

        let rendered = report.render();
        assert!(rendered.contains("python-core"));
        assert!(rendered.contains("sci-stack"));
        assert!(rendered.contains("native-xbuild"));
        assert!(rendered.contains("not reached"));
    }
}

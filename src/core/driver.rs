//! Pipeline driver.
//!
//! Walks the plan's phases in ordinal order, invoking each through the
//! execution bridge, consulting the shim resolver for cross-build phases,
//! and handing completed outputs to the artifact collector. Bridge and
//! shim errors never crash the driver; they are classified and fed to the
//! phase's halt/continue policy. Phase n+1 never starts before phase n is
//! terminal.

use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::bridge::{Bridge, BridgeError};
use crate::collect::ArtifactCollector;
use crate::domain::{
    CollectionSummary, FailureKind, PhaseOutcome, PhaseRecord, PhaseStatus, PipelineOutcome,
    PipelineReport, RemoteCommand,
};
use crate::shim::ShimResolver;

use super::plan::{CompletionCheck, ForceSpec, Phase, PhaseKind, Plan};
use super::state::{LockError, RunLock, StateStore};

/// Errors that abort a pipeline invocation before or between phases
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A concurrent run holds the state lock; no state was mutated
    #[error("another pipeline run is already in progress (lock at {path})")]
    AlreadyRunning { path: PathBuf },

    /// The single-phase subcommand named a phase the plan does not have
    #[error("plan '{plan}' has no phase '{phase_id}'")]
    UnknownPhase { plan: String, phase_id: String },

    /// Journal or filesystem failure outside any phase's own policy
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Host- and remote-side locations the driver works with
pub struct DriverPaths {
    /// Cross-compilation sysroot inspected for real target libraries
    pub sysroot: PathBuf,

    /// Host root under which per-phase shim directories are created
    pub shim_root: PathBuf,

    /// Remote root the generated shims are pushed under, per phase
    pub remote_shim_root: String,

    /// Root under which remote outputs are staged before collection
    pub staging_root: PathBuf,

    /// Remote directories swept for artifacts at the end of a run
    pub collection_roots: Vec<String>,
}

/// Top-level pipeline orchestrator
pub struct Driver {
    bridge: Box<dyn Bridge>,
    state: StateStore,
    shims: ShimResolver,
    collector: ArtifactCollector,
    paths: DriverPaths,
}

/// Result of executing (or failing) one phase
struct PhaseExecution {
    outcome: PhaseOutcome,
    collected: CollectionSummary,
}

impl Driver {
    /// Create a driver; the bridge carries the explicit target handle
    pub fn new(
        bridge: Box<dyn Bridge>,
        state: StateStore,
        shims: ShimResolver,
        collector: ArtifactCollector,
        paths: DriverPaths,
    ) -> Self {
        Self {
            bridge,
            state,
            shims,
            collector,
            paths,
        }
    }

    /// Run the full pipeline
    #[instrument(skip(self, plan, force), fields(plan = %plan.name))]
    pub async fn run(
        &self,
        plan: &Plan,
        force: &ForceSpec,
    ) -> Result<PipelineReport, PipelineError> {
        self.run_selected(plan, force, None).await
    }

    /// Run a single named phase
    #[instrument(skip(self, plan, force), fields(plan = %plan.name, phase = %phase_id))]
    pub async fn run_phase(
        &self,
        plan: &Plan,
        phase_id: &str,
        force: &ForceSpec,
    ) -> Result<PipelineReport, PipelineError> {
        if plan.get_phase(phase_id).is_none() {
            return Err(PipelineError::UnknownPhase {
                plan: plan.name.clone(),
                phase_id: phase_id.to_string(),
            });
        }
        self.run_selected(plan, force, Some(phase_id)).await
    }

    async fn run_selected(
        &self,
        plan: &Plan,
        force: &ForceSpec,
        only: Option<&str>,
    ) -> Result<PipelineReport, PipelineError> {
        // Held for the whole run; released on drop on every exit path
        let _lock = RunLock::acquire(self.state.state_dir()).map_err(|e| match e {
            LockError::AlreadyRunning { path } => PipelineError::AlreadyRunning { path },
            other => PipelineError::Other(anyhow::Error::new(other)),
        })?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, target = %self.bridge.target(), "starting pipeline run");

        let selected: Vec<&Phase> = match only {
            Some(id) => plan.phases.iter().filter(|p| p.id == id).collect(),
            None => plan.phases.iter().collect(),
        };

        let mut outcomes: Vec<PhaseOutcome> = selected
            .iter()
            .map(|p| PhaseOutcome::pending(&p.id))
            .collect();
        let mut collected = CollectionSummary::default();

        // Surface an unreachable target before any phase is attempted
        if let Err(e) = self.bridge.health_check().await {
            error!(error = %e, "bridge unreachable, no phase attempted");
            for outcome in &mut outcomes {
                outcome.status = PhaseStatus::Skipped;
                outcome.note = Some(format!("not attempted: {}", e));
            }
            return Ok(build_report(
                plan,
                run_id,
                started_at,
                PipelineOutcome::Halted,
                outcomes,
                collected,
            ));
        }

        let mut halted = false;
        let mut degraded = false;

        for (idx, phase) in selected.iter().enumerate() {
            if halted {
                outcomes[idx].status = PhaseStatus::Skipped;
                outcomes[idx].note = Some("not reached: pipeline halted".to_string());
                continue;
            }

            if !force.applies(&phase.id) && self.state.is_completed(&phase.id).await? {
                info!(phase = %phase.id, "phase already completed, skipping");
                self.state
                    .append(&PhaseRecord::new(&phase.id, PhaseStatus::Skipped))
                    .await?;
                outcomes[idx].status = PhaseStatus::Skipped;
                outcomes[idx].note = Some("already completed".to_string());
                continue;
            }

            let exec = self.execute_phase(plan, phase).await?;
            collected.absorb(exec.collected);
            outcomes[idx] = exec.outcome;

            if outcomes[idx].status == PhaseStatus::Failed {
                let transport_gone =
                    outcomes[idx].failure_kind == Some(FailureKind::BridgeUnavailable);
                if phase.best_effort && !transport_gone {
                    warn!(phase = %phase.id, "best-effort phase failed, continuing");
                    degraded = true;
                } else {
                    error!(phase = %phase.id, "phase failed, halting pipeline");
                    halted = true;
                }
            }
        }

        // Pick up anything the phases left in the standing remote
        // directories (wheel area, package-manager cache)
        if !halted && !self.paths.collection_roots.is_empty() {
            let swept = self
                .stage_and_collect("collection", &self.paths.collection_roots)
                .await;
            collected.absorb(swept);
        }

        let outcome = if halted {
            PipelineOutcome::Halted
        } else if degraded {
            PipelineOutcome::Degraded
        } else {
            PipelineOutcome::Succeeded
        };

        info!(%run_id, ?outcome, "pipeline run finished");
        Ok(build_report(
            plan, run_id, started_at, outcome, outcomes, collected,
        ))
    }

    /// Execute one phase through Running to a terminal state
    async fn execute_phase(
        &self,
        plan: &Plan,
        phase: &Phase,
    ) -> Result<PhaseExecution, PipelineError> {
        info!(phase = %phase.id, kind = ?phase.kind, "phase starting");
        self.state
            .append(&PhaseRecord::new(&phase.id, PhaseStatus::Running))
            .await?;

        let mut outcome = PhaseOutcome::pending(&phase.id);
        let mut collected = CollectionSummary::default();
        let started = Instant::now();

        // Shims first: a cross-build must not reach the linker with
        // missing target libraries. Generated shims are pushed to the
        // remote filesystem so the remote link step can actually see
        // them; a library present in the sysroot needs neither.
        let mut remote_shim_dir = None;
        if phase.kind == PhaseKind::CrossBuild {
            let prepared = self.shims.prepare(
                &phase.required_libs,
                &self.paths.sysroot,
                &self.paths.shim_root.join(&phase.id),
            );
            match prepared {
                Ok(dir) if !dir.is_empty() => {
                    outcome.shims = dir.generated.clone();
                    let remote = format!("{}/{}", self.paths.remote_shim_root, phase.id);
                    if let Err(e) = self.bridge.push(&dir.dir, &remote).await {
                        let (kind, message) = classify_bridge_error(&e);
                        let duration_ms = started.elapsed().as_millis() as u64;
                        self.record_failure(phase, kind, &message, duration_ms, &mut outcome)
                            .await?;
                        return Ok(PhaseExecution { outcome, collected });
                    }
                    remote_shim_dir = Some(remote);
                }
                Ok(_) => {}
                Err(e) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    self.record_failure(
                        phase,
                        FailureKind::ShimGeneration,
                        &e.to_string(),
                        duration_ms,
                        &mut outcome,
                    )
                    .await?;
                    return Ok(PhaseExecution { outcome, collected });
                }
            }
        }

        let mut command = phase.to_command();
        if let Some(ref dir) = remote_shim_dir {
            command = inject_shim_paths(command, phase, dir);
        }

        let bound = phase.timeout(&plan.defaults);
        let result = self.bridge.execute(&command, bound).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(_result) => match self.completion_satisfied(phase).await {
                Ok(true) => {
                    collected = self.collect_outputs(phase).await;
                    self.state
                        .append(
                            &PhaseRecord::new(&phase.id, PhaseStatus::Completed)
                                .with_duration(duration_ms),
                        )
                        .await?;
                    outcome.status = PhaseStatus::Completed;
                    outcome.duration_ms = Some(duration_ms);
                    info!(phase = %phase.id, duration_ms, "phase completed");
                }
                Ok(false) => {
                    self.record_failure(
                        phase,
                        FailureKind::CompletionUnmet,
                        "command exited zero but expected outputs are missing",
                        duration_ms,
                        &mut outcome,
                    )
                    .await?;
                }
                Err(e) => {
                    let (kind, message) = classify_bridge_error(&e);
                    self.record_failure(phase, kind, &message, duration_ms, &mut outcome)
                        .await?;
                }
            },
            Err(e) => {
                let (kind, message) = classify_bridge_error(&e);
                self.record_failure(phase, kind, &message, duration_ms, &mut outcome)
                    .await?;
            }
        }

        Ok(PhaseExecution { outcome, collected })
    }

    /// Evaluate the phase's completion predicate
    async fn completion_satisfied(&self, phase: &Phase) -> Result<bool, BridgeError> {
        match &phase.completion {
            CompletionCheck::ExitZero => Ok(true),
            CompletionCheck::RemotePathsExist { paths } => {
                let mut command = RemoteCommand::new("test");
                for (i, path) in paths.iter().enumerate() {
                    if i > 0 {
                        command = command.arg("-a");
                    }
                    command = command.arg("-e").arg(path.clone());
                }

                match self
                    .bridge
                    .execute(&command, std::time::Duration::from_secs(60))
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(BridgeError::NonZeroExit(_)) => Ok(false),
                    Err(other) => Err(other),
                }
            }
        }
    }

    /// Stage the phase's remote outputs and run the collector over them.
    ///
    /// Staging failures are logged and skipped; a missing output never
    /// fails a phase that already satisfied its completion check.
    async fn collect_outputs(&self, phase: &Phase) -> CollectionSummary {
        self.stage_and_collect(&phase.id, &phase.outputs).await
    }

    /// Pull remote paths into a staging area and collect from it
    async fn stage_and_collect(&self, label: &str, remotes: &[String]) -> CollectionSummary {
        let mut summary = CollectionSummary::default();
        if remotes.is_empty() {
            return summary;
        }

        let staging = self.paths.staging_root.join(label);
        if let Err(e) = tokio::fs::create_dir_all(&staging).await {
            warn!(label, error = %e, "cannot create staging directory");
            summary.failed += remotes.len();
            return summary;
        }

        for remote in remotes {
            if let Err(e) = self.bridge.pull(remote, &staging).await {
                warn!(label, %remote, error = %e, "failed to stage remote path, skipping");
                summary.failed += 1;
            }
        }

        match self.collector.collect(&[staging]) {
            Ok(pass) => summary.absorb(pass),
            Err(e) => warn!(label, error = %e, "artifact collection failed"),
        }

        summary
    }

    /// Persist a failure transition and mirror it into the outcome
    async fn record_failure(
        &self,
        phase: &Phase,
        kind: FailureKind,
        message: &str,
        duration_ms: u64,
        outcome: &mut PhaseOutcome,
    ) -> Result<(), PipelineError> {
        error!(phase = %phase.id, ?kind, error = %message, "phase failed");
        self.state
            .append(
                &PhaseRecord::new(&phase.id, PhaseStatus::Failed)
                    .with_error(message)
                    .with_failure_kind(kind)
                    .with_duration(duration_ms),
            )
            .await?;

        outcome.status = PhaseStatus::Failed;
        outcome.failure_kind = Some(kind);
        outcome.error = Some(message.to_string());
        outcome.duration_ms = Some(duration_ms);
        Ok(())
    }
}

/// Prepend the remote shim directory to the link search path for this
/// phase only
fn inject_shim_paths(command: RemoteCommand, phase: &Phase, dir: &str) -> RemoteCommand {
    let library_path = match phase.env.get("LIBRARY_PATH") {
        Some(existing) => format!("{}:{}", dir, existing),
        None => dir.to_string(),
    };
    let ldflags = match phase.env.get("LDFLAGS") {
        Some(existing) => format!("-L{} {}", dir, existing),
        None => format!("-L{}", dir),
    };

    command
        .env("LIBRARY_PATH", library_path)
        .env("LDFLAGS", ldflags)
}

/// Classify a bridge error into a failure kind and a short message
fn classify_bridge_error(error: &BridgeError) -> (FailureKind, String) {
    match error {
        BridgeError::Unavailable { reason, .. } => (
            FailureKind::BridgeUnavailable,
            format!("bridge unavailable: {}", reason),
        ),
        BridgeError::NonZeroExit(result) => {
            let detail = stderr_tail(&result.stderr);
            let message = if detail.is_empty() {
                format!("exit code {}", result.exit_code)
            } else {
                format!("exit code {}: {}", result.exit_code, detail)
            };
            (FailureKind::NonZeroExit, message)
        }
        BridgeError::Timeout(bound) => (
            FailureKind::Timeout,
            format!("no response within {:?}", bound),
        ),
    }
}

/// Last non-empty stderr line, bounded for the journal
fn stderr_tail(stderr: &str) -> String {
    let line = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim();

    if line.chars().count() > 200 {
        let clipped: String = line.chars().take(200).collect();
        format!("{}...", clipped)
    } else {
        line.to_string()
    }
}

fn build_report(
    plan: &Plan,
    run_id: Uuid,
    started_at: chrono::DateTime<Utc>,
    outcome: PipelineOutcome,
    phases: Vec<PhaseOutcome>,
    collected: CollectionSummary,
) -> PipelineReport {
    PipelineReport {
        run_id,
        plan_name: plan.name.clone(),
        started_at,
        finished_at: Utc::now(),
        outcome,
        phases,
        collected,
    }
}

//! Provisioning plan definitions and loading.
//!
//! Plans are defined in YAML as an ordered sequence of named phases. The
//! declaration order is the ordinal order; the driver never reorders
//! phases.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::RemoteCommand;

/// A complete provisioning plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan name (used in reports and the journal)
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Plan-wide defaults
    #[serde(default)]
    pub defaults: PlanDefaults,

    /// Ordered list of phases to execute
    pub phases: Vec<Phase>,
}

impl Plan {
    /// Load a plan from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a plan from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse plan YAML")
    }

    /// Validate the plan definition
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Plan name cannot be empty");
        }

        if self.phases.is_empty() {
            anyhow::bail!("Plan must have at least one phase");
        }

        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for (i, phase) in self.phases.iter().enumerate() {
            if phase.id.is_empty() {
                anyhow::bail!("Phase {} has an empty id", i);
            }
            if !seen.insert(phase.id.as_str()) {
                anyhow::bail!("Duplicate phase id '{}'", phase.id);
            }
            if phase.command.is_empty() {
                anyhow::bail!("Phase '{}' has an empty command", phase.id);
            }
            if !phase.required_libs.is_empty() && phase.kind != PhaseKind::CrossBuild {
                anyhow::bail!(
                    "Phase '{}' declares required_libs but is not a cross_build phase",
                    phase.id
                );
            }
            for key in phase.env.keys() {
                if !is_env_name(key) {
                    anyhow::bail!("Phase '{}' has invalid env name '{}'", phase.id, key);
                }
            }
            if let CompletionCheck::RemotePathsExist { paths } = &phase.completion {
                if paths.is_empty() {
                    anyhow::bail!(
                        "Phase '{}' has a remote_paths_exist check with no paths",
                        phase.id
                    );
                }
            }
        }

        Ok(())
    }

    /// Get a phase by id
    pub fn get_phase(&self, id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    /// Get the ordinal position of a phase by id
    pub fn phase_index(&self, id: &str) -> Option<usize> {
        self.phases.iter().position(|p| p.id == id)
    }
}

/// Plan-wide defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDefaults {
    /// Per-command timeout in seconds (default: 600)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    600
}

impl Default for PlanDefaults {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// One named, ordered unit of the provisioning pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    /// Phase identifier (unique within the plan)
    pub id: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Command to run in the remote sandbox, as an argument vector
    pub command: Vec<String>,

    /// Remote working directory for the command
    pub cwd: Option<String>,

    /// Environment overrides for the command
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Phase kind; cross_build phases get shim preparation
    #[serde(default)]
    pub kind: PhaseKind,

    /// Target-runtime libraries the cross-build links against
    #[serde(default)]
    pub required_libs: Vec<String>,

    /// A failure in a best-effort phase does not halt the pipeline
    #[serde(default)]
    pub best_effort: bool,

    /// Override timeout for this phase (uses defaults.timeout_seconds if
    /// not set)
    pub timeout_seconds: Option<u64>,

    /// How prior success is detected
    #[serde(default)]
    pub completion: CompletionCheck,

    /// Remote paths pulled for artifact collection after success
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl Phase {
    /// Effective timeout for this phase
    pub fn timeout(&self, defaults: &PlanDefaults) -> Duration {
        let seconds = self.timeout_seconds.unwrap_or(defaults.timeout_seconds);
        Duration::from_secs(seconds)
    }

    /// Build the remote command for this phase
    pub fn to_command(&self) -> RemoteCommand {
        let mut cmd = RemoteCommand::from_argv(self.command.clone())
            .envs(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(ref cwd) = self.cwd {
            cmd = cmd.current_dir(cwd.clone());
        }
        cmd
    }
}

/// Phase kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Plain remote setup step
    Setup,

    /// Cross-compilation step; shims are prepared before it runs
    CrossBuild,
}

impl Default for PhaseKind {
    fn default() -> Self {
        Self::Setup
    }
}

/// Completion predicate for a phase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionCheck {
    /// The remote command exiting zero is enough
    ExitZero,

    /// Expected outputs must exist on the remote filesystem
    RemotePathsExist { paths: Vec<String> },
}

impl Default for CompletionCheck {
    fn default() -> Self {
        Self::ExitZero
    }
}

/// Caller-supplied forced-rerun override.
///
/// Forced rerun exists because remote state can drift independently of the
/// pipeline's own bookkeeping; it ignores the persisted completed marker
/// for exactly the named phases (or all of them).
#[derive(Debug, Clone, Default)]
pub struct ForceSpec {
    /// Force every phase
    pub all: bool,

    /// Force specific phase ids
    pub phases: BTreeSet<String>,
}

impl ForceSpec {
    /// Force every phase
    pub fn all() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    /// Force the named phases only
    pub fn for_phases<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            all: false,
            phases: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the given phase should ignore its completed marker
    pub fn applies(&self, phase_id: &str) -> bool {
        self.all || self.phases.contains(phase_id)
    }
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PLAN_YAML: &str = r#"
name: provision
description: Test plan

defaults:
  timeout_seconds: 120

phases:
  - id: python-core
    command: [pkg, install, -y, python]

  - id: native-xbuild
    command: [pip3, wheel, lxml]
    cwd: /data/data/com.termux/files/home/build
    kind: cross_build
    required_libs: [log, android]
    best_effort: true
    timeout_seconds: 30
    outputs:
      - /data/data/com.termux/files/home/wheels
"#;

    #[test]
    fn test_plan_parsing() {
        let plan = Plan::from_yaml(TEST_PLAN_YAML).unwrap();

        assert_eq!(plan.name, "provision");
        assert_eq!(plan.phases.len(), 2);
        assert_eq!(plan.defaults.timeout_seconds, 120);

        let xbuild = &plan.phases[1];
        assert_eq!(xbuild.kind, PhaseKind::CrossBuild);
        assert_eq!(xbuild.required_libs, vec!["log", "android"]);
        assert!(xbuild.best_effort);
    }

    #[test]
    fn test_plan_validation() {
        let plan = Plan::from_yaml(TEST_PLAN_YAML).unwrap();
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_duplicate_phase_id_rejected() {
        let yaml = r#"
name: invalid
phases:
  - id: a
    command: [true]
  - id: a
    command: [true]
"#;
        let plan = Plan::from_yaml(yaml).unwrap();
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_required_libs_only_on_cross_build() {
        let yaml = r#"
name: invalid
phases:
  - id: a
    command: [true]
    required_libs: [z]
"#;
        let plan = Plan::from_yaml(yaml).unwrap();
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_invalid_env_name_rejected() {
        let yaml = r#"
name: invalid
phases:
  - id: a
    command: [true]
    env:
      "BAD NAME": value
"#;
        let plan = Plan::from_yaml(yaml).unwrap();
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_phase_timeout_fallback_to_defaults() {
        let plan = Plan::from_yaml(TEST_PLAN_YAML).unwrap();

        assert_eq!(
            plan.phases[0].timeout(&plan.defaults),
            Duration::from_secs(120)
        );
        assert_eq!(
            plan.phases[1].timeout(&plan.defaults),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_completion_check_parsing() {
        let yaml = r#"
name: checks
phases:
  - id: a
    command: [true]
    completion: exit_zero
  - id: b
    command: [true]
    completion:
      remote_paths_exist:
        paths: [/data/out/pkg.whl]
"#;
        let plan = Plan::from_yaml(yaml).unwrap();
        assert!(matches!(plan.phases[0].completion, CompletionCheck::ExitZero));
        assert!(matches!(
            plan.phases[1].completion,
            CompletionCheck::RemotePathsExist { .. }
        ));
    }

    #[test]
    fn test_empty_completion_paths_rejected() {
        let yaml = r#"
name: invalid
phases:
  - id: a
    command: [true]
    completion:
      remote_paths_exist:
        paths: []
"#;
        let plan = Plan::from_yaml(yaml).unwrap();
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_force_spec() {
        let none = ForceSpec::default();
        assert!(!none.applies("a"));

        let all = ForceSpec::all();
        assert!(all.applies("a"));

        let one = ForceSpec::for_phases(["sci-stack"]);
        assert!(one.applies("sci-stack"));
        assert!(!one.applies("python-core"));
    }
}

//! Command-line interface for provis.
//!
//! Provides commands for running a full provisioning plan, re-running a
//! single phase, inspecting persisted phase state, and printing the
//! resolved configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::bridge::AdbBridge;
use crate::collect::ArtifactCollector;
use crate::config;
use crate::core::{Driver, DriverPaths, ForceSpec, Plan, StateStore};
use crate::domain::PipelineReport;
use crate::shim::ShimResolver;

/// provis - remote provisioning pipeline for a sandboxed device
#[derive(Parser, Debug)]
#[command(name = "provis")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full provisioning pipeline
    Run {
        /// Plan file (YAML)
        plan: PathBuf,

        /// Re-execute every phase, ignoring completed markers
        #[arg(long)]
        force: bool,

        /// Re-execute one phase, ignoring its completed marker (repeatable)
        #[arg(long = "force-phase", value_name = "PHASE_ID")]
        force_phase: Vec<String>,

        /// Alternate persisted-state location
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Target device serial
        #[arg(short, long, env = "PROVIS_SERIAL")]
        serial: Option<String>,
    },

    /// Run a single named phase
    Phase {
        /// Plan file (YAML)
        plan: PathBuf,

        /// Phase identifier within the plan
        phase_id: String,

        /// Ignore the phase's completed marker
        #[arg(long)]
        force: bool,

        /// Alternate persisted-state location
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Target device serial
        #[arg(short, long, env = "PROVIS_SERIAL")]
        serial: Option<String>,
    },

    /// Show persisted phase state
    Status {
        /// Alternate persisted-state location
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                plan,
                force,
                force_phase,
                state_dir,
                serial,
            } => {
                let force_spec = build_force_spec(force, force_phase);
                run_pipeline(&plan, None, force_spec, state_dir, serial).await
            }
            Commands::Phase {
                plan,
                phase_id,
                force,
                state_dir,
                serial,
            } => {
                let force_spec = if force {
                    ForceSpec::for_phases([phase_id.clone()])
                } else {
                    ForceSpec::default()
                };
                run_pipeline(&plan, Some(phase_id), force_spec, state_dir, serial).await
            }
            Commands::Status { state_dir } => show_status(state_dir).await,
            Commands::Config => show_config(),
        }
    }
}

fn build_force_spec(force_all: bool, force_phases: Vec<String>) -> ForceSpec {
    if force_all {
        ForceSpec::all()
    } else {
        ForceSpec::for_phases(force_phases)
    }
}

/// Load a plan and run it (fully, or one phase) through a fresh driver
async fn run_pipeline(
    plan_path: &PathBuf,
    only_phase: Option<String>,
    force: ForceSpec,
    state_dir: Option<PathBuf>,
    serial: Option<String>,
) -> Result<()> {
    let plan = Plan::from_file(plan_path)?;
    plan.validate()?;

    let driver = build_driver(state_dir, serial).await?;

    let report = match only_phase {
        Some(ref phase_id) => driver.run_phase(&plan, phase_id, &force).await?,
        None => driver.run(&plan, &force).await?,
    };

    finish(report)
}

/// Print the report and exit with its outcome code
fn finish(report: PipelineReport) -> Result<()> {
    println!("{}", report.render());

    let code = report.outcome.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Assemble the driver from configuration plus CLI overrides.
///
/// The bridge gets its target handle here, explicitly; nothing downstream
/// infers a device from ambient state.
async fn build_driver(
    state_dir: Option<PathBuf>,
    serial: Option<String>,
) -> Result<Driver> {
    let cfg = config::config()?;

    let serial = serial
        .or_else(|| cfg.bridge.serial.clone())
        .context("No target serial configured. Use --serial or set bridge.serial in .provis/config.yaml")?;

    let mut bridge = AdbBridge::new(serial)
        .with_binary_path(cfg.bridge.binary.clone())
        .with_base_env(cfg.remote.base_env());
    if let Some(ref app_id) = cfg.bridge.app_id {
        bridge = bridge.with_app_id(app_id.clone());
    }

    let state_dir = state_dir.unwrap_or_else(|| cfg.state_dir());
    let state = StateStore::open(&state_dir).await?;

    let collector = ArtifactCollector::with_default_patterns(cfg.dist_dir())?;

    Ok(Driver::new(
        Box::new(bridge),
        state,
        ShimResolver::new(),
        collector,
        DriverPaths {
            sysroot: cfg.sysroot.clone(),
            shim_root: cfg.shim_dir(),
            remote_shim_root: cfg.remote.shim_root(),
            staging_root: cfg.staging_dir(),
            collection_roots: cfg.remote.collection_roots(),
        },
    ))
}

/// Show persisted per-phase state
async fn show_status(state_dir: Option<PathBuf>) -> Result<()> {
    let state_dir = match state_dir {
        Some(dir) => dir,
        None => config::config()?.state_dir(),
    };

    let store = StateStore::open(&state_dir).await?;
    let latest = store.latest().await?;

    if latest.is_empty() {
        println!("No phase state recorded at {}", state_dir.display());
        return Ok(());
    }

    println!("{:<20} {:<11} {:<26} DETAIL", "PHASE", "STATUS", "LAST ATTEMPT");
    println!("{}", "-".repeat(80));

    for (phase_id, record) in &latest {
        let status = format!("{:?}", record.status).to_lowercase();
        let detail = record.error.as_deref().unwrap_or("");
        println!(
            "{:<20} {:<11} {:<26} {}",
            phase_id,
            status,
            record.attempted_at.format("%Y-%m-%d %H:%M:%S"),
            detail
        );
    }

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("provis configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:    {}", cfg.home.display());
    println!("  State:   {}", cfg.state_dir().display());
    println!("  Dist:    {}", cfg.dist_dir().display());
    println!("  Staging: {}", cfg.staging_dir().display());
    println!("  Shims:   {}", cfg.shim_dir().display());
    println!("  Sysroot: {}", cfg.sysroot.display());
    println!();
    println!("Bridge:");
    println!("  Binary: {}", cfg.bridge.binary);
    println!(
        "  Serial: {}",
        cfg.bridge.serial.as_deref().unwrap_or("(unset)")
    );
    println!(
        "  App id: {}",
        cfg.bridge.app_id.as_deref().unwrap_or("(none)")
    );
    println!();
    println!("Remote layout:");
    println!("  Home:      {}", cfg.remote.home);
    println!("  Prefix:    {}", cfg.remote.prefix);
    println!("  Cache:     {}", cfg.remote.cache_dir);
    println!("  Work dir:  {}", cfg.remote.work_dir);
    println!("  Wheel dir: {}", cfg.remote.wheel_dir);

    Ok(())
}

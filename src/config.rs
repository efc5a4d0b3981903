//! Configuration for provis paths and the bridge target.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (PROVIS_HOME, PROVIS_SERIAL)
//! 2. Config file (.provis/config.yaml)
//! 3. Defaults (~/.provis, Termux-style remote layout)
//!
//! Config file discovery:
//! - Searches current directory and parents for .provis/config.yaml
//! - Paths in the config file are relative to the config file's parent

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub bridge: Option<BridgeConfig>,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State/dist root (relative to the config file's parent)
    pub home: Option<String>,
    /// Cross-compilation sysroot
    pub sysroot: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub binary: Option<String>,
    pub serial: Option<String>,
    pub app_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    pub home: Option<String>,
    pub prefix: Option<String>,
    pub cache_dir: Option<String>,
    pub work_dir: Option<String>,
    pub wheel_dir: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the provis home (state, staging, dist)
    pub home: PathBuf,
    /// Cross-compilation sysroot inspected by the shim resolver
    pub sysroot: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Bridge transport settings
    pub bridge: BridgeSettings,
    /// Remote filesystem layout
    pub remote: RemoteLayout,
}

impl ResolvedConfig {
    /// Persisted phase-state directory ($PROVIS_HOME/state)
    pub fn state_dir(&self) -> PathBuf {
        self.home.join("state")
    }

    /// Artifact destination root ($PROVIS_HOME/dist)
    pub fn dist_dir(&self) -> PathBuf {
        self.home.join("dist")
    }

    /// Per-phase staging root for pulled outputs
    pub fn staging_dir(&self) -> PathBuf {
        self.home.join("staging")
    }

    /// Per-phase shim root
    pub fn shim_dir(&self) -> PathBuf {
        self.home.join("shims")
    }
}

/// How to reach the bridge process
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Bridge binary (default: "adb")
    pub binary: String,
    /// Target device serial, if configured
    pub serial: Option<String>,
    /// Sandboxed application id to run-as into
    pub app_id: Option<String>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            binary: "adb".to_string(),
            serial: None,
            app_id: Some(DEFAULT_APP_ID.to_string()),
        }
    }
}

const DEFAULT_APP_ID: &str = "com.termux";

/// Fixed remote filesystem layout (must match the target exactly)
#[derive(Debug, Clone)]
pub struct RemoteLayout {
    /// Home directory root
    pub home: String,
    /// Package-manager prefix root
    pub prefix: String,
    /// Package-manager cache directory
    pub cache_dir: String,
    /// Working directory for downloaded sources
    pub work_dir: String,
    /// Wheel/artifact output directory
    pub wheel_dir: String,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        let files = format!("/data/data/{}/files", DEFAULT_APP_ID);
        Self {
            home: format!("{}/home", files),
            prefix: format!("{}/usr", files),
            cache_dir: format!("{}/usr/var/cache/apt/archives", files),
            work_dir: format!("{}/home/build", files),
            wheel_dir: format!("{}/home/wheels", files),
        }
    }
}

impl RemoteLayout {
    /// Fixed base environment merged under every command's overrides
    pub fn base_env(&self) -> BTreeMap<String, String> {
        [
            ("HOME".to_string(), self.home.clone()),
            ("PREFIX".to_string(), self.prefix.clone()),
            (
                "PATH".to_string(),
                format!("{}/bin:/system/bin", self.prefix),
            ),
        ]
        .into_iter()
        .collect()
    }

    /// Default collection roots, in scan order: home first, then the
    /// package-manager cache
    pub fn collection_roots(&self) -> Vec<String> {
        vec![self.wheel_dir.clone(), self.cache_dir.clone()]
    }

    /// Remote directory shim libraries are pushed under before a
    /// cross-build phase links against them
    pub fn shim_root(&self) -> String {
        format!("{}/.provis-shims", self.home)
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".provis").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".provis");

    let config_file = find_config_file();

    let mut bridge = BridgeSettings::default();
    let mut remote = RemoteLayout::default();
    let mut sysroot: Option<PathBuf> = None;

    let home = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;
        let base_dir = config_path.parent().unwrap_or(Path::new("."));

        if let Some(b) = config.bridge {
            if let Some(binary) = b.binary {
                bridge.binary = binary;
            }
            if let Some(serial) = b.serial {
                bridge.serial = Some(serial);
            }
            if let Some(app_id) = b.app_id {
                bridge.app_id = Some(app_id);
            }
        }

        if let Some(r) = config.remote {
            if let Some(v) = r.home {
                remote.home = v;
            }
            if let Some(v) = r.prefix {
                remote.prefix = v;
            }
            if let Some(v) = r.cache_dir {
                remote.cache_dir = v;
            }
            if let Some(v) = r.work_dir {
                remote.work_dir = v;
            }
            if let Some(v) = r.wheel_dir {
                remote.wheel_dir = v;
            }
        }

        if let Some(ref path) = config.paths.sysroot {
            sysroot = Some(resolve_path(base_dir, path));
        }

        if let Ok(env_home) = std::env::var("PROVIS_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            resolve_path(base_dir, home_path)
        } else {
            default_home
        }
    } else {
        std::env::var("PROVIS_HOME")
            .map(PathBuf::from)
            .unwrap_or(default_home)
    };

    if let Ok(env_serial) = std::env::var("PROVIS_SERIAL") {
        bridge.serial = Some(env_serial);
    }

    Ok(ResolvedConfig {
        sysroot: sysroot.unwrap_or_else(|| home.join("sysroot")),
        home,
        config_file,
        bridge,
        remote,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

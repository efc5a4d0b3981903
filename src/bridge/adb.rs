//! Debug-bridge transport for the remote sandbox.
//!
//! Commands are routed through the platform debug-bridge binary
//! (`adb -s <serial> shell <script>`), optionally wrapped in `run-as` so
//! they execute inside the sandboxed application's own environment. The
//! bridge's `shell` channel does not reliably propagate the remote exit
//! status, so the script echoes a marker line that is parsed back out.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use super::{Bridge, BridgeError};
use crate::domain::{shell_quote, ExecutionResult, RemoteCommand};

/// Marker echoed after the remote command to recover its exit status
const EXIT_MARKER: &str = "__PROVIS_EXIT__";

/// Bridge implementation speaking to one device over the debug bridge
pub struct AdbBridge {
    /// Path to the bridge binary (default: "adb")
    binary_path: String,

    /// Device serial; the explicit target handle for every invocation
    serial: String,

    /// Sandboxed application id to `run-as` into, if any
    app_id: Option<String>,

    /// Fixed base environment merged under each command's overrides
    base_env: BTreeMap<String, String>,
}

impl AdbBridge {
    /// Create a bridge for the given device serial
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            binary_path: "adb".to_string(),
            serial: serial.into(),
            app_id: None,
            base_env: BTreeMap::new(),
        }
    }

    /// Use a custom bridge binary
    pub fn with_binary_path(mut self, path: impl Into<String>) -> Self {
        self.binary_path = path.into();
        self
    }

    /// Wrap every command in `run-as <app_id>`
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Set the base environment (PATH, HOME, PREFIX)
    pub fn with_base_env(mut self, base_env: BTreeMap<String, String>) -> Self {
        self.base_env = base_env;
        self
    }

    /// Render the full shell script sent over the bridge.
    ///
    /// The marker gets a forced leading newline so it lands on its own
    /// line even when the command's output does not end in one.
    fn shell_script(&self, command: &RemoteCommand) -> String {
        let mut script = command.render(&self.base_env);
        script.push_str(&format!(r#"; rc=$?; printf '\n{}:%s\n' "$rc""#, EXIT_MARKER));

        if let Some(ref app_id) = self.app_id {
            script = format!("run-as {} sh -c {}", shell_quote(app_id), shell_quote(&script));
        }

        script
    }

    /// Spawn the bridge binary and wait for it, honoring the timeout
    async fn invoke(
        &self,
        args: Vec<String>,
        bound: Duration,
    ) -> Result<std::process::Output, BridgeError> {
        let mut child = Command::new(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::Unavailable {
                target: self.serial.clone(),
                reason: format!("failed to spawn '{}': {}", self.binary_path, e),
            })?;

        match timeout(bound, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(BridgeError::Unavailable {
                target: self.serial.clone(),
                reason: format!("failed to wait for bridge process: {}", e),
            }),
            // Dropping the timed-out future kills the child (kill_on_drop)
            Err(_) => Err(BridgeError::Timeout(bound)),
        }
    }
}

#[async_trait]
impl Bridge for AdbBridge {
    fn target(&self) -> &str {
        &self.serial
    }

    async fn execute(
        &self,
        command: &RemoteCommand,
        bound: Duration,
    ) -> Result<ExecutionResult, BridgeError> {
        let script = self.shell_script(command);

        // Audit rule: every invocation logs the substituted command line
        info!(target = %self.serial, %script, "bridge exec");

        let args = vec![
            "-s".to_string(),
            self.serial.clone(),
            "shell".to_string(),
            script,
        ];

        let started = Instant::now();
        let output = self.invoke(args, bound).await?;
        let duration = started.elapsed();

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() && looks_unreachable(&stderr) {
            return Err(BridgeError::Unavailable {
                target: self.serial.clone(),
                reason: stderr.trim().to_string(),
            });
        }

        let raw_stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let fallback_code = output.status.code().unwrap_or(-1);
        let (stdout, exit_code) = split_exit_marker(&raw_stdout, fallback_code);

        let result = ExecutionResult {
            exit_code,
            stdout,
            stderr,
            duration,
        };

        debug!(
            target = %self.serial,
            exit_code,
            duration_ms = duration.as_millis() as u64,
            "bridge exec finished"
        );

        if result.exit_code != 0 {
            return Err(BridgeError::NonZeroExit(result));
        }
        Ok(result)
    }

    async fn pull(&self, remote: &str, local: &Path) -> Result<(), BridgeError> {
        info!(target = %self.serial, %remote, local = %local.display(), "bridge pull");

        let args = vec![
            "-s".to_string(),
            self.serial.clone(),
            "pull".to_string(),
            remote.to_string(),
            local.display().to_string(),
        ];

        let started = Instant::now();
        let output = self.invoke(args, Duration::from_secs(300)).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if looks_unreachable(&stderr) {
                return Err(BridgeError::Unavailable {
                    target: self.serial.clone(),
                    reason: stderr.trim().to_string(),
                });
            }
            return Err(BridgeError::NonZeroExit(ExecutionResult {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr,
                duration: started.elapsed(),
            }));
        }

        Ok(())
    }

    async fn push(&self, local: &Path, remote: &str) -> Result<(), BridgeError> {
        info!(target = %self.serial, local = %local.display(), %remote, "bridge push");

        let args = vec![
            "-s".to_string(),
            self.serial.clone(),
            "push".to_string(),
            local.display().to_string(),
            remote.to_string(),
        ];

        let started = Instant::now();
        let output = self.invoke(args, Duration::from_secs(300)).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if looks_unreachable(&stderr) {
                return Err(BridgeError::Unavailable {
                    target: self.serial.clone(),
                    reason: stderr.trim().to_string(),
                });
            }
            return Err(BridgeError::NonZeroExit(ExecutionResult {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr,
                duration: started.elapsed(),
            }));
        }

        Ok(())
    }

    async fn health_check(&self) -> Result<(), BridgeError> {
        let args = vec![
            "-s".to_string(),
            self.serial.clone(),
            "get-state".to_string(),
        ];

        let output = self.invoke(args, Duration::from_secs(10)).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(BridgeError::Unavailable {
                target: self.serial.clone(),
                reason: stderr.trim().to_string(),
            });
        }

        Ok(())
    }
}

/// Recognize transport-level "no reachable device" messages on stderr
fn looks_unreachable(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    (lower.contains("device") && (lower.contains("not found") || lower.contains("offline")))
        || lower.contains("no devices")
        || lower.contains("cannot connect")
}

/// Strip the exit marker from captured stdout and parse the exit code.
///
/// The marker always arrives with its own leading newline, so it is
/// located by scanning backwards; the newline the script injected is
/// consumed along with the marker, leaving the command's output exactly
/// as it was produced (trailing newline or not). Falls back to the
/// bridge process's own status when the marker is missing (e.g., the
/// remote shell never ran).
fn split_exit_marker(raw: &str, fallback: i32) -> (String, i32) {
    let prefix = format!("{}:", EXIT_MARKER);
    let lead = format!("\n{}", prefix);

    let at = raw
        .rfind(&lead)
        .map(|i| (i, i + 1))
        .or_else(|| raw.starts_with(&prefix).then_some((0, 0)));

    let Some((cut, marker_start)) = at else {
        return (raw.to_string(), fallback);
    };

    let rest = &raw[marker_start + prefix.len()..];
    let (code_text, trailing) = match rest.find('\n') {
        Some(nl) => (&rest[..nl], &rest[nl + 1..]),
        None => (rest, ""),
    };

    let exit_code = match code_text.trim().parse::<i32>() {
        Ok(code) => code,
        Err(_) => return (raw.to_string(), fallback),
    };

    (format!("{}{}", &raw[..cut], trailing), exit_code)
}

//! Execution bridge to the remote sandbox.
//!
//! All remote invocations funnel through one `Bridge` implementation so
//! environment assembly and quoting live in a single place. A non-zero
//! remote exit is surfaced as `BridgeError::NonZeroExit` carrying the
//! captured result; it is a signaled condition for the caller to inspect,
//! not automatically fatal.

pub mod adb;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ExecutionResult, RemoteCommand};

// Re-export the debug-bridge transport
pub use adb::AdbBridge;

/// Errors raised by the execution bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The transport reports no reachable remote target
    #[error("bridge cannot reach target '{target}': {reason}")]
    Unavailable { target: String, reason: String },

    /// The remote command ran but exited non-zero
    #[error("remote command exited with code {}", .0.exit_code)]
    NonZeroExit(ExecutionResult),

    /// No response within the configured bound
    #[error("remote command timed out after {0:?}")]
    Timeout(Duration),
}

/// Command-execution channel into the remote sandbox.
///
/// The target handle is explicit construction-time state; implementations
/// must never infer "the" connected device from ambient process state.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Identifier of the remote target this bridge talks to
    fn target(&self) -> &str;

    /// Run a command in the remote sandbox and capture its result
    async fn execute(
        &self,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Result<ExecutionResult, BridgeError>;

    /// Copy a remote file or directory to a local path
    async fn pull(&self, remote: &str, local: &Path) -> Result<(), BridgeError>;

    /// Copy a local file or directory to a remote path
    async fn push(&self, local: &Path, remote: &str) -> Result<(), BridgeError>;

    /// Verify the target is reachable before any phase is attempted
    async fn health_check(&self) -> Result<(), BridgeError>;
}

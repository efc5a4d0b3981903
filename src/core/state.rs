//! Durable phase state and run-level locking.
//!
//! Phase transitions are appended as newline-delimited JSON (JSONL) for
//! easy inspection; the latest meaningful record per phase wins on replay.
//! A lock file guards the whole state directory so two concurrent pipeline
//! runs cannot interleave.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::domain::{PhaseRecord, PhaseStatus};

/// File-based phase journal using JSONL format
pub struct StateStore {
    /// Directory holding the journal and the lock file
    state_dir: PathBuf,

    /// Path to the phases.jsonl journal
    journal_path: PathBuf,
}

impl StateStore {
    /// Create or open the state store in a directory
    pub async fn open(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir)
            .await
            .with_context(|| format!("Failed to create state directory: {}", state_dir.display()))?;

        Ok(Self {
            state_dir: state_dir.to_path_buf(),
            journal_path: state_dir.join("phases.jsonl"),
        })
    }

    /// The state directory
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Path to the journal file
    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    /// Append one phase transition to the journal
    pub async fn append(&self, record: &PhaseRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .await
            .with_context(|| {
                format!("Failed to open journal: {}", self.journal_path.display())
            })?;

        let json = serde_json::to_string(record).context("Failed to serialize phase record")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write phase record")?;
        file.flush().await.context("Failed to flush phase record")?;

        Ok(())
    }

    /// Replay all records in append order
    pub async fn replay(&self) -> Result<Vec<PhaseRecord>> {
        if !self.journal_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.journal_path)
            .await
            .with_context(|| format!("Failed to open journal: {}", self.journal_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut records = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let record: PhaseRecord = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse phase record: {}", line))?;
            records.push(record);
        }

        Ok(records)
    }

    /// Latest record per phase, in phase-id order
    pub async fn latest(&self) -> Result<BTreeMap<String, PhaseRecord>> {
        let mut latest = BTreeMap::new();
        for record in self.replay().await? {
            latest.insert(record.phase_id.clone(), record);
        }
        Ok(latest)
    }

    /// Whether a phase's persisted history shows it completed.
    ///
    /// A later Failed record invalidates an earlier Completed one (a forced
    /// rerun that failed), while Running and Skipped records preserve it.
    pub async fn is_completed(&self, phase_id: &str) -> Result<bool> {
        let mut completed = false;
        for record in self.replay().await? {
            if record.phase_id != phase_id {
                continue;
            }
            match record.status {
                PhaseStatus::Completed => completed = true,
                PhaseStatus::Failed => completed = false,
                _ => {}
            }
        }
        Ok(completed)
    }
}

/// Errors raised when acquiring the run lock
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another pipeline run already holds the lock
    #[error("another pipeline run holds the lock at {path}")]
    AlreadyRunning { path: PathBuf },

    /// The lock file could not be created or opened
    #[error("failed to open lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive run-level lock held for the duration of a pipeline run.
///
/// Released on drop, covering all exit paths.
pub struct RunLock {
    file: std::fs::File,
    path: PathBuf,
}

impl RunLock {
    /// Acquire the lock, failing fast if another run holds it
    pub fn acquire(state_dir: &Path) -> Result<Self, LockError> {
        std::fs::create_dir_all(state_dir).map_err(|e| LockError::Io {
            path: state_dir.to_path_buf(),
            source: e,
        })?;

        let path = state_dir.join("pipeline.lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| LockError::Io {
                path: path.clone(),
                source: e,
            })?;

        file.try_lock_exclusive()
            .map_err(|_| LockError::AlreadyRunning { path: path.clone() })?;

        Ok(Self { file, path })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailureKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_and_replay_order() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open(temp.path()).await.unwrap();

        for id in ["a", "b", "c"] {
            store
                .append(&PhaseRecord::new(id, PhaseStatus::Running))
                .await
                .unwrap();
        }

        let records = store.replay().await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].phase_id, "a");
        assert_eq!(records[2].phase_id, "c");
    }

    #[tokio::test]
    async fn test_latest_record_wins() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open(temp.path()).await.unwrap();

        store
            .append(&PhaseRecord::new("a", PhaseStatus::Running))
            .await
            .unwrap();
        store
            .append(&PhaseRecord::new("a", PhaseStatus::Completed).with_duration(10))
            .await
            .unwrap();

        let latest = store.latest().await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest["a"].status, PhaseStatus::Completed);
    }

    #[tokio::test]
    async fn test_completed_survives_later_skip() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open(temp.path()).await.unwrap();

        store
            .append(&PhaseRecord::new("a", PhaseStatus::Completed))
            .await
            .unwrap();
        store
            .append(&PhaseRecord::new("a", PhaseStatus::Skipped))
            .await
            .unwrap();

        // A skip record from a later resume must not lose the completion
        assert!(store.is_completed("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_forced_rerun_invalidates_completion() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open(temp.path()).await.unwrap();

        store
            .append(&PhaseRecord::new("a", PhaseStatus::Completed))
            .await
            .unwrap();
        store
            .append(
                &PhaseRecord::new("a", PhaseStatus::Failed)
                    .with_failure_kind(FailureKind::NonZeroExit),
            )
            .await
            .unwrap();

        assert!(!store.is_completed("a").await.unwrap());
    }

    #[test]
    fn test_lock_excludes_second_acquire() {
        let temp = TempDir::new().unwrap();

        let first = RunLock::acquire(temp.path()).unwrap();
        let second = RunLock::acquire(temp.path());
        assert!(matches!(second, Err(LockError::AlreadyRunning { .. })));

        drop(first);
        assert!(RunLock::acquire(temp.path()).is_ok());
    }
}

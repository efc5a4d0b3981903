//! Build-artifact collection.
//!
//! Scans staged output trees for source archives and prebuilt packages and
//! relocates matches into stable destination buckets. The collector is the
//! sole writer of the buckets; phases never write there directly. A copy
//! failure for an individual file is logged and skipped so one unreadable
//! file cannot abort the pass, and re-running over an unchanged tree
//! reproduces the same destination set (copy-if-absent-or-changed).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::Pattern;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::domain::{Artifact, ArtifactKind, CollectionSummary};

/// File-name patterns collected by default
pub const DEFAULT_PATTERNS: &[&str] = &["*.whl", "*.tar.gz", "*.tgz", "*.tar.bz2", "*.zip"];

/// Relocates matching build outputs into destination buckets
pub struct ArtifactCollector {
    /// Root of the destination area (buckets are subdirectories)
    dest_root: PathBuf,

    /// File-name patterns to match
    patterns: Vec<Pattern>,
}

impl ArtifactCollector {
    /// Create a collector with explicit patterns
    pub fn new(dest_root: impl Into<PathBuf>, patterns: &[String]) -> Result<Self> {
        let compiled = patterns
            .iter()
            .map(|p| Pattern::new(p).with_context(|| format!("invalid pattern: {}", p)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            dest_root: dest_root.into(),
            patterns: compiled,
        })
    }

    /// Create a collector with the default archive/package patterns
    pub fn with_default_patterns(dest_root: impl Into<PathBuf>) -> Result<Self> {
        let patterns: Vec<String> = DEFAULT_PATTERNS.iter().map(|s| s.to_string()).collect();
        Self::new(dest_root, &patterns)
    }

    /// The destination root
    pub fn dest_root(&self) -> &Path {
        &self.dest_root
    }

    /// Walk each root depth-first and relocate matches into the buckets
    pub fn collect(&self, roots: &[PathBuf]) -> Result<CollectionSummary> {
        for kind in [ArtifactKind::SourceArchive, ArtifactKind::BinaryPackage] {
            let bucket = self.dest_root.join(kind.bucket());
            fs::create_dir_all(&bucket)
                .with_context(|| format!("failed to create bucket: {}", bucket.display()))?;
        }

        let mut summary = CollectionSummary::default();
        for root in roots {
            if !root.exists() {
                debug!(root = %root.display(), "collection root missing, skipping");
                continue;
            }
            self.walk(root, &mut summary);
        }

        Ok(summary)
    }

    fn walk(&self, dir: &Path, summary: &mut CollectionSummary) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot read directory, skipping");
                summary.failed += 1;
                return;
            }
        };

        // Deterministic order across passes
        let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        paths.sort();

        for path in paths {
            if path.is_dir() {
                self.walk(&path, summary);
            } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if self.matches(name) {
                    if let Some(kind) = classify(name) {
                        self.place(&path, name, kind, summary);
                    }
                }
            }
        }
    }

    fn matches(&self, file_name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(file_name))
    }

    /// Copy one match into its bucket unless an identical copy is there
    fn place(&self, source: &Path, name: &str, kind: ArtifactKind, summary: &mut CollectionSummary) {
        let dest = self.dest_root.join(kind.bucket()).join(name);

        if same_content(source, &dest) {
            debug!(artifact = %name, "already collected, unchanged");
            summary.unchanged += 1;
            return;
        }

        match fs::copy(source, &dest) {
            Ok(size_bytes) => {
                summary.copied += 1;
                summary.artifacts.push(Artifact {
                    source: source.to_path_buf(),
                    dest,
                    kind,
                    size_bytes,
                });
            }
            Err(e) => {
                warn!(artifact = %name, error = %e, "copy failed, skipping");
                summary.failed += 1;
            }
        }
    }
}

/// Classify a file name by suffix
pub fn classify(name: &str) -> Option<ArtifactKind> {
    if name.ends_with(".whl") {
        Some(ArtifactKind::BinaryPackage)
    } else if name.ends_with(".tar.gz")
        || name.ends_with(".tgz")
        || name.ends_with(".tar.bz2")
        || name.ends_with(".zip")
    {
        Some(ArtifactKind::SourceArchive)
    } else {
        None
    }
}

/// Compare an existing destination against the source (size, then digest)
fn same_content(source: &Path, dest: &Path) -> bool {
    if !dest.exists() {
        return false;
    }

    let (src_meta, dest_meta) = match (fs::metadata(source), fs::metadata(dest)) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return false,
    };
    if src_meta.len() != dest_meta.len() {
        return false;
    }

    match (file_digest(source), file_digest(dest)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Hex sha256 of a file's contents
fn file_digest(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

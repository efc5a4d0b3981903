//! Artifacts collected from the remote sandbox after a phase succeeds.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A build output relocated into a destination bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Where the file was found
    pub source: PathBuf,

    /// Where the collector placed it
    pub dest: PathBuf,

    /// What kind of output this is
    pub kind: ArtifactKind,

    /// Size in bytes
    pub size_bytes: u64,
}

/// Classification of a collected file, which selects its destination bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Source archive (.tar.gz, .tar.bz2, .tgz, .zip)
    SourceArchive,

    /// Prebuilt binary package (.whl)
    BinaryPackage,
}

impl ArtifactKind {
    /// Bucket subdirectory under the collector's destination root
    pub fn bucket(&self) -> &'static str {
        match self {
            Self::SourceArchive => "sdists",
            Self::BinaryPackage => "wheels",
        }
    }
}

/// Tally of one collection pass (or several merged together)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionSummary {
    /// Files newly copied or refreshed this pass
    pub artifacts: Vec<Artifact>,

    /// Count of copies performed
    pub copied: usize,

    /// Matches already present and unchanged at the destination
    pub unchanged: usize,

    /// Individual files that could not be copied (logged, not fatal)
    pub failed: usize,
}

impl CollectionSummary {
    /// Fold another summary into this one
    pub fn absorb(&mut self, other: CollectionSummary) {
        self.artifacts.extend(other.artifacts);
        self.copied += other.copied;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }

    /// Total matches seen (copied or already present)
    pub fn total_matched(&self) -> usize {
        self.copied + self.unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_names() {
        assert_eq!(ArtifactKind::SourceArchive.bucket(), "sdists");
        assert_eq!(ArtifactKind::BinaryPackage.bucket(), "wheels");
    }

    #[test]
    fn test_summary_absorb() {
        let mut a = CollectionSummary {
            copied: 2,
            unchanged: 1,
            ..Default::default()
        };
        let b = CollectionSummary {
            copied: 1,
            unchanged: 3,
            failed: 1,
            ..Default::default()
        };

        a.absorb(b);
        assert_eq!(a.copied, 3);
        assert_eq!(a.unchanged, 4);
        assert_eq!(a.failed, 1);
        assert_eq!(a.total_matched(), 7);
    }
}

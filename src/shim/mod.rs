//! Placeholder libraries for cross-build link steps.
//!
//! The target runtime provides some libraries only on the device, so the
//! build host can never link against the real thing. Before a cross-build
//! phase runs, each required library missing from the sysroot gets a
//! stand-in shared object (exporting no real symbols) compiled into a shim
//! directory that is prepended to the library search path for that phase
//! only. A library that genuinely exists in the sysroot always wins; no
//! shim is generated for it.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while preparing placeholder libraries
#[derive(Debug, Error)]
pub enum ShimError {
    /// Could not create or write the shim directory
    #[error("failed to prepare shim directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The host compiler could not produce a placeholder
    #[error("failed to generate placeholder for '{library}': {reason}")]
    GenerationFailed { library: String, reason: String },
}

/// Synthesizes placeholder libraries for missing target-runtime libraries
pub struct ShimResolver {
    /// Host compiler used to produce the stubs ($CC, falling back to cc)
    compiler: String,
}

impl Default for ShimResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ShimResolver {
    /// Create a resolver using the host compiler from $CC, or `cc`
    pub fn new() -> Self {
        let compiler = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
        Self { compiler }
    }

    /// Create a resolver with an explicit compiler
    pub fn with_compiler(compiler: impl Into<String>) -> Self {
        Self {
            compiler: compiler.into(),
        }
    }

    /// Prepare shims for the given libraries.
    ///
    /// Libraries found in the sysroot are recorded as `present` and left
    /// alone; the rest are synthesized into `shim_root`.
    pub fn prepare(
        &self,
        required: &[String],
        sysroot: &Path,
        shim_root: &Path,
    ) -> Result<ShimDirectory, ShimError> {
        fs::create_dir_all(shim_root).map_err(|e| ShimError::Io {
            path: shim_root.to_path_buf(),
            source: e,
        })?;

        let mut generated = Vec::new();
        let mut present = Vec::new();

        // Dedup while keeping deterministic order
        let names: BTreeSet<&String> = required.iter().collect();

        for name in names {
            if sysroot_has(sysroot, name) {
                debug!(library = %name, "real library present in sysroot, no shim");
                present.push(name.clone());
                continue;
            }

            let dest = shim_root.join(lib_file_name(name));
            self.generate(&dest, name)?;
            info!(library = %name, path = %dest.display(), "substituted placeholder library");
            generated.push(name.clone());
        }

        Ok(ShimDirectory {
            dir: shim_root.to_path_buf(),
            generated,
            present,
        })
    }

    /// Compile one empty stub into `dest`
    fn generate(&self, dest: &Path, library: &str) -> Result<(), ShimError> {
        let stub = dest.with_extension("c");
        fs::write(&stub, "/* placeholder: resolved on the device at run time */\n").map_err(
            |e| ShimError::Io {
                path: stub.clone(),
                source: e,
            },
        )?;

        let output = Command::new(&self.compiler)
            .args(["-shared", "-fPIC", "-o"])
            .arg(dest)
            .arg(&stub)
            .output()
            .map_err(|e| ShimError::GenerationFailed {
                library: library.to_string(),
                reason: format!("cannot run '{}': {}", self.compiler, e),
            })?;

        let _ = fs::remove_file(&stub);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ShimError::GenerationFailed {
                library: library.to_string(),
                reason: stderr.trim().to_string(),
            });
        }

        Ok(())
    }
}

/// A prepared shim directory for one phase
#[derive(Debug, Clone)]
pub struct ShimDirectory {
    /// Directory to prepend to the library search path
    pub dir: PathBuf,

    /// Libraries that were substituted with placeholders
    pub generated: Vec<String>,

    /// Libraries that genuinely exist in the sysroot (no shim emitted)
    pub present: Vec<String>,
}

impl ShimDirectory {
    /// Whether any placeholder was actually generated
    pub fn is_empty(&self) -> bool {
        self.generated.is_empty()
    }
}

/// File name for a library ("z" -> "libz.so"; an explicit file name passes
/// through unchanged)
fn lib_file_name(name: &str) -> String {
    if name.starts_with("lib") && name.contains('.') {
        name.to_string()
    } else {
        format!("lib{}.so", name)
    }
}

/// Check the usual sysroot locations for a real copy of the library
fn sysroot_has(sysroot: &Path, name: &str) -> bool {
    let file = lib_file_name(name);
    let archive = format!("lib{}.a", name.trim_start_matches("lib"));

    for dir in [
        sysroot.to_path_buf(),
        sysroot.join("lib"),
        sysroot.join("usr").join("lib"),
    ] {
        if dir.join(&file).exists() || dir.join(&archive).exists() {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lib_file_name() {
        assert_eq!(lib_file_name("z"), "libz.so");
        assert_eq!(lib_file_name("android"), "libandroid.so");
        assert_eq!(lib_file_name("liblog.so"), "liblog.so");
    }

    #[test]
    fn test_sysroot_has_checks_lib_subdirs() {
        let temp = tempfile::TempDir::new().unwrap();
        let sysroot = temp.path();

        assert!(!sysroot_has(sysroot, "z"));

        let lib_dir = sysroot.join("usr").join("lib");
        fs::create_dir_all(&lib_dir).unwrap();
        fs::write(lib_dir.join("libz.so"), b"").unwrap();

        assert!(sysroot_has(sysroot, "z"));
        assert!(!sysroot_has(sysroot, "log"));
    }

    #[test]
    fn test_generation_failure_is_scoped_to_library() {
        let temp = tempfile::TempDir::new().unwrap();
        let resolver = ShimResolver::with_compiler("/nonexistent/compiler");

        let err = resolver
            .prepare(
                &["log".to_string()],
                &temp.path().join("sysroot"),
                &temp.path().join("shims"),
            )
            .unwrap_err();

        match err {
            ShimError::GenerationFailed { library, .. } => assert_eq!(library, "log"),
            other => panic!("unexpected error: {other}"),
        }
    }
}

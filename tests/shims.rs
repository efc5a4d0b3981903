//! Shim Resolver Integration Tests
//!
//! Exercises placeholder synthesis against a stand-in compiler so the
//! resolution rules (real sysroot library wins, missing libraries get
//! placeholders) are checked end to end.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use provis::shim::{ShimError, ShimResolver};

/// Stand-in compiler: finds `-o TARGET` in its arguments and creates the
/// target file, like a linker producing a shared object.
fn fake_compiler(dir: &Path) -> PathBuf {
    let path = dir.join("cc");
    std::fs::write(
        &path,
        r#"#!/bin/sh
while [ $# -gt 0 ]; do
    if [ "$1" = "-o" ]; then
        shift
        : > "$1"
        exit 0
    fi
    shift
done
exit 1
"#,
    )
    .unwrap();

    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

#[test]
fn test_missing_libraries_get_placeholders() {
    let temp = TempDir::new().unwrap();
    let compiler = fake_compiler(temp.path());
    let resolver = ShimResolver::with_compiler(compiler.display().to_string());

    let shim_root = temp.path().join("shims");
    let prepared = resolver
        .prepare(
            &["log".to_string(), "android".to_string()],
            &temp.path().join("sysroot"),
            &shim_root,
        )
        .unwrap();

    assert_eq!(prepared.generated, vec!["android", "log"]);
    assert!(prepared.present.is_empty());
    assert!(shim_root.join("liblog.so").exists());
    assert!(shim_root.join("libandroid.so").exists());
    // Stub sources are cleaned up after compilation
    assert!(!shim_root.join("liblog.c").exists());
}

#[test]
fn test_real_sysroot_library_wins_over_placeholder() {
    let temp = TempDir::new().unwrap();
    let compiler = fake_compiler(temp.path());
    let resolver = ShimResolver::with_compiler(compiler.display().to_string());

    let sysroot = temp.path().join("sysroot");
    std::fs::create_dir_all(sysroot.join("usr").join("lib")).unwrap();
    std::fs::write(sysroot.join("usr").join("lib").join("libz.so"), b"real").unwrap();

    let shim_root = temp.path().join("shims");
    let prepared = resolver
        .prepare(
            &["z".to_string(), "log".to_string()],
            &sysroot,
            &shim_root,
        )
        .unwrap();

    assert_eq!(prepared.present, vec!["z"]);
    assert_eq!(prepared.generated, vec!["log"]);
    // No shadow of the real library in the shim directory
    assert!(!shim_root.join("libz.so").exists());
    assert!(shim_root.join("liblog.so").exists());
}

#[test]
fn test_duplicate_requirements_prepare_once() {
    let temp = TempDir::new().unwrap();
    let compiler = fake_compiler(temp.path());
    let resolver = ShimResolver::with_compiler(compiler.display().to_string());

    let prepared = resolver
        .prepare(
            &["log".to_string(), "log".to_string()],
            &temp.path().join("sysroot"),
            &temp.path().join("shims"),
        )
        .unwrap();

    assert_eq!(prepared.generated, vec!["log"]);
}

#[test]
fn test_unusable_compiler_reports_generation_failure() {
    let temp = TempDir::new().unwrap();
    let resolver = ShimResolver::with_compiler("/nonexistent/compiler");

    let err = resolver
        .prepare(
            &["log".to_string()],
            &temp.path().join("sysroot"),
            &temp.path().join("shims"),
        )
        .unwrap_err();

    match err {
        ShimError::GenerationFailed { library, reason } => {
            assert_eq!(library, "log");
            assert!(reason.contains("/nonexistent/compiler"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_nothing_required_prepares_empty_directory() {
    let temp = TempDir::new().unwrap();
    let resolver = ShimResolver::with_compiler("/nonexistent/compiler");

    let shim_root = temp.path().join("shims");
    let prepared = resolver
        .prepare(&[], &temp.path().join("sysroot"), &shim_root)
        .unwrap();

    assert!(prepared.is_empty());
    assert!(shim_root.is_dir());
}

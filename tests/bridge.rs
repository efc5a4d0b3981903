//! Bridge Transport Integration Tests
//!
//! Drives the real AdbBridge against a stand-in bridge binary (a shell
//! script) to exercise exit-marker recovery, timeouts, and environment
//! merging without a device attached.

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use provis::bridge::{AdbBridge, Bridge, BridgeError};
use provis::domain::RemoteCommand;

/// Write an executable stand-in for the bridge binary.
///
/// It understands the subset of invocations the bridge issues:
/// `-s SERIAL shell SCRIPT` runs the script in a local shell, and
/// `-s SERIAL get-state` reports a healthy device.
fn fake_bridge(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "adb",
        r#"#!/bin/sh
if [ "$3" = "shell" ]; then
    exec sh -c "$4"
fi
if [ "$3" = "get-state" ]; then
    echo device
    exit 0
fi
echo "unexpected invocation: $*" >&2
exit 64
"#,
    )
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();

    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn bridge_with(binary: &Path) -> AdbBridge {
    AdbBridge::new("emulator-5554").with_binary_path(binary.display().to_string())
}

#[tokio::test]
async fn test_execute_captures_stdout_and_strips_marker() {
    let temp = TempDir::new().unwrap();
    let bridge = bridge_with(&fake_bridge(temp.path()));

    let cmd = RemoteCommand::new("echo").arg("provisioning");
    let result = bridge.execute(&cmd, Duration::from_secs(5)).await.unwrap();

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "provisioning\n");
    assert!(!result.stdout.contains("__PROVIS_EXIT__"));
}

#[tokio::test]
async fn test_execute_recovers_remote_exit_code() {
    let temp = TempDir::new().unwrap();
    let bridge = bridge_with(&fake_bridge(temp.path()));

    // The stand-in shell itself exits zero; only the marker carries the
    // remote status
    let cmd = RemoteCommand::from_argv(["sh", "-c", "exit 3"]);
    let err = bridge
        .execute(&cmd, Duration::from_secs(5))
        .await
        .unwrap_err();

    match err {
        BridgeError::NonZeroExit(result) => assert_eq!(result.exit_code, 3),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_exit_code_recovered_when_output_lacks_trailing_newline() {
    let temp = TempDir::new().unwrap();
    let bridge = bridge_with(&fake_bridge(temp.path()));

    // Output ends mid-line; the marker must not be glued onto it
    let cmd = RemoteCommand::from_argv(["sh", "-c", "printf foo; exit 3"]);
    let err = bridge
        .execute(&cmd, Duration::from_secs(5))
        .await
        .unwrap_err();

    match err {
        BridgeError::NonZeroExit(result) => {
            assert_eq!(result.exit_code, 3);
            assert_eq!(result.stdout, "foo");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_execute_times_out() {
    let temp = TempDir::new().unwrap();
    let binary = write_script(
        temp.path(),
        "adb",
        "#!/bin/sh\nsleep 30\n",
    );
    let bridge = bridge_with(&binary);

    let cmd = RemoteCommand::new("true");
    let err = bridge
        .execute(&cmd, Duration::from_millis(100))
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::Timeout(_)));
}

#[tokio::test]
async fn test_execute_env_override_wins_over_base() {
    let temp = TempDir::new().unwrap();
    let base: BTreeMap<String, String> =
        [("FOO".to_string(), "base".to_string())].into_iter().collect();
    let bridge = bridge_with(&fake_bridge(temp.path())).with_base_env(base);

    let cmd = RemoteCommand::from_argv(["sh", "-c", "echo $FOO"]).env("FOO", "override");
    let result = bridge.execute(&cmd, Duration::from_secs(5)).await.unwrap();

    assert_eq!(result.stdout, "override\n");
}

#[tokio::test]
async fn test_execute_base_env_reaches_remote_shell() {
    let temp = TempDir::new().unwrap();
    let base: BTreeMap<String, String> = [(
        "PREFIX".to_string(),
        "/data/data/com.termux/files/usr".to_string(),
    )]
    .into_iter()
    .collect();
    let bridge = bridge_with(&fake_bridge(temp.path())).with_base_env(base);

    let cmd = RemoteCommand::from_argv(["sh", "-c", "echo $PREFIX"]);
    let result = bridge.execute(&cmd, Duration::from_secs(5)).await.unwrap();

    assert_eq!(result.stdout, "/data/data/com.termux/files/usr\n");
}

#[tokio::test]
async fn test_health_check_against_reachable_target() {
    let temp = TempDir::new().unwrap();
    let bridge = bridge_with(&fake_bridge(temp.path()));

    bridge.health_check().await.unwrap();
}

#[tokio::test]
async fn test_health_check_reports_missing_device() {
    let temp = TempDir::new().unwrap();
    let binary = write_script(
        temp.path(),
        "adb",
        "#!/bin/sh\necho \"error: device 'emulator-5554' not found\" >&2\nexit 1\n",
    );
    let bridge = bridge_with(&binary);

    let err = bridge.health_check().await.unwrap_err();
    match err {
        BridgeError::Unavailable { reason, .. } => assert!(reason.contains("not found")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_missing_binary_is_unavailable() {
    let bridge = AdbBridge::new("emulator-5554")
        .with_binary_path("/nonexistent/bridge-binary".to_string());

    let err = bridge
        .execute(&RemoteCommand::new("true"), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Unavailable { .. }));
}

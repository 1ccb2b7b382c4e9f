//! Integration tests for the CLI binary.
//!
//! This test is registered as a [[test]] in the stream-auth-cli crate so
//! that CARGO_BIN_EXE_stream-auth is available.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Get a Command pointing to the `stream-auth` binary, using `store` as
/// the state file.
fn stream_auth(store: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_stream-auth"));
    cmd.arg("--store").arg(store);
    cmd
}

fn run_ok(cmd: &mut Command) -> String {
    let output = cmd.output().expect("failed to execute stream-auth");
    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Run a callback subcommand with `body` on stdin. Returns success, stdout
/// and stderr.
fn callback(
    store: &Path,
    subcommand: &str,
    content_type: &str,
    body: &str,
) -> (bool, String, String) {
    let mut child = stream_auth(store)
        .args([subcommand, "--content-type", content_type])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn stream-auth");
    // The command may exit before reading stdin.
    let _ = child.stdin.take().unwrap().write_all(body.as_bytes());
    let output = child.wait_with_output().unwrap();
    (
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).trim().to_string(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    )
}

#[test]
fn cli_responds_to_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_stream-auth"))
        .arg("--help")
        .output()
        .expect("failed to execute stream-auth --help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Usage") && stdout.contains("publish"),
        "help output should list subcommands, got: {stdout}"
    );
}

#[test]
fn cli_responds_to_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_stream-auth"))
        .arg("--version")
        .output()
        .expect("failed to execute stream-auth --version");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("stream-auth") && stdout.contains("0.3"),
        "version output should contain name and version, got: {stdout}"
    );
}

#[test]
fn cli_exits_with_error_on_unknown_flag() {
    let output = Command::new(env!("CARGO_BIN_EXE_stream-auth"))
        .arg("--nonexistent-flag")
        .output()
        .expect("failed to execute stream-auth");

    assert!(!output.status.success());
}

#[test]
fn cli_add_list_block_remove() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("store.db");

    let added = run_ok(stream_auth(&store).args([
        "add",
        "--app",
        "live",
        "--name",
        "talk",
        "--auth-key",
        "k1",
        "--notes",
        "main hall",
    ]));
    let id = added
        .lines()
        .find_map(|line| line.trim().strip_prefix("ID:"))
        .map(|id| id.trim().to_string())
        .expect("add should print the new ID");

    let listed = run_ok(stream_auth(&store).arg("list"));
    assert!(listed.contains(&id));
    assert!(listed.contains("talk"));
    assert!(listed.contains("main hall"));
    assert!(listed.contains("idle"));

    run_ok(stream_auth(&store).args(["block", &id]));
    let listed = run_ok(stream_auth(&store).arg("list"));
    assert!(listed.contains("blocked"));

    let denied = stream_auth(&store)
        .args(["check", "--app", "live", "--name", "talk", "--auth-key", "k1"])
        .output()
        .unwrap();
    assert!(!denied.status.success());
    assert!(String::from_utf8_lossy(&denied.stderr).contains("blocked"));

    run_ok(stream_auth(&store).args(["unblock", &id]));
    let allowed = run_ok(stream_auth(&store).args([
        "check",
        "--app",
        "live",
        "--name",
        "talk",
        "--auth-key",
        "k1",
    ]));
    assert_eq!(allowed.trim(), "allowed");

    run_ok(stream_auth(&store).args(["remove", &id]));
    let listed = run_ok(stream_auth(&store).arg("list"));
    assert!(listed.contains("No streams configured"));
}

#[test]
fn cli_rejects_invalid_input() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("store.db");

    let bad_expiry = stream_auth(&store)
        .args(["add", "--name", "talk", "--auth-key", "k", "--expire", "soon"])
        .output()
        .unwrap();
    assert!(!bad_expiry.status.success());
    assert!(String::from_utf8_lossy(&bad_expiry.stderr).contains("soon"));

    let missing = stream_auth(&store)
        .args(["remove", "no-such-id"])
        .output()
        .unwrap();
    assert!(!missing.status.success());
    assert!(String::from_utf8_lossy(&missing.stderr).contains("not found"));
}

#[test]
fn cli_publish_callbacks_refused_on_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("store.db");
    run_ok(stream_auth(&store).args(["add", "--app", "live", "--name", "talk", "--auth-key", "k1"]));
    run_ok(stream_auth(&store).args(["add", "--app", "live", "--name", "talk", "--auth-key", "k2"]));

    // A live flag would not survive to the next run, so neither publisher
    // may be accepted through the file backend.
    let form = "application/x-www-form-urlencoded";
    for key in ["k1", "k2"] {
        let (ok, body, stderr) =
            callback(&store, "publish", form, &format!("app=live&name=talk&auth={key}\n"));
        assert!(!ok, "publish with {key} must be refused");
        assert_eq!(body, "");
        assert!(stderr.contains("--backend nats"), "stderr: {stderr}");
    }

    let srs = r#"{"action":"on_unpublish","app":"live","stream":"talk","param":""}"#;
    let (ok, _, stderr) = callback(&store, "unpublish", "application/json", srs);
    assert!(!ok);
    assert!(stderr.contains("--backend nats"));

    let listed = run_ok(stream_auth(&store).arg("list"));
    assert_eq!(listed.matches("idle").count(), 2, "no stream may be live: {listed}");
}

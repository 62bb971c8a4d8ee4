//! Integration tests for the nudge CLI end-to-end flow.
//!
//! Covers the producer side (send/ack/inbox/sweep), binding discovery,
//! and the daemon lifecycle with a `cat` target standing in for the real
//! interactive CLI.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Get the path to the compiled `nudge` binary (from target/debug or target/release).
fn nudge_binary() -> PathBuf {
    // Use the binary built by `cargo test` in the same target directory
    let mut path = std::env::current_exe().expect("could not get current exe path");
    // current_exe is something like target/debug/deps/integration_cli-<hash>
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("nudge");
    assert!(
        path.exists(),
        "nudge binary not found at {:?}. Run `cargo build` first.",
        path
    );
    path
}

/// Helper: run `nudge` with given args against a specific nudge directory.
fn nudge_cmd(dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(nudge_binary())
        .arg("--dir")
        .arg(dir)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .unwrap_or_else(|e| panic!("Failed to run nudge {:?}: {}", args, e))
}

/// Helper: run `nudge` and assert success, returning stdout as string.
fn nudge_ok(dir: &Path, args: &[&str]) -> String {
    let output = nudge_cmd(dir, args);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    assert!(
        output.status.success(),
        "nudge {:?} failed.\nstdout: {}\nstderr: {}",
        args,
        stdout,
        stderr
    );
    stdout
}

fn setup(tmp_root: &Path) -> PathBuf {
    let dir = tmp_root.join(".nudge");
    nudge_ok(&dir, &["init"]);
    dir
}

/// Poll until the predicate holds or the deadline passes.
fn wait_for(deadline: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    pred()
}

#[test]
fn test_init_creates_layout() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = setup(tmp.path());

    assert!(dir.join("config.toml").is_file());
    assert!(dir.join("signals").is_dir());
    assert!(dir.join("sessions").is_dir());

    // Re-init refuses
    let output = nudge_cmd(&dir, &["init"]);
    assert!(!output.status.success());
}

#[test]
fn test_send_inbox_ack_flow() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = setup(tmp.path());

    nudge_ok(
        &dir,
        &["send", "dev1", "--from", "reviewer", "-m", "build failed"],
    );

    let inbox = nudge_ok(&dir, &["inbox", "dev1"]);
    assert!(inbox.contains("reviewer"));
    assert!(inbox.contains("build failed"));

    nudge_ok(&dir, &["ack", "dev1"]);

    // Acknowledged: inbox empty, recall still shows it
    let inbox = nudge_ok(&dir, &["inbox", "dev1"]);
    assert!(inbox.contains("No pending signals"));
    let recall = nudge_ok(&dir, &["recall", "dev1"]);
    assert!(recall.contains("build failed"));

    // Acking again is fine
    let out = nudge_ok(&dir, &["ack", "dev1"]);
    assert!(out.contains("No pending signal"));
}

#[test]
fn test_send_overwrites_pending() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = setup(tmp.path());

    nudge_ok(&dir, &["send", "dev1", "--from", "a", "-m", "first"]);
    let out = nudge_ok(&dir, &["send", "dev1", "--from", "b", "-m", "second"]);
    assert!(out.contains("Replaced pending signal"));

    let inbox = nudge_ok(&dir, &["inbox", "dev1"]);
    assert!(inbox.contains("second"));
    assert!(!inbox.contains("first"));
}

#[test]
fn test_bind_unbind_and_agents() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = setup(tmp.path());

    nudge_ok(&dir, &["bind", "dev1", "--session", "tty1"]);
    nudge_ok(&dir, &["bind", "dev2", "--session", "tty2"]);
    nudge_ok(&dir, &["bind", "legacy", "--global"]);

    let agents = nudge_ok(&dir, &["agents"]);
    assert!(agents.contains("dev1"));
    assert!(agents.contains("dev2"));
    assert!(agents.contains("legacy"));

    nudge_ok(&dir, &["unbind", "--session", "tty1"]);
    nudge_ok(&dir, &["unbind"]);
    let agents = nudge_ok(&dir, &["agents"]);
    assert!(!agents.contains("dev1"));
    assert!(!agents.contains("legacy"));
    assert!(agents.contains("dev2"));
}

#[test]
fn test_status_reports_pending() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = setup(tmp.path());

    nudge_ok(&dir, &["bind", "dev1", "--session", "s1"]);
    nudge_ok(&dir, &["send", "dev1", "--from", "pm", "-m", "standup"]);

    let status = nudge_ok(&dir, &["status"]);
    assert!(status.contains("Daemon: not running"));
    assert!(status.contains("dev1"));
    assert!(status.contains("1 pending"));

    let json: serde_json::Value =
        serde_json::from_str(&nudge_ok(&dir, &["--json", "status"])).unwrap();
    assert_eq!(json["agents"][0]["agent_id"], "dev1");
    assert_eq!(json["agents"][0]["pending"], 1);
}

#[test]
fn test_sweep_removes_expired() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = setup(tmp.path());

    nudge_ok(&dir, &["send", "dev1", "--from", "x", "-m", "old"]);
    nudge_ok(&dir, &["ack", "dev1"]);

    // TTL 0: anything acknowledged in the past is fair game, but the ack
    // just happened, so wait a moment
    std::thread::sleep(Duration::from_millis(1100));
    let out = nudge_ok(&dir, &["sweep", "--ttl-secs", "1"]);
    assert!(out.contains("Swept 1"));
    assert!(!dir.join("signals").join("dev1.json").exists());
}

#[test]
fn test_check_without_daemon_fails() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = setup(tmp.path());
    let output = nudge_cmd(&dir, &["check", "dev1"]);
    assert!(!output.status.success());
}

/// Point the target at `cat` so the daemon has something harmless to
/// spawn and inject into.
fn configure_cat_target(dir: &Path) {
    let config = r#"[delivery]
idle_threshold_ms = 500
idle_check_interval_ms = 200

[daemon]
poll_interval_ms = 200

[target]
command = "cat"
autospawn = true
"#;
    fs::write(dir.join("config.toml"), config).unwrap();
}

#[test]
fn test_daemon_lifecycle_and_delivery() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = setup(tmp.path());
    configure_cat_target(&dir);
    nudge_ok(&dir, &["bind", "dev1", "--session", "s1"]);

    let socket = tmp.path().join("nudge.sock");
    nudge_ok(&dir, &["daemon", "start", "--socket", socket.to_str().unwrap()]);

    // Daemon reports running
    assert!(wait_for(Duration::from_secs(5), || {
        nudge_ok(&dir, &["daemon", "status"]).contains("Daemon: running")
    }));

    // Autospawn gives dev1 a target and a heartbeat
    let heartbeat = dir.join("agents").join("dev1").join("heartbeat.json");
    assert!(wait_for(Duration::from_secs(5), || heartbeat.exists()));

    // A signal gets delivered once the target has been idle: cat never
    // emits stream-json activity, so it idles out after the threshold
    nudge_ok(&dir, &["send", "dev1", "--from", "pm", "-m", "wake up"]);
    let signal_path = dir.join("signals").join("dev1.json");
    assert!(wait_for(Duration::from_secs(10), || {
        fs::read_to_string(&signal_path)
            .ok()
            .and_then(|c| serde_json::from_str::<serde_json::Value>(&c).ok())
            .map(|v| v["acknowledged"] == true)
            .unwrap_or(false)
    }));

    // The wire record landed in cat's stdin and came back out on its
    // stdout log
    let log = dir.join("agents").join("dev1").join("output.log");
    assert!(wait_for(Duration::from_secs(5), || {
        fs::read_to_string(&log)
            .map(|c| c.contains("wake signal from pm"))
            .unwrap_or(false)
    }));

    nudge_ok(&dir, &["daemon", "stop"]);
    assert!(wait_for(Duration::from_secs(5), || {
        nudge_ok(&dir, &["daemon", "status"]).contains("not running")
    }));
    assert!(!dir.join("daemon.pid").exists());
}

#[test]
fn test_daemon_force_check_roundtrip() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = setup(tmp.path());
    configure_cat_target(&dir);
    nudge_ok(&dir, &["bind", "dev1", "--session", "s1"]);

    let socket = tmp.path().join("nudge.sock");
    nudge_ok(&dir, &["daemon", "start", "--socket", socket.to_str().unwrap()]);

    let heartbeat = dir.join("agents").join("dev1").join("heartbeat.json");
    assert!(wait_for(Duration::from_secs(5), || heartbeat.exists()));

    // Wait out the idle threshold, then a check prompt should inject
    let log = dir.join("agents").join("dev1").join("output.log");
    assert!(wait_for(Duration::from_secs(10), || {
        nudge_cmd(&dir, &["check", "dev1"]).status.success()
    }));
    assert!(wait_for(Duration::from_secs(5), || {
        fs::read_to_string(&log)
            .map(|c| c.contains("Check your inbox"))
            .unwrap_or(false)
    }));

    nudge_ok(&dir, &["daemon", "stop"]);
}

#[test]
fn test_daemon_start_is_idempotent() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = setup(tmp.path());
    configure_cat_target(&dir);

    let socket = tmp.path().join("nudge.sock");
    nudge_ok(&dir, &["daemon", "start", "--socket", socket.to_str().unwrap()]);
    assert!(wait_for(Duration::from_secs(5), || {
        nudge_ok(&dir, &["daemon", "status"]).contains("Daemon: running")
    }));

    let out = nudge_ok(&dir, &["daemon", "start"]);
    assert!(out.contains("already running"));

    nudge_ok(&dir, &["daemon", "stop"]);
}

//! End-to-end tests for the `cond` binary

use assert_cmd::cargo::cargo_bin;
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

/// `cond` process isolated from the user's config and environment
fn cond_process(home: &TempDir) -> std::process::Command {
    let mut cmd = std::process::Command::new(cargo_bin("cond"));
    for key in [
        "CONDUCTOR_LOG_DIR",
        "CONDUCTOR_ROTATION_BYTES",
        "CONDUCTOR_PRESSURE_THRESHOLDS",
        "CONDUCTOR_HYSTERESIS",
        "CONDUCTOR_DESCENT_DWELL",
        "CONDUCTOR_OVERHEAD_BUDGET",
        "CONDUCTOR_COLOR",
        "RUST_LOG",
    ] {
        cmd.env_remove(key);
    }
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("CONDUCTOR_PRESSURE_SOURCE", "process")
        .arg("--log-dir")
        .arg(home.path().join("logs"))
        .arg("--color")
        .arg("never");
    cmd
}

fn cond(home: &TempDir) -> Command {
    Command::from_std(cond_process(home))
}

#[test]
fn test_run_then_inspect_session() {
    let home = TempDir::new().unwrap();

    cond(&home)
        .args(["run", "deploy", "--steps", "3", "--session", "s1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy: session s1"))
        .stdout(predicate::str::contains("deploy started"))
        .stdout(predicate::str::contains("deploy [3/3] 100%"));

    let output = cond(&home)
        .args(["sessions", "list", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let listings: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(listings[0]["command"], "deploy");
    assert_eq!(listings[0]["session_id"], "s1");

    cond(&home)
        .args(["sessions", "show", "deploy", "s1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("step 2 of 3"))
        .stdout(predicate::str::contains("deploy done in"));
}

#[test]
fn test_show_unknown_session_fails() {
    let home = TempDir::new().unwrap();
    cond(&home)
        .args(["sessions", "show", "deploy", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no records for session missing"));
}

#[test]
fn test_probe_json() {
    let home = TempDir::new().unwrap();
    let output = cond(&home).args(["probe", "--format", "json"]).output().unwrap();
    assert!(output.status.success());
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["source"], "process");
    assert!(report["pressure"].as_f64().unwrap() <= 1.0);
}

#[test]
fn test_serve_keeps_stdout_protocol_only() {
    let home = TempDir::new().unwrap();
    let input = concat!(
        r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#, "\n",
        r#"{"jsonrpc":"2.0","method":"note","params":{"text":"hi"}}"#, "\n",
        r#"{"jsonrpc":"2.0","id":2,"method":"echo","params":["a"]}"#, "\n",
    );
    let output = cond(&home)
        .args(["-v", "serve"])
        .write_stdin(input)
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let message: Value = serde_json::from_str(line).unwrap();
        assert_eq!(message["jsonrpc"], "2.0");
    }

    // Human lines and tracing went to stderr
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("← ping"));
}

#[cfg(unix)]
#[test]
fn test_serve_flushes_session_on_sigterm() {
    use std::io::{BufRead, BufReader, Write};
    use std::process::Stdio;

    let home = TempDir::new().unwrap();
    let mut child = cond_process(&home)
        .arg("serve")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let mut stdin = child.stdin.take().unwrap();
    writeln!(stdin, r#"{{"jsonrpc":"2.0","id":1,"method":"ping"}}"#).unwrap();
    stdin.flush().unwrap();

    let mut reply = String::new();
    BufReader::new(child.stdout.take().unwrap())
        .read_line(&mut reply)
        .unwrap();
    assert!(reply.contains("pong"));

    let killed = std::process::Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(killed.success());
    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(130));
    drop(stdin);

    let output = cond(&home)
        .args(["sessions", "list", "--command", "serve", "--format", "json"])
        .output()
        .unwrap();
    let listings: Value = serde_json::from_slice(&output.stdout).unwrap();
    let id = listings[0]["session_id"].as_str().unwrap().to_string();

    cond(&home)
        .args(["sessions", "show", "serve", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("← ping"))
        .stdout(predicate::str::contains("received SIGTERM"));
}

//! Integration tests for the `assetsync` CLI binary.
//!
//! Argument parsing, completions, config inspection, and watch failure
//! paths; none of them needs a live inventory server.
#![allow(clippy::unwrap_used)]

use std::io::Write;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `assetsync` binary with env isolation.
///
/// Clears all `ASSETSYNC_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn assetsync_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("assetsync");
    cmd.env("HOME", "/tmp/assetsync-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/assetsync-cli-test-nonexistent")
        .env_remove("ASSETSYNC_PROFILE")
        .env_remove("ASSETSYNC_CONFIG")
        .env_remove("ASSETSYNC_URL")
        .env_remove("RUST_LOG");
    cmd
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = assetsync_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    assetsync_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("watch")
            .and(predicate::str::contains("config"))
            .and(predicate::str::contains("completions")),
    );
}

#[test]
fn test_version_flag() {
    assetsync_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("assetsync"));
}

#[test]
fn test_watch_help_lists_flags() {
    assetsync_cmd()
        .args(["watch", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--url")
                .and(predicate::str::contains("--channel"))
                .and(predicate::str::contains("--stats-interval")),
        );
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    assetsync_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    assetsync_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honors_flag() {
    assetsync_cmd()
        .args(["--config", "/tmp/somewhere/assetsync.toml", "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/somewhere/assetsync.toml"));
}

#[test]
fn test_config_path_defaults_to_config_toml() {
    assetsync_cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_show_no_config() {
    // A missing file renders the defaults.
    assetsync_cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("heartbeat_interval_secs = 30"));
}

#[test]
fn test_config_show_renders_profiles() {
    let file = config_file(
        r#"
        [profiles.lab]
        url = "ws://lab.local:8080/ws"
        channels = ["alerts"]
        "#,
    );
    assetsync_cmd()
        .arg("--config")
        .arg(file.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[profiles.lab]")
                .and(predicate::str::contains("ws://lab.local:8080/ws")),
        );
}

#[test]
fn test_config_show_rejects_malformed_file() {
    let file = config_file("profiles = 12");
    assetsync_cmd()
        .arg("--config")
        .arg(file.path())
        .args(["config", "show"])
        .assert()
        .failure();
}

// ── Watch error cases ───────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let output = assetsync_cmd().arg("foobar").output().unwrap();
    assert!(!output.status.success(), "Expected failure for invalid subcommand");
    let text = combined_output(&output);
    assert!(
        text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_watch_without_endpoint() {
    assetsync_cmd()
        .arg("watch")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No push endpoint configured"));
}

#[test]
fn test_watch_rejects_http_url() {
    assetsync_cmd()
        .args(["watch", "--url", "https://example.com/ws"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ws://"));
}

#[test]
fn test_watch_unknown_profile() {
    let file = config_file(
        r#"
        [profiles.lab]
        url = "ws://lab.local:8080/ws"
        "#,
    );
    assetsync_cmd()
        .arg("--config")
        .arg(file.path())
        .args(["--profile", "prod", "watch"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("prod").and(predicate::str::contains("lab")));
}

#[test]
fn test_watch_rejects_zero_stats_interval() {
    assetsync_cmd()
        .args(["watch", "--url", "ws://127.0.0.1:1/ws", "--stats-interval", "0"])
        .assert()
        .code(2);
}

#[test]
fn test_watch_gives_up_on_refused_connection() {
    // Port 1 refuses; with no retries the session fails straight away.
    let file = config_file(
        r"
        [defaults]
        max_attempts = 0
        connect_timeout_secs = 5
        ",
    );
    assetsync_cmd()
        .arg("--config")
        .arg(file.path())
        .args(["watch", "--url", "ws://127.0.0.1:1/ws", "--channel", "alerts"])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .code(7)
        .stderr(predicate::str::contains("Gave up reconnecting"))
        .stdout(predicate::str::contains("\"telemetry\""));
}

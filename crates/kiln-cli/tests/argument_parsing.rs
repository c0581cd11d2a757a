//! Focused CLI argument parsing tests.
//!
//! Tests that verify command-line argument parsing and configuration
//! loading without starting a server.

#![allow(deprecated)] // Command::cargo_bin is deprecated but replacement requires newer assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn kiln() -> Command {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

// ============================================================================
// Commands That Work Without Server
// ============================================================================

#[test]
fn version_command_succeeds() {
    kiln()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("kiln"));
}

#[test]
fn version_flag_shows_version() {
    kiln()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn help_flag_shows_usage() {
    kiln()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("event-loop-driven TCP socket server"));
}

#[test]
fn serve_help_lists_sentinel_flags() {
    kiln()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--exit-sentinel"))
        .stdout(predicate::str::contains("--no-exit-sentinel"))
        .stdout(predicate::str::contains("--echo"));
}

// ============================================================================
// Argument Parsing Errors
// ============================================================================

#[test]
fn no_command_shows_help() {
    kiln()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn send_requires_message() {
    kiln()
        .arg("send")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn serve_rejects_invalid_port() {
    kiln()
        .args(["serve", "--port", "not-a-port"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn serve_rejects_conflicting_sentinel_flags() {
    kiln()
        .args(["serve", "--exit-sentinel", "quit", "--no-exit-sentinel"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn tls_cert_requires_key() {
    kiln()
        .args(["serve", "--tls-cert", "cert.pem"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--tls-key"));
}

#[test]
fn send_to_closed_port_fails() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    kiln()
        .args(["send", "hello", "--address", &format!("127.0.0.1:{port}")])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to connect"));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn config_prints_defaults() {
    let temp = TempDir::new().unwrap();

    kiln()
        .args(["config", "--project", temp.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("[server]"))
        .stdout(predicate::str::contains("port = 7000"))
        .stdout(predicate::str::contains("exit_sentinel = \"exit\""));
}

#[test]
fn config_reads_project_file() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("kiln.toml"),
        "[server]\ntick_interval_ms = 50\n",
    )
    .unwrap();

    kiln()
        .args(["config", "--project", temp.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("tick_interval_ms = 50"));
}

#[test]
fn environment_overrides_files() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("kiln.toml"), "[server]\nport = 7100\n").unwrap();

    kiln()
        .env("KILN_SERVER__PORT", "9100")
        .args(["config", "--project", temp.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("port = 9100"));
}

#[test]
fn invalid_config_is_reported() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("kiln.toml"), "[server]\nport = 0\n").unwrap();

    kiln()
        .args(["config", "--project", temp.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("server.port must be non-zero"));
}

#[test]
fn missing_explicit_config_file_fails() {
    let temp = TempDir::new().unwrap();
    let absent = temp.path().join("absent.toml");

    kiln()
        .args([
            "config",
            "--project",
            temp.path().to_str().unwrap(),
            "--config",
            absent.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

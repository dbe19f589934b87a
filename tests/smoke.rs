//! Smoke tests -- verify the binary runs and the main commands work end to end.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn signalfuse(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("signalfuse").unwrap();
    cmd.current_dir(dir).env_remove("SIGNALFUSE_CONFIG").env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &Path, extra: &str) -> std::path::PathBuf {
    let path = dir.join("test.toml");
    let db = dir.join("smoke.db");
    std::fs::write(
        &path,
        format!("[storage]\npath = {:?}\n\n[logging]\nlevel = \"warn\"\n{}", db.to_str().unwrap(), extra),
    )
    .unwrap();
    path
}

#[test]
fn test_cli_help() {
    let dir = tempfile::tempdir().unwrap();
    signalfuse(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Incident root-cause analysis"));
}

#[test]
fn test_cli_version() {
    let dir = tempfile::tempdir().unwrap();
    signalfuse(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("signalfuse"));
}

#[test]
fn test_pattern_add_subcommand_exists() {
    let dir = tempfile::tempdir().unwrap();
    signalfuse(dir.path()).args(["pattern", "add", "--help"]).assert().success();
}

#[test]
fn test_check_config_prints_effective_values() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "\n[analysis]\nconfidence_threshold = 70\n");
    signalfuse(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("confidence_threshold = 70"))
        .stdout(predicate::str::contains("configuration OK"));
}

#[test]
fn test_config_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "\n[pipeline]\ninterval_secs = 7\n");
    signalfuse(dir.path())
        .env("SIGNALFUSE_CONFIG", &config)
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("interval_secs = 7"));
}

#[test]
fn test_invalid_config_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "\n[fusion]\ntemporal_weight = 0.0\nsemantic_weight = 0.0\ncausal_weight = 0.0\n",
    );
    signalfuse(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn test_ingest_process_and_list() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "\n[analysis]\ndeep_analysis_enabled = false\n");
    let signals = dir.path().join("signals.jsonl");
    std::fs::write(
        &signals,
        concat!(
            r#"{"kind":"log","source":"web-1","timestamp":"2024-03-04T10:00:00Z","severity":"critical","message":"upstream timeout talking to db"}"#,
            "\n",
            r#"{"kind":"log","source":"web-1","timestamp":"2024-03-04T10:03:00Z","severity":"high","message":"upstream timeout talking to db"}"#,
            "\n"
        ),
    )
    .unwrap();

    signalfuse(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["ingest", "--file"])
        .arg(&signals)
        .assert()
        .success()
        .stdout(predicate::str::contains("Ingested 2 signals."));

    signalfuse(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["process", "--stage", "enrichment"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"enriched\": 2"));

    signalfuse(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("process")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"fused\": 1"));

    signalfuse(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("incidents")
        .assert()
        .success()
        .stdout(predicate::str::contains("performance"));

    signalfuse(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"incidents\": 1"))
        .stdout(predicate::str::contains("deep_analysis"));
}

#[test]
fn test_show_unknown_incident_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "");
    signalfuse(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["show", "does-not-exist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

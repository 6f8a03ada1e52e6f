use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::Path;
use std::process::Command;

fn backoff_cmd(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("backoff").unwrap();
    cmd.env("BACKOFF_CONFIG", config)
        .env_remove("BACKOFF_MIN_DELAY")
        .env_remove("BACKOFF_MAX_DELAY")
        .env_remove("BACKOFF_FACTOR")
        .env_remove("BACKOFF_JITTER");
    cmd
}

#[test]
fn sequence_defaults_json() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = backoff_cmd(&dir.path().join("config.yaml"));
    cmd.arg("--json").arg("sequence").arg("--count").arg("7");
    let out = cmd.assert().success().get_output().stdout.clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let delays: Vec<&str> = v
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["delay"].as_str().unwrap())
        .collect();
    assert_eq!(delays, vec!["100ms", "200ms", "400ms", "800ms", "1600ms", "2s", "2s"]);
    assert_eq!(v[6]["attempts"], 5);
    assert_eq!(v[6]["saturated"], true);
}

#[test]
fn sequence_raw_with_flags() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = backoff_cmd(&dir.path().join("config.yaml"));
    cmd.args(["--raw", "--factor", "1.5", "--max-delay", "200ms", "sequence", "--count", "4"]);
    cmd.assert()
        .success()
        .stdout("100ms\n150ms\n200ms\n200ms\n");
}

#[test]
fn env_overrides_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "min_delay: 10ms\nfactor: 4.0\n").unwrap();
    let mut cmd = backoff_cmd(&path);
    cmd.env("BACKOFF_FACTOR", "3")
        .args(["--raw", "sequence", "--count", "3"]);
    cmd.assert()
        .success()
        .stdout("10ms\n30ms\n90ms\n");
}

#[test]
fn config_set_get_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfg").join("config.yaml");

    backoff_cmd(&path)
        .args(["config", "set", "max_delay", "10s"])
        .assert()
        .success()
        .stdout(predicate::str::contains("status: ok"));
    assert!(path.exists());

    backoff_cmd(&path)
        .args(["config", "get", "max_delay"])
        .assert()
        .success()
        .stdout("10s\n");

    backoff_cmd(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max_delay: 10s"))
        .stdout(predicate::str::contains("min_delay: 100ms"))
        .stdout(predicate::str::contains("path:"));

    backoff_cmd(&path)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.yaml"));
}

#[test]
fn config_set_rejects_invalid_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");

    backoff_cmd(&path)
        .args(["config", "set", "min_delay", "5s"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
    assert!(!path.exists());

    backoff_cmd(&path)
        .args(["config", "set", "colour", "red"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown config key"));
}

#[test]
fn sleep_reports_completed_steps() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = backoff_cmd(&dir.path().join("config.yaml"));
    cmd.args(["--json", "--min-delay", "5ms", "sleep", "--count", "2"]);
    let out = cmd.assert().success().get_output().stdout.clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["completed"], 2);
    assert_eq!(v["cancelled"], false);
    assert_eq!(v["attempts"], 2);
    assert!(v["slept_ms"].as_u64().unwrap() >= 15);
}

#[test]
fn bad_duration_flag_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    backoff_cmd(&dir.path().join("config.yaml"))
        .args(["--min-delay", "soon", "sequence"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid duration"));
}

#[test]
fn config_path_ignores_broken_file_and_env() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "min_delay: soon\n").unwrap();
    backoff_cmd(&path)
        .env("BACKOFF_FACTOR", "fast")
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.yaml"));
}

#[test]
fn config_set_ignores_malformed_env() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    backoff_cmd(&path)
        .env("BACKOFF_FACTOR", "fast")
        .args(["config", "set", "factor", "3"])
        .assert()
        .success();
    let saved = std::fs::read_to_string(&path).unwrap();
    assert!(saved.contains("factor: 3"), "{}", saved);
}

#[test]
fn config_set_repairs_broken_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "min_delay: soon\n").unwrap();
    backoff_cmd(&path)
        .args(["config", "set", "min_delay", "50ms"])
        .assert()
        .success();

    backoff_cmd(&path)
        .args(["--raw", "sequence", "--count", "2"])
        .assert()
        .success()
        .stdout("50ms\n100ms\n");
}

#[test]
fn broken_file_still_fails_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "min_delay: soon\n").unwrap();
    backoff_cmd(&path)
        .args(["sequence"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("load config"));
}

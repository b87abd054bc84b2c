use assert_cmd::Command;
use predicates::prelude::*;

fn tidepool() -> Command {
    let mut cmd = Command::cargo_bin("tidepool").expect("binary is built");
    cmd.env("TIDEPOOL_LOG", "warn")
        .env("TIDEPOOL_PROPAGATION_GRACE", "10ms")
        .env("TIDEPOOL_EVICTION_GRACE", "10ms");
    cmd
}

#[test]
fn config_prints_resolved_values() {
    tidepool()
        .args(["config", "--lease-path", "database/creds/orders"])
        .env("TIDEPOOL_MAX_ROTATION_ATTEMPTS", "7")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""path": "database/creds/orders""#))
        .stdout(predicate::str::contains(r#""max_rotation_attempts": 7"#))
        .stdout(predicate::str::contains(r#""propagation_grace": "10ms""#));
}

#[test]
fn config_file_is_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("tidepool.toml");
    std::fs::write(&file, "failure_threshold = 4\n[pool]\nmax_size = 25\n").expect("write config");

    tidepool()
        .arg("--config")
        .arg(&file)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""failure_threshold": 4"#))
        .stdout(predicate::str::contains(r#""max_size": 25"#));
}

#[test]
fn invalid_config_fails() {
    tidepool()
        .args(["config", "--max-attempts", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_rotation_attempts"));
}

#[cfg(feature = "simulate")]
#[test]
fn manual_simulation_rotates_once() {
    tidepool()
        .args(["simulate", "--scenario", "manual"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""result": "completed""#))
        .stdout(predicate::str::contains(r#""pool_builds": 2"#))
        .stdout(predicate::str::contains(r#""state": "idle""#));
}

#[cfg(feature = "simulate")]
#[test]
fn auth_failure_rotates_immediately() {
    tidepool()
        .args(["simulate", "--scenario", "auth-failure"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""probe_healthy": false"#))
        .stdout(predicate::str::contains(r#""secret_requests": 1"#))
        .stdout(predicate::str::contains(r#""identity": "v-token-2""#));
}

#[cfg(feature = "simulate")]
#[test]
fn lease_created_rebuilds_pool() {
    tidepool()
        .args(["simulate", "--scenario", "lease-created"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""pool_rebuilt": true"#))
        .stdout(predicate::str::contains(r#""secret_requests": 0"#));
}

#[cfg(feature = "simulate")]
#[test]
fn failing_rebuilds_exhaust_the_budget() {
    tidepool()
        .args(["simulate", "--scenario", "exhaust", "--max-attempts", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""reason": "exhausted""#))
        .stdout(predicate::str::contains(r#""state": "exhausted""#))
        .stdout(predicate::str::contains(r#""attempt_count": 3"#));
}

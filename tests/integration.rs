//! Integration tests for the quadpool CLI.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

/// Get a command for the quadpool binary.
fn quadpool() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("quadpool").unwrap();
    // Keep the caller's environment from changing defaults.
    for var in [
        "QUADPOOL_WORKERS",
        "QUADPOOL_MAX_DEVIATION",
        "QUADPOOL_FUNCTION",
        "QUADPOOL_TRANSPORT",
        "QUADPOOL_LOG",
        "QUADPOOL_LOG_FILE",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

/// Run quadpool with `args` and parse the printed value.
fn value_of(args: &[&str]) -> f64 {
    let output = quadpool().args(args).assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    stdout
        .trim()
        .parse()
        .unwrap_or_else(|_| panic!("not a number: {stdout:?}"))
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_displays() {
    quadpool()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Adaptive parallel numerical integration"))
        .stdout(predicate::str::contains("--function"))
        .stdout(predicate::str::contains("--transport"))
        .stdout(predicate::str::contains("internal-worker").not());
}

#[test]
fn test_version_displays() {
    quadpool()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("quadpool"))
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

// ============================================================================
// Results
// ============================================================================

#[test]
fn test_cubic_unit_interval() {
    quadpool()
        .args(["0", "1"])
        .assert()
        .success()
        .stdout("1.000000\n");
}

#[test]
fn test_cubic_four_workers() {
    quadpool()
        .args(["0", "1", "4", "1e-9"])
        .assert()
        .success()
        .stdout("1.000000\n");
}

#[test]
fn test_constant_function() {
    quadpool()
        .args(["-1", "2", "3", "--function", "const=3"])
        .assert()
        .success()
        .stdout("9.000000\n");
}

#[test]
fn test_reversed_and_equal_bounds() {
    quadpool()
        .args(["1", "0"])
        .assert()
        .success()
        .stdout("-1.000000\n");
    quadpool()
        .args(["2", "2"])
        .assert()
        .success()
        .stdout("0.000000\n");
}

#[test]
fn test_sine_half_period() {
    let value = value_of(&["0", "3.141592653589793", "2", "--function", "sin"]);
    assert!((value - 2.0).abs() < 1e-6);
}

#[test]
fn test_bracket_rule() {
    let value = value_of(&["0", "1", "2", "1e-4", "--function", "exp", "--rule", "bracket"]);
    assert!((value - (std::f64::consts::E - 1.0)).abs() < 1e-3);
}

#[test]
fn test_step_function_terminates() {
    let value = value_of(&["-1", "2", "2", "1e-3", "--function", "step", "-q"]);
    assert!((value - 2.0).abs() < 1e-3);
}

#[test]
fn test_env_defaults() {
    quadpool()
        .args(["0", "2"])
        .env("QUADPOOL_FUNCTION", "const=1.5")
        .env("QUADPOOL_WORKERS", "3")
        .assert()
        .success()
        .stdout("3.000000\n");
}

#[test]
fn test_process_transport() {
    quadpool()
        .args(["0", "1", "2", "--transport", "process", "--no-affinity"])
        .assert()
        .success()
        .stdout("1.000000\n");
}

#[test]
fn test_json_output() {
    let output = quadpool()
        .args(["0", "1", "2", "--json", "--function", "gauss"])
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("Output should be valid JSON");
    assert_eq!(parsed["function"], "gauss");
    assert_eq!(parsed["degraded"], false);
    assert!((parsed["value"].as_f64().unwrap() - 0.746824132812427).abs() < 1e-6);
    assert_eq!(parsed["stats"]["workers"], 2);
    assert!(parsed["stats"]["evaluations"].as_u64().unwrap() >= 2);
    let jobs = parsed["stats"]["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    let total: u64 = jobs.iter().map(|j| j.as_u64().unwrap()).sum();
    assert_eq!(Some(total), parsed["stats"]["evaluations"].as_u64());
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_missing_bounds() {
    quadpool().assert().failure().code(2);
    quadpool().arg("0").assert().failure().code(2);
}

#[test]
fn test_malformed_number() {
    quadpool()
        .args(["zero", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_unknown_function() {
    quadpool()
        .args(["0", "1", "--function", "tan"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown function"));
}

#[test]
fn test_zero_workers_fails() {
    quadpool()
        .args(["0", "1", "0"])
        .assert()
        .failure()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains("could not complete"));
}

#[test]
fn test_infinite_bound_fails() {
    quadpool()
        .args(["0", "inf"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("finite"));
}

#[test]
fn test_overflowing_domain_fails() {
    quadpool()
        .args(["-1e308", "1e308", "2", "--function", "const=1"])
        .assert()
        .failure()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains("finite"));
}

#[test]
fn test_non_positive_tolerance_fails() {
    quadpool()
        .args(["0", "1", "1", "0"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("greater than zero"));
}

// ============================================================================
// Logging
// ============================================================================

#[test]
fn test_log_file() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("quadpool.log");

    quadpool()
        .args(["0", "1", "-v", "--log-file", log_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout("1.000000\n");

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("Starting integration"));
}

#[test]
fn test_json_logs_go_to_stderr() {
    quadpool()
        .args(["0", "1", "-v", "--log-format", "json"])
        .assert()
        .success()
        .stdout("1.000000\n")
        .stderr(predicate::str::contains("\"level\":\"INFO\""));
}

//! CLI tests for the `rig` binary

use assert_cmd::Command;
use predicates::prelude::*;

fn rig() -> Command {
    Command::cargo_bin("rig").expect("rig binary should build")
}

#[test]
fn test_help_lists_scenarios() {
    rig()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sleep"))
        .stdout(predicate::str::contains("storm"));
}

#[test]
fn test_sleep_scenario_passes() {
    rig()
        .args(["sleep", "--workers", "3", "--step-ms", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sleep"));
}

#[test]
fn test_fault_scenario_reports_origin() {
    rig()
        .args(["fault", "--delay-ms", "20"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Exception message"))
        .stdout(predicate::str::contains("Faulted thread"));
}

#[test]
fn test_storm_scenario_passes() {
    rig()
        .args(["storm", "--workers", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4 discarded"));
}

#[test]
fn test_missing_config_file_fails() {
    let temp = tempfile::TempDir::new().unwrap();
    rig()
        .arg("--config")
        .arg(temp.path().join("absent.yml"))
        .arg("contract")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

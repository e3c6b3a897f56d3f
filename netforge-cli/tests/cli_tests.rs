//! CLI integration tests

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

/// Build command for the netforge-cli binary.
fn netforge_cli() -> Command {
    cargo_bin_cmd!("netforge-cli")
}

/// Path to netforge library test fixtures (relative to workspace).
fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("netforge")
        .join("tests")
        .join("fixtures")
}

#[test]
fn test_cli_help() {
    let mut cmd = netforge_cli();

    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("KiCad"));
}

#[test]
fn test_cli_version() {
    let mut cmd = netforge_cli();

    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_index_writes_snapshot() {
    let temp = tempfile::tempdir().unwrap();
    let snapshot = temp.path().join("catalog.json");

    netforge_cli()
        .arg("index")
        .arg(fixtures_dir().join("libs"))
        .arg("--snapshot")
        .arg(&snapshot)
        .assert()
        .success()
        .stdout(predicate::str::contains("Indexed 3 symbols"))
        .stdout(predicate::str::contains("2 footprints"));
    assert!(snapshot.exists());

    netforge_cli()
        .arg("search")
        .arg("led")
        .arg("--snapshot")
        .arg(&snapshot)
        .assert()
        .success()
        .stdout(predicate::str::contains("Device:LED  (LED_SMD:LED_0805_2012Metric)"));
}

#[test]
fn test_cli_search_no_match() {
    netforge_cli()
        .arg("search")
        .arg("opamp")
        .arg("--libs")
        .arg(fixtures_dir().join("libs"))
        .assert()
        .failure()
        .stdout(predicate::str::contains("No symbols match"));
}

#[test]
fn test_cli_check_valid_circuit() {
    netforge_cli()
        .arg("check")
        .arg(fixtures_dir().join("led_blink.json"))
        .arg("--libs")
        .arg(fixtures_dir().join("libs"))
        .arg("--seed")
        .arg("4")
        .assert()
        .success()
        .stdout(predicate::str::contains("WARNINGS:"))
        .stdout(predicate::str::contains("floating net"));
}

#[test]
fn test_cli_check_reports_errors() {
    netforge_cli()
        .arg("check")
        .arg(fixtures_dir().join("unconnected.json"))
        .arg("--seed")
        .arg("4")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Component 'C1' has no defined connections"));
}

#[test]
fn test_cli_check_json_format() {
    let output = netforge_cli()
        .arg("check")
        .arg(fixtures_dir().join("unconnected.json"))
        .arg("--format")
        .arg("json")
        .output()
        .unwrap();

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["project_name"], "Loose Parts");
    assert_eq!(json["report"]["is_valid"], false);
}

#[test]
fn test_cli_check_missing_file() {
    netforge_cli()
        .arg("check")
        .arg("nonexistent.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn test_cli_generate_from_ir() {
    let temp = tempfile::tempdir().unwrap();

    netforge_cli()
        .arg("generate")
        .arg("LED with a series resistor")
        .arg("--ir")
        .arg(fixtures_dir().join("led_blink.json"))
        .arg("--libs")
        .arg(fixtures_dir().join("libs"))
        .arg("--out-dir")
        .arg(temp.path())
        .arg("--seed")
        .arg("7")
        .assert()
        .success()
        .stdout(predicate::str::contains("Requesting circuit from scripted"))
        .stdout(predicate::str::contains("led_blink.kicad_pcb"));

    for name in ["led_blink.kicad_sch", "led_blink.kicad_pcb", "led_blink.dsn"] {
        assert!(temp.path().join(name).exists(), "{} missing", name);
    }
}

#[test]
fn test_cli_generate_budget_exhausted() {
    let temp = tempfile::tempdir().unwrap();

    netforge_cli()
        .arg("generate")
        .arg("loose parts")
        .arg("--ir")
        .arg(fixtures_dir().join("unconnected.json"))
        .arg("--retries")
        .arg("1")
        .arg("--out-dir")
        .arg(temp.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("after 2 round(s)"));

    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

// Tests that drive the keg binary and check its exit codes
// Artifacts are served through file:// URLs inside a temporary prefix


use keg::verify::sha256_hex;
use serde_json::json;
use std::process::{Command, Output};
use test_helpers::TestEnvironment;

const PAYLOAD: &[u8] = b"#!/bin/sh\necho hello from tool\n";

fn keg(env: &TestEnvironment, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_keg"))
        .args(args)
        .arg("--prefix")
        .arg(&env.prefix)
        .arg("--formula-dir")
        .arg(&env.formula_dir)
        .env("KEG_CACHE", env.prefix.join("cache"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run keg")
}

fn tool_formula(env: &TestEnvironment, served: &[u8]) {
    let url = env.artifact("tool", served);
    env.write_formula(&json!({
        "name": "tool",
        "version": "1.2.3",
        "source_url": url,
        "checksum": sha256_hex(PAYLOAD),
        "test_command": "tool | grep -q hello",
    }));
}

#[test]
fn test_install_success_exits_zero() {
    let env = TestEnvironment::new();
    tool_formula(&env, PAYLOAD);

    let output = keg(&env, &["install", "tool"]);

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    assert!(env.keg("tool", "1.2.3").join("bin/tool").exists());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Test passed"));

    let list = keg(&env, &["list"]);
    assert!(String::from_utf8_lossy(&list.stdout).contains("tool 1.2.3"));
}

#[test]
fn test_checksum_mismatch_exits_30() {
    let env = TestEnvironment::new();
    tool_formula(&env, b"something else entirely");

    let output = keg(&env, &["install", "tool"]);

    assert_eq!(output.status.code(), Some(30), "{output:?}");
    assert!(String::from_utf8_lossy(&output.stderr).contains("Checksum mismatch"));
    assert!(!env.prefix.join("Cellar").exists());
}

#[test]
fn test_missing_dependency_exits_40() {
    let env = TestEnvironment::new();
    let url = env.artifact("rs-git-fsmonitor", PAYLOAD);
    env.write_formula(&json!({
        "name": "rs-git-fsmonitor",
        "source_url": url,
        "version": "0.1.1",
        "checksum": sha256_hex(PAYLOAD),
        "dependencies": ["watchman"],
    }));

    let output = keg(&env, &["install", "rs-git-fsmonitor"]);

    assert_eq!(output.status.code(), Some(40), "{output:?}");
    assert!(String::from_utf8_lossy(&output.stderr).contains("watchman"));
}

#[test]
fn test_unknown_formula_exits_42() {
    let env = TestEnvironment::new();
    tool_formula(&env, PAYLOAD);

    let output = keg(&env, &["install", "tol"]);

    assert_eq!(output.status.code(), Some(42), "{output:?}");
}

#[test]
fn test_failing_test_exits_70_but_stays_installed() {
    let env = TestEnvironment::new();
    let url = env.artifact("tool", PAYLOAD);
    env.write_formula(&json!({
        "name": "tool",
        "version": "1.2.3",
        "source_url": url,
        "checksum": sha256_hex(PAYLOAD),
        "test_command": "exit 4",
    }));

    let output = keg(&env, &["install", "tool"]);

    assert_eq!(output.status.code(), Some(70), "{output:?}");
    assert!(env.bin("tool").exists());
}

#[test]
fn test_dry_run_prints_plan_without_installing() {
    let env = TestEnvironment::new();
    tool_formula(&env, PAYLOAD);

    let output = keg(&env, &["install", "tool", "--dry-run"]);

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Install plan for tool"));
    assert!(stdout.contains("tool 1.2.3"));
    assert!(!env.prefix.join("Cellar").exists());
    assert!(!env.registry().exists());
}

//! CLI integration tests

use std::process::{Command, Output};

fn coa(args: &[&str]) -> Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "coa-cli", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = coa(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("Cluster Cost Optimizer"),
        "Should show app name"
    );
    assert!(stdout.contains("decisions"), "Should show decisions command");
    assert!(stdout.contains("approve"), "Should show approve command");
    assert!(stdout.contains("reject"), "Should show reject command");
    assert!(stdout.contains("actions"), "Should show actions command");
    assert!(stdout.contains("policy"), "Should show policy command");
    assert!(stdout.contains("runs"), "Should show runs command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = coa(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("coa"), "Should show binary name");
}

#[test]
fn test_decisions_list_help() {
    let output = coa(&["decisions", "list", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Decisions list help should succeed");
    assert!(stdout.contains("--limit"), "Should show limit option");
}

#[test]
fn test_approve_help() {
    let output = coa(&["approve", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Approve help should succeed");
    assert!(stdout.contains("--reviewer"), "Should show reviewer option");
    assert!(stdout.contains("--reason"), "Should show reason option");
}

#[test]
fn test_actions_list_help() {
    let output = coa(&["actions", "list", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Actions list help should succeed");
    assert!(stdout.contains("--state"), "Should show state option");
}

#[test]
fn test_policy_set_help() {
    let output = coa(&["policy", "set", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Policy set help should succeed");
    assert!(stdout.contains("--confidence-floor"));
    assert!(stdout.contains("--reject-floor"));
    assert!(stdout.contains("--auto-apply-medium"));
    assert!(stdout.contains("--interval"));
}

#[test]
fn test_runs_help() {
    let output = coa(&["runs", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Runs help should succeed");
    assert!(stdout.contains("last"), "Should show last subcommand");
    assert!(stdout.contains("trigger"), "Should show trigger subcommand");
}

/// Test format and api-url options
#[test]
fn test_global_options() {
    let output = coa(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--format"), "Should show format option");
    assert!(stdout.contains("table"), "Should show table format");
    assert!(stdout.contains("json"), "Should show json format");
    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("COA_API_URL"), "Should show env var");
}

/// Test invalid command error handling
#[test]
fn test_invalid_command() {
    let output = coa(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error") || stderr.contains("invalid"),
        "Should show error message"
    );
}

/// Test missing required argument error handling
#[test]
fn test_missing_argument() {
    let output = coa(&["approve"]);

    assert!(!output.status.success(), "Missing argument should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("required") || stderr.contains("error"),
        "Should show error about missing argument"
    );
}

/// An unreachable agent is reported, not a panic
#[test]
fn test_unreachable_agent_fails_cleanly() {
    let output = coa(&["--api-url", "http://127.0.0.1:9", "runs", "last"]);

    assert!(!output.status.success(), "Unreachable agent should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to send request"));
}

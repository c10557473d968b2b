//! End-to-end tests of the `mcplex` binary

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

use common::{temp_config_file, test_server_exe};

fn single_server_config() -> (tempfile::TempDir, std::path::PathBuf) {
    let yaml = format!(
        "servers:\n  - id: test\n    command: \"{}\"\n    retry_attempts: 0\n",
        test_server_exe().display()
    );
    temp_config_file(&yaml)
}

fn mcplex() -> Command {
    let mut cmd = Command::cargo_bin("mcplex").unwrap();
    cmd.env_remove("MCPLEX_USER")
        .env_remove("MCPLEX_CONFIG")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_status_json_reports_connected_server() {
    let (_dir, config_path) = single_server_config();
    let output = mcplex()
        .arg("--config")
        .arg(&config_path)
        .args(["status", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let status: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["total_servers"], 1);
    assert_eq!(status["connected_servers"], 1);
    assert_eq!(status["servers"][0]["id"], "test");
    assert_eq!(status["servers"][0]["protocol_version"], "2025-11-25");
}

#[test]
fn test_tools_lists_every_page() {
    let (_dir, config_path) = single_server_config();
    let output = mcplex()
        .arg("--config")
        .arg(&config_path)
        .args(["tools", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let tools: Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<_> = tools
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["tool"]["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["echo", "fail", "slow", "notify"]);
}

#[test]
fn test_call_echo() {
    let (_dir, config_path) = single_server_config();
    mcplex()
        .arg("--config")
        .arg(&config_path)
        .args(["call", "echo", "--args", r#"{"message":"hi there"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("hi there"));
}

#[test]
fn test_call_failing_tool_exits_nonzero() {
    let (_dir, config_path) = single_server_config();
    mcplex()
        .arg("--config")
        .arg(&config_path)
        .args(["call", "fail"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("something went wrong"))
        .stderr(predicate::str::contains("reported an error"));
}

#[test]
fn test_read_and_prompt() {
    let (_dir, config_path) = single_server_config();
    mcplex()
        .arg("--config")
        .arg(&config_path)
        .args(["read", "test://greeting"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello from the test server"));

    mcplex()
        .arg("--config")
        .arg(&config_path)
        .args(["prompt", "greet", "--arg", "name=Ada"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello, Ada!"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_dir, config_path) =
        temp_config_file("servers:\n  - id: bad\n    command: x\n    timeout: 0\n");
    mcplex()
        .arg("--config")
        .arg(&config_path)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("timeout must be greater than 0"));
}

#[test]
fn test_unreachable_server_is_reported_not_fatal() {
    let (_dir, config_path) = temp_config_file(
        "servers:\n  - id: ghost\n    command: /nonexistent/mcp-server\n    retry_attempts: 0\n",
    );
    mcplex()
        .arg("--config")
        .arg(&config_path)
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"connected_servers\": 0"))
        .stderr(predicate::str::contains("ghost"));
}

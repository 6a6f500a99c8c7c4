//! Integration tests driving single events through the host_agent binary.

use std::fs;

use serde_json::json;

use crate::common::{Workspace, run_agent};

#[test]
fn status_without_state_prints_the_empty_state() {
    let workspace = Workspace::new();
    let output = run_agent(&workspace, &["status"]);
    assert!(output.status.success(), "status failed: {output:?}");

    let state: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("status output is not JSON");
    assert_eq!(state["flags"], json!([]));
    assert_eq!(state["status"]["kind"], "unknown");
    assert!(!workspace.state_file().exists(), "status must not create state");
}

#[test]
fn unknown_event_is_rejected() {
    let workspace = Workspace::new();
    let output = run_agent(&workspace, &["dispatch", "stop"]);
    assert!(!output.status.success(), "unknown event must fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("stop"), "error names the event:\n{stderr}");
}

#[test]
fn source_available_is_remembered() {
    let workspace = Workspace::new();
    let output = run_agent(&workspace, &["dispatch", "source-available"]);
    assert!(output.status.success(), "dispatch failed: {output:?}");

    let state = workspace.read_state();
    assert_eq!(state["flags"], json!(["source-available"]));
}

#[test]
fn config_changed_merges_environment() {
    let workspace = Workspace::new();
    fs::write(workspace.env_file(), "PATH=/usr/bin\nGREETING=hi\n").unwrap();
    workspace.write_config(
        r#"
        environment_variables = "GREETING=hello SECRET_KEY=abc=="
        "#,
    );

    let output = run_agent(&workspace, &["dispatch", "config-changed"]);
    assert!(output.status.success(), "dispatch failed: {output:?}");

    assert_eq!(
        fs::read_to_string(workspace.env_file()).unwrap(),
        "PATH=/usr/bin\nGREETING=hello\nSECRET_KEY=abc==\n"
    );
    let state = workspace.read_state();
    assert_eq!(state["flags"], json!(["configured"]));
    assert_eq!(state["status"]["kind"], "maintenance");
}

#[test]
fn invalid_config_records_an_error_status() {
    let workspace = Workspace::new();
    workspace.write_config("port = \"eighty\"");

    let output = run_agent(&workspace, &["dispatch", "config-changed"]);
    assert!(!output.status.success(), "invalid config must fail");

    let state = workspace.read_state();
    assert_eq!(state["status"]["kind"], "error");
    assert_eq!(state["flags"], json!([]));
}

#[test]
fn relation_data_is_recorded() {
    let workspace = Workspace::new();
    let output = run_agent(
        &workspace,
        &[
            "dispatch",
            "postgres-relation-joined",
            "--relation-id",
            "postgres:2",
            "--set",
            "host=db1",
            "--set",
            "port=5432",
        ],
    );
    assert!(output.status.success(), "dispatch failed: {output:?}");

    let state = workspace.read_state();
    assert_eq!(
        state["relations"]["postgres"]["postgres:2"],
        json!({"host": "db1", "port": "5432"})
    );

    let output = run_agent(
        &workspace,
        &["dispatch", "postgres-relation-broken", "--relation-id", "postgres:2"],
    );
    assert!(output.status.success(), "dispatch failed: {output:?}");
    assert_eq!(workspace.read_state()["relations"], json!({}));
}

#[test]
fn status_masks_relation_passwords() {
    let workspace = Workspace::new();
    let output = run_agent(
        &workspace,
        &[
            "dispatch",
            "postgres-relation-joined",
            "--relation-id",
            "postgres:0",
            "--set",
            "host=db1",
            "--set",
            "password=hunter2",
        ],
    );
    assert!(output.status.success(), "dispatch failed: {output:?}");

    let output = run_agent(&workspace, &["status"]);
    assert!(output.status.success(), "status failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("hunter2"), "password leaked into status:\n{stdout}");

    let state: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("status output is not JSON");
    assert_eq!(state["relations"]["postgres"]["postgres:0"]["host"], "db1");
}

#[test]
fn available_service_announces_port_to_new_consumer() {
    let workspace = Workspace::new();
    workspace.write_config("port = 9000");
    workspace.write_state(&json!({ "flags": ["system-ready", "configured", "ready", "available"] }));

    let output = run_agent(
        &workspace,
        &["dispatch", "consumer-relation-joined", "--relation-id", "consumer:5"],
    );
    assert!(output.status.success(), "dispatch failed: {output:?}");

    let state = workspace.read_state();
    assert_eq!(state["consumers"], json!({ "consumer:5": 9000 }));
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration files as they appear on disk.

use std::fs;
use std::time::Duration;

use tempfile::TempDir;

use toolbridge::config::{find_workspace_root, load_config, CliOptions};
use toolbridge::mcp::{McpConfig, TransportType};

#[test]
fn yaml_workspace_config_with_servers() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("toolbridge.yaml"),
        r#"
model: gemini-2.5-flash
enableTools: true
supervisor:
  retries: 0
  retryDelayMs: 250
servers:
  - id: time
    name: Time
    command: uvx
    args: [mcp-server-time]
  - id: remote
    name: Remote
    transport: sse
    url: https://tools.example.com/
    token: ${TOOLBRIDGE_TEST_TOKEN}
"#,
    )
    .unwrap();

    let config = load_config(temp.path(), CliOptions::default()).unwrap();
    assert_eq!(config.model, "gemini-2.5-flash");
    assert!(config.enable_tools);

    let options = config.supervisor.options();
    assert_eq!(options.retries, 0);
    assert_eq!(options.retry_delay, Duration::from_millis(250));

    let time = config.servers.iter().find(|s| s.id == "time").unwrap();
    assert_eq!(time.transport_type(), TransportType::Stdio);
    let remote = config.servers.iter().find(|s| s.id == "remote").unwrap();
    assert_eq!(remote.transport_type(), TransportType::Sse);
    assert_eq!(remote.url(), Some("https://tools.example.com/"));
}

#[test]
fn cli_overrides_workspace() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join(".toolbridge.json"),
        r#"{"model": "gemini-2.0-flash-001", "supervisor": {"retries": 5, "preflight": true}}"#,
    )
    .unwrap();

    let cli = CliOptions {
        model: Some("gemini-2.5-pro".to_string()),
        retries: Some(1),
        preflight: Some(false),
        ..CliOptions::default()
    };
    let config = load_config(temp.path(), cli).unwrap();
    assert_eq!(config.model, "gemini-2.5-pro");
    assert_eq!(config.supervisor.retries, 1);
    assert!(!config.supervisor.preflight);
}

#[test]
fn invalid_server_record_rejects_file() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join(".toolbridge.json"),
        r#"{"servers": [{"id": "x", "name": "X", "command": "uvx", "args": "--flag"}]}"#,
    )
    .unwrap();

    assert!(load_config(temp.path(), CliOptions::default()).is_err());
}

#[test]
fn workspace_root_found_from_subdirectory() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join(".toolbridge")).unwrap();
    fs::write(temp.path().join(".toolbridge/config.json"), "{}").unwrap();
    let nested = temp.path().join("a/b");
    fs::create_dir_all(&nested).unwrap();

    assert_eq!(find_workspace_root(&nested), Some(temp.path().to_path_buf()));
}

#[test]
fn servers_file_accepts_both_layouts() {
    let temp = TempDir::new().unwrap();
    let wrapped = temp.path().join("wrapped.json");
    let bare = temp.path().join("bare.json");
    fs::write(
        &wrapped,
        r#"{"mcpServers": [{"id": "a", "name": "A", "command": "npx", "enabled": false}]}"#,
    )
    .unwrap();
    fs::write(&bare, r#"[{"id": "b", "name": "B", "transport": "sse", "url": "http://localhost:8080"}]"#)
        .unwrap();

    let wrapped = McpConfig::load_from_file(&wrapped).unwrap();
    assert_eq!(wrapped.servers.len(), 1);
    assert_eq!(wrapped.enabled_servers().count(), 0);

    let bare = McpConfig::load_from_file(&bare).unwrap();
    assert_eq!(bare.servers[0].url(), Some("http://localhost:8080"));
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! A [`WorkspaceConfig`] is one partial config file (JSON or YAML); the
//! merger folds several of them into a [`ResolvedConfig`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::mcp::handshake::HandshakeTimeouts;
use crate::mcp::supervisor::SupervisorOptions;
use crate::mcp::ServerConfig;
use crate::providers::gemini::{API_KEY_ENV, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use crate::types::ProviderConfig;

/// Partial configuration as found in one file.
/// Lives in `.toolbridge.json`, `.toolbridge/config.json` or `toolbridge.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Model name to use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Environment variable holding the provider API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Custom base URL for the provider API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum output tokens per response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// System prompt sent with every chat request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Attach tool server tools to chat requests by default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_tools: Option<bool>,

    /// Connection supervisor tuning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supervisor: Option<SupervisorConfig>,

    /// Tool server records
    #[serde(skip_serializing_if = "Option::is_none", alias = "mcpServers")]
    pub servers: Option<Vec<ServerConfig>>,
}

/// Partial supervisor settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorConfig {
    /// Extra attempts after the first failed connect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_timeout_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_timeout_ms: Option<u64>,

    /// Probe candidate URLs before opening an SSE connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preflight: Option<bool>,
}

/// Fully resolved supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSupervisorConfig {
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub handshake_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub preflight: bool,
}

impl Default for ResolvedSupervisorConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_delay_ms: 1000,
            handshake_timeout_ms: 30_000,
            probe_timeout_ms: 5_000,
            preflight: true,
        }
    }
}

impl ResolvedSupervisorConfig {
    pub fn options(&self) -> SupervisorOptions {
        SupervisorOptions {
            retries: self.retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            timeouts: HandshakeTimeouts {
                handshake: Duration::from_millis(self.handshake_timeout_ms),
                probe: Duration::from_millis(self.probe_timeout_ms),
            },
            preflight: self.preflight,
        }
    }
}

/// Configuration after merging every source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub model: String,
    pub api_key_env: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub enable_tools: bool,
    pub supervisor: ResolvedSupervisorConfig,
    pub servers: Vec<ServerConfig>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key_env: API_KEY_ENV.to_string(),
            base_url: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: None,
            enable_tools: false,
            supervisor: ResolvedSupervisorConfig::default(),
            servers: Vec::new(),
        }
    }
}

impl ResolvedConfig {
    /// Provider settings; the API key is read from `api_key_env`.
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            api_key: std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty()),
            base_url: self.base_url.clone(),
            model: Some(self.model.clone()),
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            timeout_ms: None,
        }
    }

    /// Server records with `enabled` set.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResolvedConfig::default();
        assert_eq!(config.model, "gemini-2.0-flash-001");
        assert_eq!(config.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.max_tokens, 2048);
        assert!(!config.enable_tools);
    }

    #[test]
    fn test_supervisor_options() {
        let options = ResolvedSupervisorConfig::default().options();
        assert_eq!(options.retries, 2);
        assert_eq!(options.retry_delay, Duration::from_secs(1));
        assert_eq!(options.timeouts, HandshakeTimeouts::default());
        assert!(options.preflight);
    }

    #[test]
    fn test_workspace_config_parses_servers() {
        let config: WorkspaceConfig = serde_json::from_str(
            r#"{
                "model": "gemini-2.5-pro",
                "supervisor": {"retries": 0},
                "mcpServers": [
                    {"id": "time", "name": "Time", "command": "uvx", "args": ["mcp-server-time"]}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.model.as_deref(), Some("gemini-2.5-pro"));
        assert_eq!(config.supervisor.unwrap().retries, Some(0));
        let servers = config.servers.unwrap();
        assert_eq!(servers.len(), 1);
        assert!(servers[0].is_stdio());
    }

    #[test]
    fn test_workspace_config_yaml() {
        let config: WorkspaceConfig = serde_yaml::from_str(
            "model: gemini-2.0-flash-001\nenableTools: true\nservers:\n  - id: remote\n    name: Remote\n    transport: sse\n    url: https://host/\n",
        )
        .unwrap();
        assert_eq!(config.enable_tools, Some(true));
        assert_eq!(config.servers.unwrap()[0].url(), Some("https://host/"));
    }
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use super::types::{ResolvedConfig, SupervisorConfig, WorkspaceConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub enable_tools: Option<bool>,
    pub retries: Option<u32>,
    pub preflight: Option<bool>,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Workspace config
/// 3. Global config (~/.toolbridge/config.json)
/// 4. Default values
///
/// Server records are merged by id: a workspace record replaces a global
/// one with the same id, new ids are appended.
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    if let Some(config) = global {
        apply_workspace_config(&mut result, config);
    }

    if let Some(config) = workspace {
        apply_workspace_config(&mut result, config);
    }

    apply_cli_options(&mut result, &cli);

    result
}

fn apply_workspace_config(result: &mut ResolvedConfig, config: WorkspaceConfig) {
    if let Some(model) = config.model {
        result.model = model;
    }

    if let Some(env) = config.api_key_env {
        result.api_key_env = env;
    }

    if config.base_url.is_some() {
        result.base_url = config.base_url;
    }

    if let Some(temperature) = config.temperature {
        result.temperature = temperature;
    }

    if let Some(max_tokens) = config.max_tokens {
        result.max_tokens = max_tokens;
    }

    if config.system_prompt.is_some() {
        result.system_prompt = config.system_prompt;
    }

    if let Some(enable_tools) = config.enable_tools {
        result.enable_tools = enable_tools;
    }

    if let Some(supervisor) = config.supervisor {
        apply_supervisor_config(result, &supervisor);
    }

    for server in config.servers.unwrap_or_default() {
        match result.servers.iter_mut().find(|s| s.id == server.id) {
            Some(existing) => *existing = server,
            None => result.servers.push(server),
        }
    }
}

fn apply_supervisor_config(result: &mut ResolvedConfig, config: &SupervisorConfig) {
    let target = &mut result.supervisor;
    if let Some(retries) = config.retries {
        target.retries = retries;
    }
    if let Some(delay) = config.retry_delay_ms {
        target.retry_delay_ms = delay;
    }
    if let Some(timeout) = config.handshake_timeout_ms {
        target.handshake_timeout_ms = timeout;
    }
    if let Some(timeout) = config.probe_timeout_ms {
        target.probe_timeout_ms = timeout;
    }
    if let Some(preflight) = config.preflight {
        target.preflight = preflight;
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: &CliOptions) {
    if let Some(ref model) = cli.model {
        result.model = model.clone();
    }

    if cli.base_url.is_some() {
        result.base_url = cli.base_url.clone();
    }

    if let Some(enable_tools) = cli.enable_tools {
        result.enable_tools = enable_tools;
    }

    if let Some(retries) = cli.retries {
        result.supervisor.retries = retries;
    }

    if let Some(preflight) = cli.preflight {
        result.supervisor.preflight = preflight;
    }
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Live sessions and their read-only projection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

#[cfg(feature = "telemetry")]
use std::time::Instant;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::config::{ServerConfig, TransportConfig};
use super::error::McpError;
use super::handshake::HandshakeOutcome;
use super::types::{McpToolInfo, McpToolResult, ServerInfo};

/// Negotiated client side of a session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClientHandle: Send + Sync {
    /// Invoke `tools/call` with a hard deadline.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<McpToolResult, McpError>;

    /// Tear down the protocol session and its transport.
    async fn close(&self) -> Result<(), McpError>;
}

/// A registered, connected tool server.
pub struct Session {
    config: ServerConfig,
    client: Arc<dyn ClientHandle>,
    server_info: ServerInfo,
    tools: Vec<McpToolInfo>,
    connected: AtomicBool,
    probe_warning: Option<String>,
    last_error: Option<String>,
    connected_at: DateTime<Utc>,
}

/// What the UI sees of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub name: String,
    pub connected: bool,
    pub config: ServerConfig,
}

impl Session {
    /// Build a session from a successful handshake. `config` is copied; the
    /// network URL is replaced by the one the handshake actually used.
    pub fn new(config: &ServerConfig, outcome: HandshakeOutcome, last_error: Option<String>) -> Self {
        let mut config = config.clone();
        if let Some(effective) = outcome.effective_url {
            match &mut config.transport {
                TransportConfig::Sse { url, .. } | TransportConfig::Http { url, .. } => {
                    *url = effective;
                }
                TransportConfig::Stdio { .. } => {}
            }
        }

        Self {
            config,
            client: outcome.client,
            server_info: outcome.server_info,
            tools: outcome.tools,
            connected: AtomicBool::new(true),
            probe_warning: outcome.probe_warning,
            last_error,
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Config snapshot taken at connect time.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Tools from the post-handshake probe; empty when the probe failed.
    pub fn tools(&self) -> &[McpToolInfo] {
        &self.tools
    }

    /// Why the tool probe failed, if it did.
    pub fn probe_warning(&self) -> Option<&str> {
        self.probe_warning.as_deref()
    }

    /// Failure of the previous attempt when a retry succeeded.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            connected: self.is_connected(),
            config: self.config.clone(),
        }
    }

    /// Call a tool on this server. A transport failure marks the session
    /// disconnected.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<McpToolResult, McpError> {
        if !self.is_connected() {
            return Err(McpError::transport(format!(
                "MCP server '{}' is not connected",
                self.id()
            )));
        }

        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let timeout = Duration::from_secs(self.config.tool_timeout_sec);
        let result = self.client.call_tool(tool, arguments, timeout).await;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_tool(
            &format!("mcp.{}.{}", self.id(), tool),
            start.elapsed(),
            matches!(&result, Ok(r) if !r.is_error),
        );

        if let Err(e) = &result {
            if e.is_connection_loss() {
                warn!(mcp.server = %self.id(), error = %e, "Tool call lost the connection");
                self.mark_disconnected();
            }
        }
        result
    }

    /// Close the client. Marks the session disconnected whatever the outcome.
    pub async fn close(&self) -> Result<(), McpError> {
        self.mark_disconnected();
        self.client.close().await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.config.id)
            .field("connected", &self.is_connected())
            .field("tools", &self.tools.len())
            .field("probe_warning", &self.probe_warning)
            .finish()
    }
}

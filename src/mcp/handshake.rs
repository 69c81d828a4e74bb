// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Protocol negotiation over a built transport.
//!
//! The handshake runs under a hard deadline. Once it succeeds, a shorter
//! deadline bounds the tool listing probe; a failed or slow probe yields a
//! warning on the outcome and never fails the handshake.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rmcp::service::{Peer, RunningService, ServiceError};
use rmcp::{RoleClient, ServiceExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tracing::{debug, info, warn};

#[cfg(feature = "telemetry")]
use std::time::Instant;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::config::ServerConfig;
use super::error::McpError;
use super::session::ClientHandle;
use super::sse_client;
use super::transport::Transport;
use super::types::{parse_tools, McpToolInfo, McpToolResult, ServerInfo};

/// Deadlines for one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeTimeouts {
    pub handshake: Duration,
    pub probe: Duration,
}

impl Default for HandshakeTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_millis(30_000),
            probe: Duration::from_millis(5_000),
        }
    }
}

/// In-memory capture of diagnostic output for one connection attempt.
///
/// Cheap to clone; every clone appends to the same buffer.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticBuffer {
    inner: Arc<Mutex<String>>,
}

impl DiagnosticBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, chunk: &str) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.push_str(chunk);
    }

    /// Captured text, or `None` when nothing was captured.
    pub fn contents(&self) -> Option<String> {
        let guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if guard.trim().is_empty() {
            None
        } else {
            Some(guard.clone())
        }
    }

    /// Drain a child's stderr into this buffer until it closes. Lines are
    /// logged at debug level, never echoed to our own stderr.
    pub fn attach_stderr(&self, stderr: ChildStderr, server: &str) {
        let buffer = self.clone();
        let server = server.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        debug!(mcp.server = %server, line = %line, "MCP server stderr");
                        buffer.append(&line);
                        buffer.append("\n");
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(mcp.server = %server, error = %e, "Stopped reading MCP server stderr");
                        break;
                    }
                }
            }
        });
    }
}

/// Result of a successful handshake.
pub struct HandshakeOutcome {
    pub client: Arc<dyn ClientHandle>,
    pub server_info: ServerInfo,
    /// Tools from the probe, already filtered by the config.
    pub tools: Vec<McpToolInfo>,
    /// Set when the probe failed or timed out.
    pub probe_warning: Option<String>,
    /// Network URL actually connected to.
    pub effective_url: Option<String>,
}

type RunningClient = RunningService<RoleClient, ()>;

/// rmcp-backed client handle.
pub struct RmcpClient {
    server: String,
    peer: Peer<RoleClient>,
    service: tokio::sync::Mutex<Option<RunningClient>>,
}

impl RmcpClient {
    fn new(server: impl Into<String>, service: RunningClient) -> Self {
        Self {
            server: server.into(),
            peer: service.peer().clone(),
            service: tokio::sync::Mutex::new(Some(service)),
        }
    }
}

#[async_trait]
impl ClientHandle for RmcpClient {
    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<McpToolResult, McpError> {
        let arguments = match arguments {
            Value::Object(map) => Value::Object(map),
            Value::Null => Value::Object(Default::default()),
            other => {
                return Err(McpError::tool_failed(
                    name,
                    format!("arguments must be an object, got {}", other),
                ))
            }
        };
        let params = serde_json::from_value(serde_json::json!({
            "name": name,
            "arguments": arguments,
        }))?;

        debug!(mcp.server = %self.server, tool = name, "Calling MCP tool");
        let result = tokio::time::timeout(timeout, self.peer.call_tool(params))
            .await
            .map_err(|_| McpError::ToolCallTimeout {
                tool: name.to_string(),
                timeout_secs: timeout.as_secs(),
            })?;

        match result {
            Ok(result) => Ok(McpToolResult::from_value(&serde_json::to_value(&result)?)),
            Err(ServiceError::McpError(e)) => Err(McpError::tool_failed(name, e.message.to_string())),
            Err(e) => Err(McpError::transport(format!("Tool call '{}' failed: {}", name, e))),
        }
    }

    async fn close(&self) -> Result<(), McpError> {
        let service = self.service.lock().await.take();
        match service {
            Some(service) => {
                let reason = service
                    .cancel()
                    .await
                    .map_err(|e| McpError::transport(format!("Failed to close session: {}", e)))?;
                debug!(mcp.server = %self.server, ?reason, "MCP session closed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Negotiate the protocol over `transport` and probe the tool list.
///
/// Stderr of a stdio server is captured into `diagnostics` for the whole
/// life of the process.
pub async fn handshake(
    transport: Transport,
    config: &ServerConfig,
    timeouts: HandshakeTimeouts,
    diagnostics: &DiagnosticBuffer,
) -> Result<HandshakeOutcome, McpError> {
    #[cfg(feature = "telemetry")]
    let start = Instant::now();

    let effective_url = transport.effective_url();
    let transport = match transport {
        Transport::Stdio {
            process,
            stderr: Some(stderr),
        } => {
            diagnostics.attach_stderr(stderr, &config.id);
            Transport::Stdio {
                process,
                stderr: None,
            }
        }
        other => other,
    };

    let negotiation = async {
        match transport {
            Transport::SpawnFailed(e) => Err(e),
            Transport::Stdio { process, .. } => ()
                .serve(process)
                .await
                .map_err(|e| McpError::transport(e.to_string())),
            Transport::Sse { client, endpoint } => {
                let channel = sse_client::connect(client, endpoint, diagnostics.clone(), &config.id).await?;
                ().serve(channel)
                    .await
                    .map_err(|e| McpError::transport(e.to_string()))
            }
            Transport::Http { transport, .. } => ()
                .serve(transport)
                .await
                .map_err(|e| McpError::transport(e.to_string())),
        }
    };

    let service = tokio::time::timeout(timeouts.handshake, negotiation)
        .await
        .map_err(|_| McpError::HandshakeTimeout {
            server: config.id.clone(),
            timeout_ms: timeouts.handshake.as_millis() as u64,
        })??;

    let server_info = serde_json::to_value(service.peer_info())
        .map(|v| ServerInfo::from_value(&v))
        .unwrap_or_default();

    #[cfg(feature = "telemetry")]
    GLOBAL_METRICS.record_operation("mcp.handshake", start.elapsed());

    let peer = service.peer().clone();
    let (tools, probe_warning) =
        match tokio::time::timeout(timeouts.probe, peer.list_all_tools()).await {
            Ok(Ok(tools)) => match serde_json::to_value(&tools) {
                Ok(value) => (parse_tools(&value, config), None),
                Err(e) => (Vec::new(), Some(format!("Tool listing unreadable: {}", e))),
            },
            Ok(Err(e)) => (Vec::new(), Some(format!("Tool listing failed: {}", e))),
            Err(_) => {
                let err = McpError::ProbeTimeout {
                    server: config.id.clone(),
                    timeout_ms: timeouts.probe.as_millis() as u64,
                };
                (Vec::new(), Some(err.to_string()))
            }
        };

    if let Some(warning) = &probe_warning {
        warn!(mcp.server = %config.id, warning = %warning, "Tool probe failed; keeping connection");
    }

    info!(
        mcp.server = %config.id,
        server.name = %server_info.name,
        server.version = %server_info.version,
        tools = tools.len(),
        "MCP handshake complete"
    );

    Ok(HandshakeOutcome {
        client: Arc::new(RmcpClient::new(config.id.clone(), service)),
        server_info,
        tools,
        probe_warning,
        effective_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport;

    #[test]
    fn test_default_timeouts() {
        let timeouts = HandshakeTimeouts::default();
        assert_eq!(timeouts.handshake, Duration::from_secs(30));
        assert_eq!(timeouts.probe, Duration::from_secs(5));
    }

    #[test]
    fn test_diagnostic_buffer_shared_between_clones() {
        let buffer = DiagnosticBuffer::new();
        assert!(buffer.contents().is_none());
        let clone = buffer.clone();
        clone.append("npm ERR! 404\n");
        buffer.append("exit 1\n");
        assert_eq!(buffer.contents().as_deref(), Some("npm ERR! 404\nexit 1\n"));
    }

    /// Shell server that answers `initialize`, then handles the rest of
    /// the session with `rest`.
    #[cfg(unix)]
    fn half_server(rest: &str) -> ServerConfig {
        let script = format!(
            r#"id_of() {{ printf '%s' "$1" | sed -n 's/.*"id":\([0-9]*\).*/\1/p'; }}
read -r line
version=$(printf '%s' "$line" | sed -n 's/.*"protocolVersion":"\([^"]*\)".*/\1/p')
printf '{{"jsonrpc":"2.0","id":%s,"result":{{"protocolVersion":"%s","capabilities":{{"tools":{{}}}},"serverInfo":{{"name":"half","version":"0.1.0"}}}}}}\n' "$(id_of "$line")" "$version"
{rest}"#
        );
        ServerConfig::stdio("half", "half", "sh").with_args(["-c".to_string(), script])
    }

    #[cfg(unix)]
    fn probe_timeouts() -> HandshakeTimeouts {
        HandshakeTimeouts {
            handshake: Duration::from_secs(10),
            probe: Duration::from_millis(300),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_tool_listing_keeps_connection() {
        let config = half_server(
            r#"while read -r line; do
  case "$line" in
    *tools/list*) printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32603,"message":"listing broke"}}\n' "$(id_of "$line")" ;;
  esac
done"#,
        );
        let transport = transport::build(&config, None, Duration::from_secs(1)).unwrap();
        let outcome = handshake(transport, &config, probe_timeouts(), &DiagnosticBuffer::new())
            .await
            .unwrap();

        assert_eq!(outcome.server_info.name, "half");
        assert!(outcome.tools.is_empty());
        let warning = outcome.probe_warning.unwrap();
        assert!(warning.contains("Tool listing failed"), "warning: {}", warning);
        outcome.client.close().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_tool_listing_keeps_connection() {
        let config = half_server("cat > /dev/null");
        let transport = transport::build(&config, None, Duration::from_secs(1)).unwrap();
        let outcome = handshake(transport, &config, probe_timeouts(), &DiagnosticBuffer::new())
            .await
            .unwrap();

        assert!(outcome.tools.is_empty());
        let warning = outcome.probe_warning.unwrap();
        assert!(warning.contains("Tool listing timeout"), "warning: {}", warning);
        outcome.client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_surfaces_during_handshake() {
        let config = ServerConfig::stdio("t1", "missing", "toolbridge-definitely-missing-bin");
        let transport = transport::build(&config, None, Duration::from_secs(1)).unwrap();
        let diagnostics = DiagnosticBuffer::new();
        let err = handshake(transport, &config, HandshakeTimeouts::default(), &diagnostics)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Transport(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_captures_stderr() {
        let config = ServerConfig::stdio("t1", "sh", "sh")
            .with_args(["-c", "echo 'npm error Invalid Version' >&2; exit 1"]);
        let transport = transport::build(&config, None, Duration::from_secs(1)).unwrap();
        let diagnostics = DiagnosticBuffer::new();
        let timeouts = HandshakeTimeouts {
            handshake: Duration::from_secs(10),
            probe: Duration::from_secs(1),
        };
        let result = handshake(transport, &config, timeouts, &diagnostics).await;
        assert!(result.is_err());

        // The stderr reader runs concurrently; give it a moment to drain.
        for _ in 0..50 {
            if diagnostics.contents().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(diagnostics
            .contents()
            .unwrap_or_default()
            .contains("Invalid Version"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_server_hits_deadline() {
        let config = ServerConfig::stdio("t1", "sleepy", "sleep").with_args(["30"]);
        let transport = transport::build(&config, None, Duration::from_secs(1)).unwrap();
        let timeouts = HandshakeTimeouts {
            handshake: Duration::from_millis(200),
            probe: Duration::from_millis(100),
        };
        let err = handshake(transport, &config, timeouts, &DiagnosticBuffer::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::HandshakeTimeout { .. }));
    }
}

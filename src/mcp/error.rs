// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP error types.
//!
//! [`McpError`] covers raw failures inside a single connection attempt or
//! tool call. [`ConnectionError`] is the terminal, classified failure the
//! supervisor hands back once its retries are spent; nothing else crosses
//! that boundary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Server configuration cannot produce a transport (missing command,
    /// unparseable URL). Never retried.
    #[error("Invalid server configuration: {0}")]
    TransportBuild(String),

    /// Protocol negotiation did not finish before the deadline.
    #[error("Connection timeout ({timeout_ms}ms) while initializing '{server}'")]
    HandshakeTimeout { server: String, timeout_ms: u64 },

    /// Tool listing after a successful handshake did not finish in time.
    #[error("Tool listing timeout ({timeout_ms}ms) for '{server}'")]
    ProbeTimeout { server: String, timeout_ms: u64 },

    /// Process exit, closed stream, HTTP non-2xx or wrong content type.
    #[error("{0}")]
    Transport(String),

    /// Server not found in the registry.
    #[error("MCP server not found: {0}")]
    ServerNotFound(String),

    /// Tool not found on server.
    #[error("Tool not found: {server}::{tool}")]
    ToolNotFound { server: String, tool: String },

    /// Tool call failed.
    #[error("Tool call '{tool}' failed: {message}")]
    ToolCallFailed { tool: String, message: String },

    /// Tool call timeout.
    #[error("Tool call '{tool}' timed out after {timeout_secs}s")]
    ToolCallTimeout { tool: String, timeout_secs: u64 },

    /// Invalid response from server.
    #[error("Invalid response from MCP server: {0}")]
    InvalidResponse(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn build(message: impl Into<String>) -> Self {
        Self::TransportBuild(message.into())
    }

    /// Create a tool call failed error.
    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolCallFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::TransportBuild(_))
    }

    /// Whether the session behind a failed tool call is gone.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_))
    }
}

/// Terminal failure of `connect`, produced by the diagnostic classifier.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct ConnectionError {
    /// Message of the last raw failure.
    pub message: String,
    /// Captured subprocess stderr or HTTP response snippet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic_text: Option<String>,
    /// Remediation hint for the operator.
    pub suggestion: String,
    pub timestamp: DateTime<Utc>,
    /// Total attempts made, including the first.
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = McpError::ServerNotFound("test_server".to_string());
        assert!(err.to_string().contains("test_server"));

        let err = McpError::HandshakeTimeout {
            server: "fs".to_string(),
            timeout_ms: 30000,
        };
        let text = err.to_string().to_lowercase();
        assert!(text.contains("timeout"));
        assert!(text.contains("fs"));

        let err = McpError::transport("Connection closed");
        assert_eq!(err.to_string(), "Connection closed");
    }

    #[test]
    fn test_retry_policy() {
        assert!(!McpError::build("missing command").is_retryable());
        assert!(McpError::transport("EOF").is_retryable());
        assert!(McpError::HandshakeTimeout {
            server: "s".to_string(),
            timeout_ms: 1
        }
        .is_retryable());
    }

    #[test]
    fn test_connection_loss() {
        assert!(McpError::transport("broken pipe").is_connection_loss());
        assert!(!McpError::tool_failed("read", "bad path").is_connection_loss());
    }

    #[test]
    fn test_connection_error_serializes_camel_case() {
        let err = ConnectionError {
            message: "spawn failed".to_string(),
            diagnostic_text: Some("stderr line".to_string()),
            suggestion: "install it".to_string(),
            timestamp: Utc::now(),
            attempts: 3,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["diagnosticText"], "stderr line");
        assert_eq!(json["attempts"], 3);
        assert_eq!(err.to_string(), "spawn failed");
    }
}

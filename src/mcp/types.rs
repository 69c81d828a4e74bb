// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP types for tool and content handling.
//!
//! rmcp model values are converted into these through `serde_json::Value`
//! so the rest of the crate never depends on SDK type names.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::ServerConfig;

/// Longest function name the model API accepts.
const MAX_FUNCTION_NAME_LEN: usize = 64;

/// Information about an MCP tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolInfo {
    /// Tool name as advertised by the server.
    pub name: String,

    pub description: Option<String>,

    /// JSON Schema for tool input.
    pub input_schema: Value,

    /// Id of the server this tool belongs to.
    pub server: String,

    /// Whether the tool only reads state.
    #[serde(default)]
    pub read_only: bool,

    /// Whether the tool is destructive.
    #[serde(default)]
    pub destructive: bool,
}

impl McpToolInfo {
    /// Name exposed to the model: `mcp__{server}_{tool}`, restricted to
    /// `[A-Za-z0-9_-]` and 64 characters.
    pub fn qualified_name(&self) -> String {
        let raw = format!("mcp__{}_{}", self.server, self.name);
        let mut name: String = raw
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        name.truncate(MAX_FUNCTION_NAME_LEN);
        name
    }
}

/// Parse a `tools/list` result (or a bare array of tools), dropping tools the
/// server config filters out.
pub fn parse_tools(result: &Value, config: &ServerConfig) -> Vec<McpToolInfo> {
    let tools = match result {
        Value::Array(items) => items.as_slice(),
        other => other
            .get("tools")
            .and_then(|t| t.as_array())
            .map(|a| a.as_slice())
            .unwrap_or(&[]),
    };

    tools
        .iter()
        .filter_map(|t| {
            let name = t.get("name")?.as_str()?.to_string();
            if !config.is_tool_enabled(&name) {
                return None;
            }
            let hint = |key: &str| {
                t.get("annotations")
                    .and_then(|a| a.get(key))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
            };

            Some(McpToolInfo {
                description: t
                    .get("description")
                    .and_then(|d| d.as_str())
                    .map(|s| s.to_string()),
                input_schema: t
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
                server: config.id.clone(),
                read_only: hint("readOnlyHint"),
                destructive: hint("destructiveHint"),
                name,
            })
        })
        .collect()
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolResult {
    pub content: Vec<McpContent>,

    #[serde(default)]
    pub is_error: bool,
}

impl McpToolResult {
    /// Create a successful text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Create an error result.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Text content joined with newlines; non-text parts are summarized.
    pub fn as_text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                McpContent::Text { text } => text.clone(),
                McpContent::Image { mime_type, .. } => format!("[image: {}]", mime_type),
                McpContent::Resource { uri, text, .. } => {
                    text.clone().unwrap_or_else(|| format!("[resource: {}]", uri))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse a `tools/call` result.
    pub fn from_value(result: &Value) -> Self {
        let is_error = result
            .get("isError")
            .and_then(|e| e.as_bool())
            .unwrap_or(false);

        let content = result
            .get("content")
            .and_then(|c| c.as_array())
            .map(|items| items.iter().filter_map(McpContent::from_value).collect())
            .unwrap_or_default();

        Self { content, is_error }
    }
}

/// Content types that can be returned by MCP tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    Text {
        text: String,
    },

    Image {
        /// Base64-encoded image data.
        data: String,
        mime_type: String,
    },

    Resource {
        uri: String,
        mime_type: Option<String>,
        text: Option<String>,
    },
}

impl McpContent {
    fn from_value(c: &Value) -> Option<Self> {
        match c.get("type")?.as_str()? {
            "text" => Some(Self::Text {
                text: c.get("text")?.as_str()?.to_string(),
            }),
            "image" => Some(Self::Image {
                data: c.get("data")?.as_str()?.to_string(),
                mime_type: c.get("mimeType")?.as_str()?.to_string(),
            }),
            "resource" => {
                let resource = c.get("resource")?;
                Some(Self::Resource {
                    uri: resource.get("uri")?.as_str()?.to_string(),
                    mime_type: resource
                        .get("mimeType")
                        .and_then(|m| m.as_str())
                        .map(|s| s.to_string()),
                    text: resource
                        .get("text")
                        .and_then(|t| t.as_str())
                        .map(|s| s.to_string()),
                })
            }
            _ => None,
        }
    }
}

/// Server identity reported during initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub protocol_version: Option<String>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            version: "0.0.0".to_string(),
            protocol_version: None,
        }
    }
}

impl ServerInfo {
    /// Parse an `initialize` result.
    pub fn from_value(result: &Value) -> Self {
        let field = |key: &str| {
            result
                .get("serverInfo")
                .and_then(|s| s.get(key))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };
        let defaults = Self::default();
        Self {
            name: field("name").unwrap_or(defaults.name),
            version: field("version").unwrap_or(defaults.version),
            protocol_version: result
                .get("protocolVersion")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        }
    }
}

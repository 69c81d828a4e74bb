// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool server configuration records.
//!
//! A [`ServerConfig`] is the persisted, operator-edited description of one
//! tool server. The transport payload is a tagged variant; stored records
//! that predate the `transport` discriminator are sniffed exactly once, while
//! deserializing, and never again.
//!
//! # Example
//!
//! ```json
//! {
//!   "servers": [
//!     {
//!       "id": "fs",
//!       "name": "Filesystem",
//!       "transport": "stdio",
//!       "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"],
//!       "enabled": true,
//!       "createdAt": 1735689600000
//!     },
//!     {
//!       "id": "remote",
//!       "name": "Remote tools",
//!       "transport": "sse",
//!       "url": "https://tools.example.com/",
//!       "token": "${TOOLS_TOKEN}"
//!     }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::error::McpError;

/// A list of server records as stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl McpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load server records from a JSON file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, McpError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            McpError::build(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse either `{"servers": [...]}` or a bare array of records.
    pub fn from_json(json: &str) -> Result<Self, McpError> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Stored {
            Wrapped {
                #[serde(alias = "mcpServers")]
                servers: Vec<ServerConfig>,
            },
            Bare(Vec<ServerConfig>),
        }

        let stored: Stored = serde_json::from_str(json)?;
        let servers = match stored {
            Stored::Wrapped { servers } | Stored::Bare(servers) => servers,
        };
        Ok(Self { servers })
    }

    /// Records with `enabled: true`, in stored order.
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|c| c.enabled)
    }

    /// Insert a record, replacing any with the same id.
    pub fn add_server(&mut self, config: ServerConfig) {
        self.servers.retain(|c| c.id != config.id);
        self.servers.push(config);
    }

    pub fn remove_server(&mut self, id: &str) -> Option<ServerConfig> {
        let index = self.servers.iter().position(|c| c.id == id)?;
        Some(self.servers.remove(index))
    }
}

/// Configuration for a single tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawServerConfig")]
pub struct ServerConfig {
    /// Opaque unique identifier; the registry key.
    pub id: String,

    /// Display name.
    pub name: String,

    pub enabled: bool,

    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: i64,

    /// Transport payload, tagged by `transport`.
    #[serde(flatten)]
    pub transport: TransportConfig,

    /// If non-empty, only these tools are exposed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enabled_tools: Vec<String>,

    /// Tools never exposed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disabled_tools: Vec<String>,

    /// Per-call timeout for `tools/call`.
    pub tool_timeout_sec: u64,
}

/// Transport-specific payload of a [`ServerConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Local subprocess speaking over stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },

    /// Long-lived HTTP event stream with a POST back-channel.
    Sse {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(
            default,
            rename = "secondaryToken",
            skip_serializing_if = "Option::is_none"
        )]
        secondary_token: Option<String>,
    },

    /// Streamable HTTP.
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
}

/// Discriminator of [`TransportConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Stdio,
    Sse,
    Http,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Sse => write!(f, "sse"),
            Self::Http => write!(f, "http"),
        }
    }
}

fn default_tool_timeout() -> u64 {
    300
}

impl ServerConfig {
    fn with_transport(id: impl Into<String>, name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            created_at: chrono::Utc::now().timestamp_millis(),
            transport,
            enabled_tools: Vec::new(),
            disabled_tools: Vec::new(),
            tool_timeout_sec: default_tool_timeout(),
        }
    }

    /// Create a stdio transport configuration.
    pub fn stdio(id: impl Into<String>, name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_transport(
            id,
            name,
            TransportConfig::Stdio {
                command: command.into(),
                args: Vec::new(),
                env: HashMap::new(),
                cwd: None,
            },
        )
    }

    /// Create an SSE transport configuration.
    pub fn sse(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            id,
            name,
            TransportConfig::Sse {
                url: url.into(),
                token: None,
                secondary_token: None,
            },
        )
    }

    /// Create a streamable HTTP transport configuration.
    pub fn http(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            id,
            name,
            TransportConfig::Http {
                url: url.into(),
                token: None,
            },
        )
    }

    /// Set command arguments (stdio only).
    pub fn with_args(mut self, new_args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        if let TransportConfig::Stdio { args, .. } = &mut self.transport {
            *args = new_args.into_iter().map(|s| s.into()).collect();
        }
        self
    }

    /// Set environment variables (stdio only).
    pub fn with_env(
        mut self,
        vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        if let TransportConfig::Stdio { env, .. } = &mut self.transport {
            *env = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        }
        self
    }

    /// Set working directory (stdio only).
    pub fn with_cwd(mut self, dir: impl Into<String>) -> Self {
        if let TransportConfig::Stdio { cwd, .. } = &mut self.transport {
            *cwd = Some(dir.into());
        }
        self
    }

    /// Set the bearer token (network transports only).
    pub fn with_token(mut self, value: impl Into<String>) -> Self {
        match &mut self.transport {
            TransportConfig::Sse { token, .. } | TransportConfig::Http { token, .. } => {
                *token = Some(value.into());
            }
            TransportConfig::Stdio { .. } => {}
        }
        self
    }

    /// Set the secondary API key (SSE only).
    pub fn with_secondary_token(mut self, value: impl Into<String>) -> Self {
        if let TransportConfig::Sse { secondary_token, .. } = &mut self.transport {
            *secondary_token = Some(value.into());
        }
        self
    }

    pub fn with_enabled_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.enabled_tools = tools.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn with_disabled_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.disabled_tools = tools.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn transport_type(&self) -> TransportType {
        match self.transport {
            TransportConfig::Stdio { .. } => TransportType::Stdio,
            TransportConfig::Sse { .. } => TransportType::Sse,
            TransportConfig::Http { .. } => TransportType::Http,
        }
    }

    pub fn is_stdio(&self) -> bool {
        self.transport_type() == TransportType::Stdio
    }

    /// Command name for stdio configs.
    pub fn command(&self) -> Option<&str> {
        match &self.transport {
            TransportConfig::Stdio { command, .. } => Some(command),
            _ => None,
        }
    }

    /// URL for network configs.
    pub fn url(&self) -> Option<&str> {
        match &self.transport {
            TransportConfig::Sse { url, .. } | TransportConfig::Http { url, .. } => Some(url),
            TransportConfig::Stdio { .. } => None,
        }
    }

    /// Check if a tool is exposed.
    pub fn is_tool_enabled(&self, tool_name: &str) -> bool {
        if self.disabled_tools.iter().any(|t| t == tool_name) {
            return false;
        }
        self.enabled_tools.is_empty() || self.enabled_tools.iter().any(|t| t == tool_name)
    }

    /// Bearer token with `${VAR}` references expanded.
    pub fn expanded_token(&self) -> Option<String> {
        match &self.transport {
            TransportConfig::Sse { token, .. } | TransportConfig::Http { token, .. } => {
                token.as_deref().map(expand_env)
            }
            TransportConfig::Stdio { .. } => None,
        }
    }

    /// Secondary API key with `${VAR}` references expanded.
    pub fn expanded_secondary_token(&self) -> Option<String> {
        match &self.transport {
            TransportConfig::Sse {
                secondary_token, ..
            } => secondary_token.as_deref().map(expand_env),
            _ => None,
        }
    }

    /// Checks that can fail before any process or socket exists.
    pub fn validate(&self) -> Result<(), McpError> {
        if self.id.trim().is_empty() || self.name.trim().is_empty() {
            return Err(McpError::build("Missing required fields: id and name"));
        }
        match &self.transport {
            TransportConfig::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(McpError::build("Missing command for stdio transport"));
                }
            }
            TransportConfig::Sse { url, .. } | TransportConfig::Http { url, .. } => {
                if url.trim().is_empty() {
                    return Err(McpError::build(format!(
                        "Missing url for {} transport",
                        self.transport_type()
                    )));
                }
                let parsed = reqwest::Url::parse(url.trim())
                    .map_err(|e| McpError::build(format!("Invalid url '{}': {}", url, e)))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(McpError::build(format!(
                        "Unsupported url scheme '{}'",
                        parsed.scheme()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Expand `${VAR}` references from the process environment. Unset
/// variables expand to the empty string.
pub fn expand_env(value: &str) -> String {
    let mut result = value.to_string();
    let mut cursor = 0;
    while let Some(offset) = result[cursor..].find("${") {
        let start = cursor + offset;
        let Some(len) = result[start..].find('}') else {
            break;
        };
        let var_name = &result[start + 2..start + len];
        let replacement = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..start], replacement, &result[start + len + 1..]);
        cursor = start + replacement.len();
    }
    result
}

/// Wire shape accepted from storage, including legacy records without a
/// `transport` field.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerConfig {
    id: String,
    name: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    created_at: i64,
    transport: Option<TransportType>,
    command: Option<String>,
    args: Option<serde_json::Value>,
    #[serde(default)]
    env: HashMap<String, String>,
    cwd: Option<String>,
    url: Option<String>,
    token: Option<String>,
    secondary_token: Option<String>,
    #[serde(default)]
    enabled_tools: Vec<String>,
    #[serde(default)]
    disabled_tools: Vec<String>,
    #[serde(default = "default_tool_timeout")]
    tool_timeout_sec: u64,
}

fn default_enabled() -> bool {
    true
}

impl TryFrom<RawServerConfig> for ServerConfig {
    type Error = String;

    fn try_from(raw: RawServerConfig) -> Result<Self, Self::Error> {
        let kind = raw.transport.unwrap_or(if raw.command.is_some() {
            TransportType::Stdio
        } else {
            TransportType::Sse
        });

        let transport = match kind {
            TransportType::Stdio => {
                let command = raw
                    .command
                    .ok_or_else(|| "Missing command for stdio transport".to_string())?;
                let args = match raw.args {
                    None | Some(serde_json::Value::Null) => Vec::new(),
                    Some(value) => serde_json::from_value::<Vec<String>>(value)
                        .map_err(|_| "Invalid args format - must be an array".to_string())?,
                };
                TransportConfig::Stdio {
                    command,
                    args,
                    env: raw.env,
                    cwd: raw.cwd,
                }
            }
            TransportType::Sse => TransportConfig::Sse {
                url: raw
                    .url
                    .ok_or_else(|| "Missing url for sse transport".to_string())?,
                token: raw.token,
                secondary_token: raw.secondary_token,
            },
            TransportType::Http => TransportConfig::Http {
                url: raw
                    .url
                    .ok_or_else(|| "Missing url for http transport".to_string())?,
                token: raw.token,
            },
        };

        Ok(Self {
            id: raw.id,
            name: raw.name,
            enabled: raw.enabled,
            created_at: raw.created_at,
            transport,
            enabled_tools: raw.enabled_tools,
            disabled_tools: raw.disabled_tools,
            tool_timeout_sec: raw.tool_timeout_sec,
        })
    }
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Capability bridge: tools of connected sessions as model-callable handles.
//!
//! [`tools_for_active_sessions`] flattens every connected session's tools
//! into [`ToolHandler`]s. [`ToolCallRelay`] executes the model's function
//! calls through a registry of those handles and reports each invocation to
//! the caller as a [`FunctionCallEvent`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::error::McpError;
use super::session::Session;
use super::supervisor::Supervisor;
use super::types::McpToolInfo;
use crate::error::ToolError;
use crate::tools::registry::{ToolHandler, ToolOutput, ToolRegistry};
use crate::types::{ToolCall, ToolDefinition};

/// Schema keys the model API rejects.
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "additionalProperties"];

/// Wrapper that exposes an MCP tool as a tool handle.
pub struct McpToolWrapper {
    tool_info: McpToolInfo,
    session: Arc<Session>,
}

impl McpToolWrapper {
    pub fn new(tool_info: McpToolInfo, session: Arc<Session>) -> Self {
        Self { tool_info, session }
    }

    pub fn info(&self) -> &McpToolInfo {
        &self.tool_info
    }

    /// Name the model calls this tool by.
    pub fn qualified_name(&self) -> String {
        self.tool_info.qualified_name()
    }

    /// Id of the owning session.
    pub fn server(&self) -> &str {
        self.session.id()
    }
}

#[async_trait]
impl ToolHandler for McpToolWrapper {
    fn definition(&self) -> ToolDefinition {
        let description = self
            .tool_info
            .description
            .clone()
            .unwrap_or_else(|| format!("Tool from the {} server", self.session.name()));

        ToolDefinition::new(self.qualified_name(), description)
            .with_parameters(sanitize_schema(&self.tool_info.input_schema))
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput, ToolError> {
        match self.session.call_tool(&self.tool_info.name, input).await {
            Ok(result) if result.is_error => Ok(ToolOutput::error(result.as_text())),
            Ok(result) => Ok(ToolOutput::success(result.as_text())),
            Err(McpError::ToolCallTimeout { timeout_secs, .. }) => {
                Err(ToolError::Timeout(timeout_secs.saturating_mul(1000)))
            }
            Err(e) if e.is_connection_loss() => Err(ToolError::Disconnected(format!(
                "{}: {}",
                self.session.id(),
                e
            ))),
            Err(e) => Err(ToolError::ExecutionFailed(e.to_string())),
        }
    }
}

/// Make a server-provided JSON Schema acceptable as function parameters.
///
/// Unsupported keys are removed at every depth. Anything that is not an
/// object schema becomes an empty object schema.
pub fn sanitize_schema(schema: &Value) -> Value {
    fn strip(value: &mut Value) {
        match value {
            Value::Object(map) => {
                for key in UNSUPPORTED_SCHEMA_KEYS {
                    map.remove(*key);
                }
                map.values_mut().for_each(strip);
            }
            Value::Array(items) => items.iter_mut().for_each(strip),
            _ => {}
        }
    }

    let mut schema = match schema {
        Value::Object(map) if !map.is_empty() => schema.clone(),
        _ => return serde_json::json!({ "type": "object", "properties": {} }),
    };
    strip(&mut schema);
    if let Value::Object(map) = &mut schema {
        map.entry("type").or_insert_with(|| Value::String("object".to_string()));
    }
    schema
}

/// Tool handles for every tool of every connected session, in session id
/// order. Disconnected sessions contribute nothing.
pub async fn tools_for_active_sessions(supervisor: &Supervisor) -> Vec<Arc<dyn ToolHandler>> {
    let mut handlers: Vec<Arc<dyn ToolHandler>> = Vec::new();
    for session in supervisor.list().await {
        for tool_info in session.tools() {
            handlers.push(Arc::new(McpToolWrapper::new(tool_info.clone(), session.clone())));
        }
    }
    debug!(tools = handlers.len(), "Collected tools from active sessions");
    handlers
}

/// Lifecycle of one function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionCallStatus {
    Pending,
    Success,
    Error,
}

/// Notification about one tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallEvent {
    pub id: String,
    pub tool_name: String,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub status: FunctionCallStatus,
    pub timestamp: DateTime<Utc>,
}

impl FunctionCallEvent {
    /// A fresh pending event with a generated id.
    pub fn pending(tool_name: impl Into<String>, input: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            input,
            output: None,
            status: FunctionCallStatus::Pending,
            timestamp: Utc::now(),
        }
    }

    /// The same invocation, finished.
    pub fn finish(&self, output: impl Into<String>, success: bool) -> Self {
        Self {
            output: Some(output.into()),
            status: if success {
                FunctionCallStatus::Success
            } else {
                FunctionCallStatus::Error
            },
            timestamp: Utc::now(),
            ..self.clone()
        }
    }
}

/// Executes model function calls and reports them one at a time.
///
/// Every invocation is sent as a `pending` event before it runs and again,
/// under the same id, once it finished.
pub struct ToolCallRelay {
    registry: ToolRegistry,
    events: Option<mpsc::UnboundedSender<FunctionCallEvent>>,
}

impl ToolCallRelay {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            events: None,
        }
    }

    /// Relay events into `events`. A dropped receiver is ignored.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<FunctionCallEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one call. Failures are reported in the event, never returned.
    pub async fn invoke(&self, call: &ToolCall) -> FunctionCallEvent {
        let pending = FunctionCallEvent::pending(&call.name, call.input.clone());
        self.emit(&pending);

        let finished = match self.registry.dispatch(&call.name, call.input.clone()).await {
            Ok(result) => {
                let success = !result.is_error && result.output.is_success();
                pending.finish(result.output.content(), success)
            }
            Err(e) => pending.finish(e.to_string(), false),
        };
        self.emit(&finished);
        finished
    }

    fn emit(&self, event: &FunctionCallEvent) {
        if let Some(events) = &self.events {
            if events.send(event.clone()).is_err() {
                debug!(tool = %event.tool_name, "Function call listener went away");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::ServerConfig;
    use crate::mcp::handshake::HandshakeOutcome;
    use crate::mcp::session::MockClientHandle;
    use crate::mcp::types::{McpToolResult, ServerInfo};
    use serde_json::json;

    fn tool(name: &str, read_only: bool) -> McpToolInfo {
        McpToolInfo {
            name: name.to_string(),
            description: Some("Get the current time".to_string()),
            input_schema: json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "type": "object",
                "properties": {
                    "timezone": { "type": "string" },
                    "opts": { "type": "object", "additionalProperties": false }
                },
                "additionalProperties": false
            }),
            server: "time".to_string(),
            read_only,
            destructive: false,
        }
    }

    fn session(client: MockClientHandle, tools: Vec<McpToolInfo>) -> Arc<Session> {
        let config = ServerConfig::stdio("time", "Time", "uvx");
        Arc::new(Session::new(
            &config,
            HandshakeOutcome {
                client: Arc::new(client),
                server_info: ServerInfo::default(),
                tools,
                probe_warning: None,
                effective_url: None,
            },
            None,
        ))
    }

    #[test]
    fn test_definition_uses_qualified_name_and_clean_schema() {
        let wrapper = McpToolWrapper::new(tool("get_current_time", true), session(MockClientHandle::new(), vec![]));
        let def = wrapper.definition();
        assert_eq!(def.name, "mcp__time_get_current_time");
        assert_eq!(def.description, "Get the current time");
        assert!(def.parameters.get("$schema").is_none());
        assert!(def.parameters.get("additionalProperties").is_none());
        assert!(def.parameters["properties"]["opts"].get("additionalProperties").is_none());
    }

    #[test]
    fn test_sanitize_schema_defaults() {
        assert_eq!(sanitize_schema(&json!(null)), json!({"type": "object", "properties": {}}));
        assert_eq!(
            sanitize_schema(&json!({"properties": {}})),
            json!({"type": "object", "properties": {}})
        );
    }

    #[tokio::test]
    async fn test_execute_maps_results() {
        let mut client = MockClientHandle::new();
        client.expect_call_tool().returning(|_, args, _| {
            if args.get("fail").is_some() {
                Ok(McpToolResult::error("bad timezone"))
            } else {
                Ok(McpToolResult::text("12:00"))
            }
        });
        let wrapper = McpToolWrapper::new(tool("now", false), session(client, vec![]));

        let ok = wrapper.execute(json!({})).await.unwrap();
        assert!(ok.is_success());
        assert_eq!(ok.content(), "12:00");

        let err = wrapper.execute(json!({"fail": true})).await.unwrap();
        assert!(!err.is_success());
    }

    #[tokio::test]
    async fn test_execute_reports_disconnect() {
        let mut client = MockClientHandle::new();
        client
            .expect_call_tool()
            .returning(|_, _, _| Err(McpError::transport("Connection closed")));
        let wrapper = McpToolWrapper::new(tool("now", true), session(client, vec![]));
        let err = wrapper.execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Disconnected(_)));
    }

    #[tokio::test]
    async fn test_relay_emits_pending_then_result() {
        let mut client = MockClientHandle::new();
        client
            .expect_call_tool()
            .returning(|_, _, _| Ok(McpToolResult::text("12:00")));
        let s = session(client, vec![tool("now", true)]);
        let handlers: Vec<Arc<dyn ToolHandler>> = s
            .tools()
            .iter()
            .map(|t| Arc::new(McpToolWrapper::new(t.clone(), s.clone())) as Arc<dyn ToolHandler>)
            .collect();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let relay = ToolCallRelay::new(ToolRegistry::from_handlers(handlers)).with_events(tx);
        let call = ToolCall {
            id: "c1".to_string(),
            name: "mcp__time_now".to_string(),
            input: json!({"timezone": "UTC"}),
        };

        let done = relay.invoke(&call).await;
        assert_eq!(done.status, FunctionCallStatus::Success);
        assert_eq!(done.output.as_deref(), Some("12:00"));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.status, FunctionCallStatus::Pending);
        assert_eq!(first.id, second.id);
        assert_eq!(second, done);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_unknown_tool_is_error_event() {
        let relay = ToolCallRelay::new(ToolRegistry::new());
        let call = ToolCall {
            id: "c1".to_string(),
            name: "missing".to_string(),
            input: json!({}),
        };
        let done = relay.invoke(&call).await;
        assert_eq!(done.status, FunctionCallStatus::Error);
        assert!(done.output.unwrap().contains("missing"));
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = FunctionCallEvent::pending("mcp__time_now", json!({}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["toolName"], "mcp__time_now");
        assert_eq!(value["status"], "pending");
        assert!(value.get("output").is_none());
        assert!(uuid::Uuid::parse_str(value["id"].as_str().unwrap()).is_ok());
    }
}

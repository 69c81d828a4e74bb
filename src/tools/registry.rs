// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool registry and handler trait.
//!
//! - [`ToolHandler`] is a callable tool handle
//! - [`ToolRegistry`] maps qualified names to handles and dispatches calls
//! - [`ToolOutput`] is what a handle returns

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "telemetry")]
use tracing::{debug, info_span, Instrument};

use crate::error::ToolError;
#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;
use crate::types::ToolDefinition;

/// Text returned by a tool, flagged as success or failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    content: String,
    success: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: false,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl From<ToolError> for ToolOutput {
    fn from(err: ToolError) -> Self {
        Self::error(err.to_string())
    }
}

/// A tool the model may call.
///
/// MCP server tools are wrapped by [`crate::mcp::McpToolWrapper`].
///
/// ```rust,ignore
/// struct Echo;
///
/// #[async_trait]
/// impl ToolHandler for Echo {
///     fn definition(&self) -> ToolDefinition {
///         ToolDefinition::new("echo", "Echo the input back")
///     }
///
///     async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
///         Ok(ToolOutput::success(input.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Name, description and input schema.
    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// Handles keyed by tool name.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry over a set of handles, e.g. the tools of every connected
    /// server. Later handles win on name clashes.
    pub fn from_handlers(handlers: impl IntoIterator<Item = Arc<dyn ToolHandler>>) -> Self {
        let handlers = handlers
            .into_iter()
            .map(|handler| (handler.definition().name, handler))
            .collect();
        Self { handlers }
    }

    /// All tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.handlers.values().map(|h| h.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Run a tool by name.
    ///
    /// Handler failures come back as an error output with `is_error` set;
    /// only an unknown name is an `Err`. With the `telemetry` feature the
    /// call is traced and recorded in [`GLOBAL_METRICS`].
    pub async fn dispatch(
        &self,
        tool_name: &str,
        input: serde_json::Value,
    ) -> Result<DispatchResult, ToolError> {
        let handler = self
            .handlers
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;

        #[cfg(feature = "telemetry")]
        debug!(tool = %tool_name, "Executing tool");

        let start = Instant::now();

        #[cfg(feature = "telemetry")]
        let result = handler
            .execute(input)
            .instrument(info_span!("tool_execute", tool = %tool_name))
            .await;

        #[cfg(not(feature = "telemetry"))]
        let result = handler.execute(input).await;

        let duration = start.elapsed();

        #[cfg(feature = "telemetry")]
        {
            GLOBAL_METRICS.record_tool(tool_name, duration, result.is_ok());
            match &result {
                Ok(_) => debug!(
                    tool = %tool_name,
                    duration_ms = duration.as_secs_f64() * 1000.0,
                    "Tool execution succeeded"
                ),
                Err(err) => debug!(
                    tool = %tool_name,
                    duration_ms = duration.as_secs_f64() * 1000.0,
                    error = %err,
                    "Tool execution failed"
                ),
            }
        }

        let (output, is_error) = match result {
            Ok(output) => (output, false),
            Err(err) => (ToolOutput::from(err), true),
        };
        Ok(DispatchResult {
            tool_name: tool_name.to_string(),
            output,
            duration,
            is_error,
        })
    }
}

/// Result of dispatching a tool call.
#[derive(Debug)]
pub struct DispatchResult {
    pub tool_name: String,
    pub output: ToolOutput,
    pub duration: Duration,
    /// The handler returned an error rather than an output.
    pub is_error: bool,
}

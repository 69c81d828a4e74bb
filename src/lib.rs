// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Toolbridge - streaming LLM chat backed by external MCP tool servers.
//!
//! The crate supervises connections to tool servers (stdio child
//! processes or remote SSE endpoints), exposes the tools they advertise to
//! a Gemini model, and streams the model's answer as `data:` frames.
//!
//! # Architecture
//!
//! - [`types`] - Messages, tool definitions and the [`Provider`] trait
//! - [`error`] - Error types and result aliases
//! - [`config`] - Layered configuration (global, workspace, CLI)
//! - [`mcp`] - Server configs, handshake, supervisor and the tool bridge
//! - [`tools`] - Tool registry shared by the chat pipeline
//! - [`providers`] - Gemini REST provider
//! - [`chat`] - Chat pipeline, frame encoding and title summarization
//! - [`sse`] - Incremental `text/event-stream` decoder
//! - [`telemetry`] - Logging setup and in-process metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toolbridge::mcp::{McpService, Supervisor};
//! use toolbridge::config::{load_config, CliOptions};
//!
//! let config = load_config(".", CliOptions::default())?;
//! let supervisor = Arc::new(Supervisor::new(config.supervisor.options()));
//! let service = McpService::new(supervisor.clone());
//! let report = service.init_many(&config.servers).await;
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod mcp;
pub mod providers;
pub mod sse;
pub mod telemetry;
pub mod tools;
pub mod types;

pub use chat::{ChatError, ChatFrame, ChatPipeline, ChatRequest};
pub use error::{ConfigError, ProviderError, Result, ToolError};
pub use mcp::{ConnectionError, McpError, McpService, ServerConfig, Supervisor};
pub use providers::{create_provider, create_provider_from_env, gemini, GeminiProvider};
pub use types::{
    BoxedProvider, ContentBlock, Message, MessageContent, Provider, ProviderConfig,
    ProviderResponse, Role, SharedProvider, StopReason, StreamEvent, TokenUsage, ToolCall,
    ToolDefinition,
};

/// Toolbridge version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model Context Protocol (MCP) tool server supervision.
//!
//! Connects to external MCP servers, keeps one live session per server id
//! and exposes the servers' tools to the model.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Supervisor                         │
//! │   per-id lock ─► Connector ─► retries ─► classify         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐        │
//! │  │  Session    │  │  Session    │  │  Session    │        │
//! │  │  (stdio)    │  │  (sse)      │  │  (http)     │        │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘        │
//! └─────────┼────────────────┼────────────────┼───────────────┘
//!           │                │                │
//!     ┌─────▼─────┐    ┌─────▼─────┐    ┌─────▼──────┐
//!     │  child    │    │ GET event │    │ streamable │
//!     │  process  │    │ stream +  │    │ HTTP       │
//!     │  pipes    │    │ POST      │    │            │
//!     └───────────┘    └───────────┘    └────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use toolbridge::mcp::{McpService, ServerConfig, Supervisor};
//!
//! let service = McpService::new(Arc::new(Supervisor::default()));
//! let view = service
//!     .connect(&ServerConfig::stdio("time", "Time", "uvx").with_args(["mcp-server-time"]))
//!     .await?;
//!
//! let tools = tools_for_active_sessions(service.supervisor()).await;
//! ```

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod handshake;
pub mod service;
pub mod session;
pub mod sse_client;
pub mod supervisor;
pub mod tools;
pub mod transport;
pub mod types;

pub use config::{McpConfig, ServerConfig, TransportConfig, TransportType};
pub use diagnostics::{classify, classify_record, suggest, DiagnosticKind};
pub use error::{ConnectionError, McpError};
pub use handshake::{DiagnosticBuffer, HandshakeOutcome, HandshakeTimeouts};
pub use service::{InitManyResponse, McpService};
pub use session::{ClientHandle, Session, SessionView};
pub use supervisor::{Connector, RmcpConnector, Supervisor, SupervisorOptions};
pub use tools::{tools_for_active_sessions, FunctionCallEvent, FunctionCallStatus, McpToolWrapper, ToolCallRelay};
pub use types::*;

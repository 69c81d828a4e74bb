// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Boundary operations handed to the presentation and storage layers.
//!
//! Every response type serializes to the JSON shape those layers consume.
//! Connection failures are always returned as [`ConnectionError`].

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::config::ServerConfig;
use super::diagnostics::classify_record;
use super::error::ConnectionError;
use super::session::SessionView;
use super::supervisor::Supervisor;

/// `disconnect` response. Always successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisconnectResponse {
    pub success: bool,
}

/// Entry of `init_many`'s `connected` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectedServer {
    pub id: String,
    pub name: String,
    pub connected: bool,
}

/// Entry of `init_many`'s `failed` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedServer {
    pub id: String,
    pub name: String,
    pub error: String,
}

/// Outcome of a batch connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitManyResponse {
    pub connected: Vec<ConnectedServer>,
    pub failed: Vec<FailedServer>,
}

/// Server management facade over an injected [`Supervisor`].
#[derive(Clone)]
pub struct McpService {
    supervisor: Arc<Supervisor>,
}

impl McpService {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Connect one server and return its projection.
    pub async fn connect(&self, config: &ServerConfig) -> Result<SessionView, ConnectionError> {
        let session = self.supervisor.connect(config).await?;
        Ok(session.view())
    }

    /// Connect a server from an untyped stored record.
    ///
    /// The record is validated once here; a malformed record fails without
    /// any connection attempt.
    pub async fn connect_value(&self, record: Value) -> Result<SessionView, ConnectionError> {
        match serde_json::from_value::<ServerConfig>(record) {
            Ok(config) => self.connect(&config).await,
            Err(e) => {
                warn!(error = %e, "Rejecting malformed server record");
                Err(classify_record(&e.to_string()))
            }
        }
    }

    /// Disconnect a server. Unknown ids succeed too.
    pub async fn disconnect(&self, id: &str) -> DisconnectResponse {
        self.supervisor.disconnect(id).await;
        DisconnectResponse { success: true }
    }

    /// Projections of all connected servers, sorted by id.
    pub async fn list(&self) -> Vec<SessionView> {
        self.supervisor.views().await
    }

    /// Connect every enabled config independently. Disabled configs are
    /// skipped; a failure never affects the other servers.
    pub async fn init_many(&self, configs: &[ServerConfig]) -> InitManyResponse {
        let enabled: Vec<&ServerConfig> = configs.iter().filter(|c| c.enabled).collect();
        let results = join_all(enabled.iter().map(|config| self.supervisor.connect(config))).await;

        let mut response = InitManyResponse::default();
        for (config, result) in enabled.into_iter().zip(results) {
            match result {
                Ok(session) => response.connected.push(ConnectedServer {
                    id: config.id.clone(),
                    name: config.name.clone(),
                    connected: session.is_connected(),
                }),
                Err(e) => {
                    warn!(mcp.server = %config.id, error = %e, "Server failed to initialize");
                    response.failed.push(FailedServer {
                        id: config.id.clone(),
                        name: config.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            connected = response.connected.len(),
            failed = response.failed.len(),
            "MCP servers initialized"
        );
        response
    }
}

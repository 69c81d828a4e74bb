// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Connection supervisor.
//!
//! Owns the registry of live sessions keyed by server id. At most one live
//! session exists per id: concurrent `connect` calls for the same id are
//! serialized by a per-id lock, and the winner's session is returned to the
//! others. A `disconnect` issued while a connect is in flight cancels it; the
//! late session is closed instead of registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "telemetry")]
use std::time::Instant;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::config::ServerConfig;
use super::diagnostics::classify;
use super::error::{ConnectionError, McpError};
use super::handshake::{handshake, DiagnosticBuffer, HandshakeOutcome, HandshakeTimeouts};
use super::session::{Session, SessionView};
use super::transport::{self, endpoint_candidates, preflight};

/// Extra wait for a child's stderr to drain after a failed attempt.
const STDERR_SETTLE: Duration = Duration::from_millis(50);

/// Tuning for connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Attempts after the first.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    pub timeouts: HandshakeTimeouts,
    /// Probe SSE endpoint candidates before connecting.
    pub preflight: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_delay: Duration::from_millis(1000),
            timeouts: HandshakeTimeouts::default(),
            preflight: true,
        }
    }
}

/// Produces a negotiated client for one attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        config: &ServerConfig,
        diagnostics: &DiagnosticBuffer,
    ) -> Result<HandshakeOutcome, McpError>;
}

/// Connector that builds real transports and negotiates with rmcp.
#[derive(Debug, Clone, Copy, Default)]
pub struct RmcpConnector {
    timeouts: HandshakeTimeouts,
    preflight: bool,
}

impl RmcpConnector {
    pub fn new(timeouts: HandshakeTimeouts, preflight: bool) -> Self {
        Self { timeouts, preflight }
    }
}

#[async_trait]
impl Connector for RmcpConnector {
    async fn open(
        &self,
        config: &ServerConfig,
        diagnostics: &DiagnosticBuffer,
    ) -> Result<HandshakeOutcome, McpError> {
        let endpoint = if self.preflight {
            let candidates = endpoint_candidates(config)?;
            if candidates.is_empty() {
                None
            } else {
                Some(preflight(&candidates, self.timeouts.probe, diagnostics).await?)
            }
        } else {
            None
        };

        let transport = transport::build(config, endpoint, self.timeouts.handshake)?;
        debug!(mcp.server = %config.id, transport = transport.kind(), "Transport built");
        handshake(transport, config, self.timeouts, diagnostics).await
    }
}

/// Failure message of a connect cancelled by `disconnect`.
const CANCELLED: &str = "Disconnected while connecting";

/// Per-id connect lock. `generation` is bumped by every `disconnect`.
#[derive(Default)]
struct Slot {
    lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
}

/// Registry of live sessions.
pub struct Supervisor {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// Only ids with a connect in flight have an entry.
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    connector: Arc<dyn Connector>,
    options: SupervisorOptions,
}

impl Supervisor {
    /// Supervisor using real transports.
    pub fn new(options: SupervisorOptions) -> Self {
        let connector = RmcpConnector::new(options.timeouts, options.preflight);
        Self::with_connector(Arc::new(connector), options)
    }

    pub fn with_connector(connector: Arc<dyn Connector>, options: SupervisorOptions) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
            connector,
            options,
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Slot for `id` and its generation at the time the caller arrived.
    fn acquire_slot(&self, id: &str) -> (Arc<Slot>, u64) {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        let slot = slots.entry(id.to_string()).or_default().clone();
        let generation = slot.generation.load(Ordering::SeqCst);
        (slot, generation)
    }

    /// Drop the slot for `id` once no connect holds it.
    fn release_slot(&self, id: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        if slots.get(id).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(id);
        }
    }

    async fn connected(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(id)
            .filter(|s| s.is_connected())
            .cloned()
    }

    /// Connect with the configured retry count.
    pub async fn connect(&self, config: &ServerConfig) -> Result<Arc<Session>, ConnectionError> {
        self.connect_with_retries(config, self.options.retries).await
    }

    /// Return the live session for `config.id`, or establish one.
    ///
    /// Makes up to `retries + 1` attempts with a fixed delay between them.
    /// Invalid configs fail on the first attempt. On failure no entry for the
    /// id remains in the registry.
    #[instrument(skip(self, config), fields(mcp.server = %config.id))]
    pub async fn connect_with_retries(
        &self,
        config: &ServerConfig,
        retries: u32,
    ) -> Result<Arc<Session>, ConnectionError> {
        if let Some(session) = self.connected(&config.id).await {
            return Ok(session);
        }

        let (slot, generation) = self.acquire_slot(&config.id);
        let result = {
            let _guard = slot.lock.lock().await;
            self.connect_locked(config, retries, &slot, generation).await
        };
        drop(slot);
        self.release_slot(&config.id);
        result
    }

    async fn connect_locked(
        &self,
        config: &ServerConfig,
        retries: u32,
        slot: &Slot,
        generation: u64,
    ) -> Result<Arc<Session>, ConnectionError> {
        // Another caller may have connected while we waited.
        if let Some(session) = self.connected(&config.id).await {
            return Ok(session);
        }
        self.evict_stale(&config.id).await;

        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        if let Err(e) = config.validate() {
            warn!(error = %e, "Rejecting invalid server config");
            return Err(classify(&e.to_string(), config, None, 1));
        }

        let cancelled = || slot.generation.load(Ordering::SeqCst) != generation;
        let total = retries + 1;
        let mut last_error: Option<McpError> = None;
        let mut last_diagnostics = DiagnosticBuffer::new();
        let mut attempts = 0;

        for attempt in 0..total {
            if cancelled() {
                info!(attempt = attempts, "Connect cancelled by disconnect");
                return Err(classify(CANCELLED, config, None, attempts));
            }
            attempts = attempt + 1;
            let diagnostics = DiagnosticBuffer::new();

            match self.connector.open(config, &diagnostics).await {
                Ok(outcome) => {
                    let previous = last_error.map(|e| e.to_string());
                    let session = Arc::new(Session::new(config, outcome, previous));

                    let mut sessions = self.sessions.write().await;
                    if cancelled() {
                        drop(sessions);
                        info!(attempt = attempts, "Connect cancelled by disconnect");
                        if let Err(e) = session.close().await {
                            debug!(error = %e, "Closing cancelled session failed");
                        }
                        return Err(classify(CANCELLED, config, None, attempts));
                    }
                    sessions.insert(config.id.clone(), session.clone());
                    drop(sessions);

                    #[cfg(feature = "telemetry")]
                    GLOBAL_METRICS.record_operation("mcp.connect", start.elapsed());

                    info!(attempt = attempts, tools = session.tools().len(), "MCP server connected");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(attempt = attempts, attempts = total, error = %e, "MCP connection attempt failed");
                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    last_diagnostics = diagnostics;

                    if !retryable {
                        break;
                    }
                    if attempts < total {
                        tokio::time::sleep(self.options.retry_delay).await;
                    }
                }
            }
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("mcp.connect", start.elapsed());

        // stderr is drained by a separate task.
        if config.is_stdio() {
            tokio::time::sleep(STDERR_SETTLE).await;
        }

        let message = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(classify(&message, config, last_diagnostics.contents(), attempts))
    }

    /// Drop a registered but disconnected session before reconnecting.
    async fn evict_stale(&self, id: &str) {
        let stale = self.sessions.write().await.remove(id);
        if let Some(session) = stale {
            debug!(mcp.server = %id, "Replacing stale session");
            if let Err(e) = session.close().await {
                debug!(mcp.server = %id, error = %e, "Closing stale session failed");
            }
        }
    }

    /// Close and remove a session, cancelling any connect in flight for the
    /// id. Unknown ids are a no-op; close failures are logged.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, id: &str) {
        {
            let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(slot) = slots.get(id) {
                slot.generation.fetch_add(1, Ordering::SeqCst);
            }
        }
        let session = self.sessions.write().await.remove(id);

        let Some(session) = session else {
            return;
        };
        match session.close().await {
            Ok(()) => info!(mcp.server = %id, "MCP server disconnected"),
            Err(e) => warn!(mcp.server = %id, error = %e, "Failed to close MCP server"),
        }
    }

    /// Disconnect every registered session concurrently.
    pub async fn disconnect_all(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        join_all(ids.iter().map(|id| self.disconnect(id))).await;
    }

    /// Teardown at process exit.
    pub async fn shutdown(&self) {
        self.disconnect_all().await;
    }

    /// Connected sessions only.
    pub async fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_connected())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.id().cmp(b.id()));
        sessions
    }

    pub async fn views(&self) -> Vec<SessionView> {
        self.list().await.iter().map(|s| s.view()).collect()
    }

    /// Registered session for `id`, connected or not.
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(SupervisorOptions::default())
    }
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Client side of the HTTP+SSE MCP transport.
//!
//! The server pushes JSON-RPC messages over a `GET` event stream. Its first
//! event, `endpoint`, names the URL that client messages are `POST`ed to.
//! The connection is handed to rmcp as a sink/stream pair backed by two
//! tasks: one reading the event stream, one posting outbound messages.

use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use tracing::{debug, warn};

use super::error::McpError;
use super::handshake::DiagnosticBuffer;
use super::transport::{is_event_stream, Endpoint};
use crate::sse::{SseDecoder, SseEvent};

/// Buffered messages per direction.
const CHANNEL_CAPACITY: usize = 32;

/// Sink/stream pair accepted by `rmcp::ServiceExt::serve`.
pub type SseChannel = (
    mpsc::Sender<ClientJsonRpcMessage>,
    mpsc::Receiver<ServerJsonRpcMessage>,
);

/// Open the event stream, wait for the `endpoint` event and start the
/// reader and writer tasks.
pub async fn connect(
    client: reqwest::Client,
    endpoint: Endpoint,
    diagnostics: DiagnosticBuffer,
    server: &str,
) -> Result<SseChannel, McpError> {
    let base = Url::parse(&endpoint.url)
        .map_err(|e| McpError::build(format!("Invalid url '{}': {}", endpoint.display_url(), e)))?;
    let headers = endpoint.headers()?;

    let response = client
        .get(base.clone())
        .headers(headers.clone())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| McpError::transport(format!("SSE connection failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        if !body.trim().is_empty() {
            diagnostics.append(&format!("HTTP {}: {}\n", status.as_u16(), body.trim()));
        }
        return Err(McpError::transport(format!("HTTP {}", status)));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !is_event_stream(&content_type) {
        return Err(McpError::transport(format!(
            "Expected text/event-stream, got '{}'",
            content_type
        )));
    }

    let mut stream = Box::pin(response.bytes_stream());
    let mut decoder = SseDecoder::new();
    let mut early = Vec::new();
    let mut post_url = None;

    'handshake: while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| McpError::transport(format!("SSE stream error: {}", e)))?;
        for event in decoder.push(&chunk) {
            if event.event == "endpoint" {
                post_url = Some(resolve_endpoint(&base, &event.data)?);
            } else {
                early.push(event);
            }
        }
        if post_url.is_some() {
            break 'handshake;
        }
    }

    let post_url = post_url.ok_or_else(|| {
        McpError::transport("SSE stream closed before the endpoint event")
    })?;
    debug!(mcp.server = %server, endpoint = %post_url, "SSE endpoint received");

    let (inbound_tx, inbound_rx) = mpsc::channel::<ServerJsonRpcMessage>(CHANNEL_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientJsonRpcMessage>(CHANNEL_CAPACITY);

    let reader_server = server.to_string();
    let reader = tokio::spawn(async move {
        let mut inbound_tx = inbound_tx;
        for event in early {
            if !forward(&mut inbound_tx, event, &reader_server).await {
                return;
            }
        }
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(mcp.server = %reader_server, error = %e, "SSE stream error");
                    return;
                }
            };
            for event in decoder.push(&chunk) {
                if !forward(&mut inbound_tx, event, &reader_server).await {
                    return;
                }
            }
        }
        if let Some(event) = decoder.finish() {
            forward(&mut inbound_tx, event, &reader_server).await;
        }
        debug!(mcp.server = %reader_server, "SSE stream ended");
    });

    let writer_server = server.to_string();
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.next().await {
            let result = client
                .post(post_url.clone())
                .headers(headers.clone())
                .json(&message)
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    warn!(mcp.server = %writer_server, %status, body = %body, "SSE POST rejected");
                    diagnostics.append(&format!("POST {}: {}\n", status.as_u16(), body.trim()));
                }
                Err(e) => {
                    warn!(mcp.server = %writer_server, error = %e, "SSE POST failed");
                    diagnostics.append(&format!("POST failed: {}\n", e));
                }
            }
        }
        // rmcp dropped its sink: the session is over.
        reader.abort();
        debug!(mcp.server = %writer_server, "SSE writer stopped");
    });

    Ok((outbound_tx, inbound_rx))
}

/// Resolve the `endpoint` event payload against the stream URL. Relative
/// paths keep the stream's origin.
pub fn resolve_endpoint(base: &Url, data: &str) -> Result<Url, McpError> {
    base.join(data.trim())
        .map_err(|e| McpError::transport(format!("Invalid endpoint '{}': {}", data, e)))
}

/// Send a `message` event into rmcp. Returns `false` once rmcp has gone.
async fn forward(
    tx: &mut mpsc::Sender<ServerJsonRpcMessage>,
    event: SseEvent,
    server: &str,
) -> bool {
    if !event.is_message() {
        debug!(mcp.server = %server, event = %event.event, "Ignoring SSE event");
        return true;
    }
    match serde_json::from_str::<ServerJsonRpcMessage>(&event.data) {
        Ok(message) => tx.send(message).await.is_ok(),
        Err(e) => {
            warn!(mcp.server = %server, error = %e, "Dropping malformed SSE message");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_endpoint() {
        let base = Url::parse("https://host/sse?token=abc").unwrap();
        let url = resolve_endpoint(&base, "/messages?sessionId=42").unwrap();
        assert_eq!(url.as_str(), "https://host/messages?sessionId=42");
    }

    #[test]
    fn test_resolve_absolute_endpoint() {
        let base = Url::parse("https://host/sse").unwrap();
        let url = resolve_endpoint(&base, "https://other/rpc").unwrap();
        assert_eq!(url.as_str(), "https://other/rpc");
    }

    #[test]
    fn test_server_message_parses() {
        let data = r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#;
        assert!(serde_json::from_str::<ServerJsonRpcMessage>(data).is_ok());
    }

    #[tokio::test]
    async fn test_forward_skips_other_events() {
        let (mut tx, _rx) = mpsc::channel(1);
        let event = SseEvent {
            event: "ping".to_string(),
            data: "{}".to_string(),
        };
        assert!(forward(&mut tx, event, "s").await);
    }

    #[tokio::test]
    async fn test_forward_reports_closed_receiver() {
        let (mut tx, rx) = mpsc::channel(1);
        drop(rx);
        let event = SseEvent {
            event: "message".to_string(),
            data: r#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_string(),
        };
        assert!(!forward(&mut tx, event, "s").await);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let endpoint = Endpoint {
            url: "http://127.0.0.1:9/sse".to_string(),
            bearer: None,
            secondary: None,
        };
        let err = connect(reqwest::Client::new(), endpoint, DiagnosticBuffer::new(), "s")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Transport(_)));
    }
}

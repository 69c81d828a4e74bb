// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transport factory.
//!
//! [`build`] turns a validated [`ServerConfig`] into a [`Transport`] without
//! performing the protocol handshake. A stdio config spawns its child with a
//! piped stderr; network configs only construct their HTTP client. Spawn
//! failures are carried inside the transport and reported by the handshake.
//!
//! SSE URLs must name a concrete stream endpoint. [`endpoint_candidates`]
//! yields a short, ordered list of URL and token placements, and
//! [`preflight`] picks the first one that answers like an event stream.

use std::process::Stdio;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use tokio::process::{ChildStderr, Command};
use tracing::debug;

use super::config::{ServerConfig, TransportConfig};
use super::error::McpError;
use super::handshake::DiagnosticBuffer;

/// Default stream path appended to bare SSE origins.
pub const DEFAULT_SSE_PATH: &str = "/sse";

/// Header carrying the secondary API key.
pub const SECONDARY_TOKEN_HEADER: &str = "x-api-key";

/// Largest HTTP body snippet kept for diagnostics.
const SNIPPET_LIMIT: usize = 512;

/// One concrete way to reach an SSE server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Stream URL, with the token already in the query when placed there.
    pub url: String,
    /// Token sent as `Authorization: Bearer`.
    pub bearer: Option<String>,
    /// Value for the secondary API key header.
    pub secondary: Option<String>,
}

impl Endpoint {
    /// Request headers for this endpoint.
    pub fn headers(&self) -> Result<HeaderMap, McpError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.bearer {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| McpError::build(format!("Invalid token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }
        if let Some(key) = &self.secondary {
            let value = HeaderValue::from_str(key)
                .map_err(|e| McpError::build(format!("Invalid secondary token: {}", e)))?;
            headers.insert(SECONDARY_TOKEN_HEADER, value);
        }
        Ok(headers)
    }

    /// URL with any query token removed, safe to log or display.
    pub fn display_url(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut url) => {
                let kept: Vec<(String, String)> = url
                    .query_pairs()
                    .filter(|(k, _)| k != "token")
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                if kept.is_empty() {
                    url.set_query(None);
                } else {
                    url.query_pairs_mut().clear().extend_pairs(kept);
                }
                url.to_string()
            }
            Err(_) => self.url.clone(),
        }
    }
}

/// A constructed, not yet negotiated, channel to a tool server.
pub enum Transport {
    /// Spawned child process and its captured stderr.
    Stdio {
        process: TokioChildProcess,
        stderr: Option<ChildStderr>,
    },

    /// Legacy SSE endpoint; the stream is opened during the handshake.
    Sse {
        client: reqwest::Client,
        endpoint: Endpoint,
    },

    /// Streamable HTTP.
    Http {
        transport: StreamableHttpClientTransport<reqwest::Client>,
        url: String,
    },

    /// The child could not be spawned; reported when negotiation starts.
    SpawnFailed(McpError),
}

impl Transport {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } | Self::SpawnFailed(_) => "stdio",
            Self::Sse { .. } => "sse",
            Self::Http { .. } => "http",
        }
    }

    /// Network URL actually used, if any.
    pub fn effective_url(&self) -> Option<String> {
        match self {
            Self::Sse { endpoint, .. } => Some(endpoint.display_url()),
            Self::Http { url, .. } => Some(url.clone()),
            Self::Stdio { .. } | Self::SpawnFailed(_) => None,
        }
    }
}

/// Build a transport for `config`. Network configs use `endpoint` when
/// given (the preflight winner) and the first candidate otherwise.
pub fn build(
    config: &ServerConfig,
    endpoint: Option<Endpoint>,
    connect_timeout: Duration,
) -> Result<Transport, McpError> {
    match &config.transport {
        TransportConfig::Stdio {
            command,
            args,
            env,
            cwd,
        } => {
            let mut cmd = Command::new(command);
            cmd.args(args).envs(env).kill_on_drop(true);
            if let Some(dir) = cwd {
                cmd.current_dir(dir);
            }

            debug!(mcp.server = %config.id, command = %command, ?args, "Spawning MCP server");
            match TokioChildProcess::builder(cmd).stderr(Stdio::piped()).spawn() {
                Ok((process, stderr)) => Ok(Transport::Stdio { process, stderr }),
                Err(e) => Ok(Transport::SpawnFailed(McpError::transport(format!(
                    "Failed to spawn '{}': {}",
                    command, e
                )))),
            }
        }

        TransportConfig::Sse { .. } => {
            let endpoint = match endpoint {
                Some(endpoint) => endpoint,
                None => endpoint_candidates(config)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| McpError::build("No usable SSE endpoint"))?,
            };
            Ok(Transport::Sse {
                client: http_client(connect_timeout)?,
                endpoint,
            })
        }

        TransportConfig::Http { url, .. } => {
            let url = url.trim().to_string();
            let mut transport_config = StreamableHttpClientTransportConfig::with_uri(url.clone());
            if let Some(token) = config.expanded_token().filter(|t| !t.is_empty()) {
                transport_config = transport_config.auth_header(token);
            }
            let transport =
                StreamableHttpClientTransport::with_client(http_client(connect_timeout)?, transport_config);
            Ok(Transport::Http { transport, url })
        }
    }
}

fn http_client(connect_timeout: Duration) -> Result<reqwest::Client, McpError> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| McpError::build(format!("Failed to build HTTP client: {}", e)))
}

/// Parse `raw` and give it the default stream path when the path is empty
/// or `/`.
pub fn normalize_sse_url(raw: &str) -> Result<Url, McpError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| McpError::build(format!("Invalid url '{}': {}", raw, e)))?;
    if url.path().is_empty() || url.path() == "/" {
        url.set_path(DEFAULT_SSE_PATH);
    }
    Ok(url)
}

/// Ordered connection candidates for an SSE config:
///
/// 1. the normalized URL, token as a bearer header;
/// 2. the URL with `/sse` appended, when the given path is neither root nor
///    already `/sse`;
/// 3. the normalized URL with the token as a `token` query parameter.
pub fn endpoint_candidates(config: &ServerConfig) -> Result<Vec<Endpoint>, McpError> {
    let TransportConfig::Sse { url, .. } = &config.transport else {
        return Ok(Vec::new());
    };

    let token = config.expanded_token().filter(|t| !t.is_empty());
    let secondary = config.expanded_secondary_token().filter(|t| !t.is_empty());
    let normalized = normalize_sse_url(url)?;

    let mut candidates = vec![Endpoint {
        url: normalized.to_string(),
        bearer: token.clone(),
        secondary: secondary.clone(),
    }];

    let path = normalized.path().trim_end_matches('/');
    if !path.is_empty() && !path.ends_with(DEFAULT_SSE_PATH) {
        let mut appended = normalized.clone();
        appended.set_path(&format!("{}{}", path, DEFAULT_SSE_PATH));
        candidates.push(Endpoint {
            url: appended.to_string(),
            bearer: token.clone(),
            secondary: secondary.clone(),
        });
    }

    if let Some(token) = token {
        let mut with_query = normalized;
        with_query.query_pairs_mut().append_pair("token", &token);
        candidates.push(Endpoint {
            url: with_query.to_string(),
            bearer: None,
            secondary,
        });
    }

    Ok(candidates)
}

/// Whether a `Content-Type` names an event stream.
pub fn is_event_stream(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

/// Probe candidates in order and return the first that answers with an
/// event stream (or `405`, a POST-only endpoint). Failure of every
/// candidate is a single transport error; HTTP body snippets go to
/// `diagnostics`.
pub async fn preflight(
    candidates: &[Endpoint],
    timeout: Duration,
    diagnostics: &DiagnosticBuffer,
) -> Result<Endpoint, McpError> {
    let client = http_client(timeout)?;
    let mut failures = Vec::new();

    for candidate in candidates {
        let shown = candidate.display_url();
        match probe(&client, candidate, timeout, diagnostics).await {
            Ok(()) => {
                debug!(url = %shown, "SSE preflight succeeded");
                return Ok(candidate.clone());
            }
            Err(reason) => {
                debug!(url = %shown, %reason, "SSE preflight candidate failed");
                failures.push(format!("{} ({})", shown, reason));
            }
        }
    }

    Err(McpError::transport(format!(
        "No SSE endpoint responded: {}",
        failures.join("; ")
    )))
}

async fn probe(
    client: &reqwest::Client,
    endpoint: &Endpoint,
    timeout: Duration,
    diagnostics: &DiagnosticBuffer,
) -> Result<(), String> {
    let headers = endpoint.headers().map_err(|e| e.to_string())?;
    let request = client
        .get(&endpoint.url)
        .headers(headers)
        .header(ACCEPT, "text/event-stream")
        .send();

    let response = match tokio::time::timeout(timeout, request).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => return Err(e.to_string()),
        Err(_) => return Err(format!("timeout after {}ms", timeout.as_millis())),
    };

    let status = response.status();
    if status == StatusCode::METHOD_NOT_ALLOWED {
        return Ok(());
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if status.is_success() && is_event_stream(&content_type) {
        // Dropping the response closes the probe stream.
        return Ok(());
    }

    if !status.is_success() {
        if let Ok(Ok(body)) = tokio::time::timeout(timeout, response.text()).await {
            let snippet = truncate(body.trim(), SNIPPET_LIMIT);
            if !snippet.is_empty() {
                diagnostics.append(&format!("HTTP {}: {}\n", status.as_u16(), snippet));
            }
        }
        return Err(format!("HTTP {}", status));
    }

    Err(format!("unexpected content type '{}'", content_type))
}

fn truncate(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_root_path() {
        assert_eq!(normalize_sse_url("https://host/").unwrap().as_str(), "https://host/sse");
        assert_eq!(normalize_sse_url("https://host").unwrap().as_str(), "https://host/sse");
        assert_eq!(
            normalize_sse_url("https://host/mcp").unwrap().as_str(),
            "https://host/mcp"
        );
        assert!(matches!(
            normalize_sse_url("::nope"),
            Err(McpError::TransportBuild(_))
        ));
    }

    #[test]
    fn test_candidates_without_token() {
        let config = ServerConfig::sse("t2", "remote", "https://host/");
        let candidates = endpoint_candidates(&config).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "https://host/sse");
        assert!(candidates[0].bearer.is_none());
    }

    #[test]
    fn test_candidates_order_with_token() {
        let config = ServerConfig::sse("t", "remote", "https://host/api").with_token("abc");
        let candidates = endpoint_candidates(&config).unwrap();
        let urls: Vec<&str> = candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://host/api",
                "https://host/api/sse",
                "https://host/api?token=abc"
            ]
        );
        assert_eq!(candidates[0].bearer.as_deref(), Some("abc"));
        assert_eq!(candidates[1].bearer.as_deref(), Some("abc"));
        assert!(candidates[2].bearer.is_none());
        assert_eq!(candidates[2].display_url(), "https://host/api");
    }

    #[test]
    fn test_candidates_skip_existing_sse_suffix() {
        let config = ServerConfig::sse("t", "remote", "https://host/v1/sse/");
        let candidates = endpoint_candidates(&config).unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_endpoint_headers() {
        let endpoint = Endpoint {
            url: "https://host/sse".to_string(),
            bearer: Some("abc".to_string()),
            secondary: Some("key".to_string()),
        };
        let headers = endpoint.headers().unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
        assert_eq!(headers.get(SECONDARY_TOKEN_HEADER).unwrap(), "key");
    }

    #[test]
    fn test_event_stream_content_type() {
        assert!(is_event_stream("text/event-stream"));
        assert!(is_event_stream("Text/Event-Stream; charset=utf-8"));
        assert!(!is_event_stream("application/json"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[tokio::test]
    async fn test_build_reports_spawn_failure_lazily() {
        let config = ServerConfig::stdio("t1", "missing", "toolbridge-definitely-missing-bin");
        let transport = build(&config, None, Duration::from_secs(1)).unwrap();
        match transport {
            Transport::SpawnFailed(err) => {
                assert!(err.to_string().contains("toolbridge-definitely-missing-bin"))
            }
            _ => panic!("expected deferred spawn failure"),
        }
    }

    #[tokio::test]
    async fn test_build_sse_uses_first_candidate() {
        let config = ServerConfig::sse("t2", "remote", "https://host/");
        let transport = build(&config, None, Duration::from_secs(1)).unwrap();
        assert_eq!(transport.kind(), "sse");
        assert_eq!(transport.effective_url().as_deref(), Some("https://host/sse"));
    }

    #[tokio::test]
    async fn test_preflight_all_candidates_fail() {
        // Port 9 on localhost is reserved and refuses connections.
        let candidates = vec![Endpoint {
            url: "http://127.0.0.1:9/sse".to_string(),
            bearer: None,
            secondary: None,
        }];
        let buffer = DiagnosticBuffer::new();
        let err = preflight(&candidates, Duration::from_secs(2), &buffer)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
        assert!(err.to_string().contains("127.0.0.1:9"));
    }
}

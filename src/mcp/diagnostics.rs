// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Failure classification for connection attempts.
//!
//! Raw failure text is matched against an ordered rule table,
//! case-insensitively; the first matching rule decides the suggestion.
//! Markers match whole words only, and HTTP status codes only in a
//! status-shaped phrase, so ports and ids inside URLs never match.

use chrono::{DateTime, Utc};

use super::config::ServerConfig;
use super::error::ConnectionError;

/// Category a raw failure falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Timeout,
    CommandNotFound,
    ProcessExited,
    MalformedPackage,
    Unauthorized,
    EndpointNotFound,
    Unknown,
}

struct Rule {
    kind: DiagnosticKind,
    markers: &'static [&'static str],
    stdio_only: bool,
    network_only: bool,
}

const RULES: &[Rule] = &[
    Rule {
        kind: DiagnosticKind::Timeout,
        markers: &["timeout", "timed out"],
        stdio_only: false,
        network_only: false,
    },
    Rule {
        kind: DiagnosticKind::CommandNotFound,
        markers: &["not found", "enoent", "no such file", "cannot find"],
        stdio_only: true,
        network_only: false,
    },
    Rule {
        kind: DiagnosticKind::ProcessExited,
        markers: &[
            "stream closed",
            "connection closed",
            "unexpected eof",
            "eof",
            "broken pipe",
            "exited",
        ],
        stdio_only: false,
        network_only: false,
    },
    Rule {
        kind: DiagnosticKind::MalformedPackage,
        markers: &["invalid version", "malformed package", "invalid package name"],
        stdio_only: false,
        network_only: false,
    },
    Rule {
        kind: DiagnosticKind::Unauthorized,
        markers: &[
            "http 401",
            "http 403",
            "status 401",
            "status 403",
            "unauthorized",
            "forbidden",
        ],
        stdio_only: false,
        network_only: false,
    },
    Rule {
        kind: DiagnosticKind::EndpointNotFound,
        markers: &["http 404", "status 404", "not found"],
        stdio_only: false,
        network_only: true,
    },
];

impl DiagnosticKind {
    /// Match raw failure text against the rule table.
    pub fn detect(message: &str, config: &ServerConfig) -> Self {
        let haystack = message.to_lowercase();
        let stdio = config.is_stdio();

        RULES
            .iter()
            .filter(|rule| !(rule.stdio_only && !stdio) && !(rule.network_only && stdio))
            .find(|rule| rule.markers.iter().any(|m| contains_word(&haystack, m)))
            .map(|rule| rule.kind)
            .unwrap_or(DiagnosticKind::Unknown)
    }

    pub fn suggestion(self, config: &ServerConfig) -> String {
        match self {
            Self::Timeout => {
                "The server took too long to respond. Retry later or check the network connection."
                    .to_string()
            }
            Self::CommandNotFound => format!(
                "Command '{}' could not be found. Check that it is installed and on PATH.",
                config.command().unwrap_or_default()
            ),
            Self::ProcessExited => {
                "The server exited unexpectedly. Inspect the captured diagnostic output and verify the arguments."
                    .to_string()
            }
            Self::MalformedPackage => {
                "The package identifier is malformed. Check its format (e.g. mcp-server-time or @modelcontextprotocol/server-time)."
                    .to_string()
            }
            Self::Unauthorized => {
                "The server rejected the credentials. Check the access token.".to_string()
            }
            Self::EndpointNotFound => format!(
                "No tool server answered at '{}'. Check the server URL.",
                config.url().unwrap_or_default()
            ),
            Self::Unknown => {
                if config.is_stdio() {
                    "Check the command and arguments, then retry.".to_string()
                } else {
                    "Check the server configuration, then retry.".to_string()
                }
            }
        }
    }
}

/// Whether `marker` occurs in `haystack` with no letter or digit directly
/// on either side.
fn contains_word(haystack: &str, marker: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric();
    haystack.match_indices(marker).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + marker.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

/// Suggestion for a raw failure message. Deterministic.
pub fn suggest(message: &str, config: &ServerConfig) -> String {
    DiagnosticKind::detect(message, config).suggestion(config)
}

/// Build the terminal error for a failed connect, stamped with `timestamp`.
pub fn classify_at(
    message: &str,
    config: &ServerConfig,
    diagnostic_text: Option<String>,
    attempts: u32,
    timestamp: DateTime<Utc>,
) -> ConnectionError {
    let message = if message.trim().is_empty() {
        "Unknown connection error".to_string()
    } else {
        message.to_string()
    };
    ConnectionError {
        suggestion: suggest(&message, config),
        message,
        diagnostic_text: diagnostic_text.filter(|text| !text.trim().is_empty()),
        timestamp,
        attempts,
    }
}

/// Build the terminal error for a failed connect, stamped now.
pub fn classify(
    message: &str,
    config: &ServerConfig,
    diagnostic_text: Option<String>,
    attempts: u32,
) -> ConnectionError {
    classify_at(message, config, diagnostic_text, attempts, Utc::now())
}

/// Build the terminal error for a stored record that does not parse into a
/// server config. No attempt was made.
pub fn classify_record(message: &str) -> ConnectionError {
    ConnectionError {
        message: message.to_string(),
        diagnostic_text: None,
        suggestion: "Check the server configuration and try again.".to_string(),
        timestamp: Utc::now(),
        attempts: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio() -> ServerConfig {
        ServerConfig::stdio("t1", "test", "nonexistent-bin")
    }

    fn sse() -> ServerConfig {
        ServerConfig::sse("t2", "remote", "https://host/sse")
    }

    #[test]
    fn test_rule_order() {
        // "timeout" wins over "not found" when both appear.
        assert_eq!(
            DiagnosticKind::detect("Connection timeout: server not found", &stdio()),
            DiagnosticKind::Timeout
        );
        assert_eq!(
            DiagnosticKind::detect("spawn nonexistent-bin ENOENT", &stdio()),
            DiagnosticKind::CommandNotFound
        );
        assert_eq!(
            DiagnosticKind::detect("No such file or directory (os error 2)", &stdio()),
            DiagnosticKind::CommandNotFound
        );
        assert_eq!(
            DiagnosticKind::detect("MCP error -32000: Connection closed", &stdio()),
            DiagnosticKind::ProcessExited
        );
        assert_eq!(
            DiagnosticKind::detect("npm error Invalid Version request", &stdio()),
            DiagnosticKind::MalformedPackage
        );
    }

    #[test]
    fn test_not_found_depends_on_transport() {
        assert_eq!(
            DiagnosticKind::detect("HTTP 404 Not Found", &sse()),
            DiagnosticKind::EndpointNotFound
        );
        assert_eq!(
            DiagnosticKind::detect("HTTP 401 Unauthorized", &sse()),
            DiagnosticKind::Unauthorized
        );
        assert_eq!(
            DiagnosticKind::detect("HTTP 403 Forbidden", &sse()),
            DiagnosticKind::Unauthorized
        );
    }

    #[test]
    fn test_status_codes_in_urls_do_not_match() {
        let refused = "No SSE endpoint responded: http://127.0.0.1:4010/sse (error sending request for url (http://127.0.0.1:4010/sse))";
        assert_eq!(DiagnosticKind::detect(refused, &sse()), DiagnosticKind::Unknown);
        assert!(suggest(refused, &sse()).contains("configuration"));

        assert_eq!(
            DiagnosticKind::detect("GET https://tools.example.com/404/sse failed: HTTP 502 Bad Gateway", &sse()),
            DiagnosticKind::Unknown
        );
        assert_eq!(
            DiagnosticKind::detect("No SSE endpoint responded: https://host/sse (HTTP 401 Unauthorized)", &sse()),
            DiagnosticKind::Unauthorized
        );
        assert_eq!(
            DiagnosticKind::detect("request to https://host/sse failed with status 403", &sse()),
            DiagnosticKind::Unauthorized
        );
    }

    #[test]
    fn test_markers_match_whole_words() {
        assert_eq!(
            DiagnosticKind::detect("dns error for geofence.example", &sse()),
            DiagnosticKind::Unknown
        );
        assert_eq!(
            DiagnosticKind::detect("read failed: EOF", &stdio()),
            DiagnosticKind::ProcessExited
        );
        assert_eq!(
            DiagnosticKind::detect("process exited with code 1", &stdio()),
            DiagnosticKind::ProcessExited
        );
    }

    #[test]
    fn test_suggestions_reference_config() {
        let text = suggest("spawn ENOENT", &stdio());
        assert!(text.contains("nonexistent-bin"));
        assert!(text.contains("installed"));

        let text = suggest("HTTP 404 Not Found", &sse());
        assert!(text.contains("https://host/sse"));

        assert!(suggest("weird", &stdio()).contains("command"));
        assert!(suggest("weird", &sse()).contains("configuration"));
    }

    #[test]
    fn test_classify_is_deterministic() {
        let at = Utc::now();
        let a = classify_at("Connection closed", &stdio(), Some("boom\n".to_string()), 3, at);
        let b = classify_at("Connection closed", &stdio(), Some("boom\n".to_string()), 3, at);
        assert_eq!(a.suggestion, b.suggestion);
        assert_eq!(a.timestamp, b.timestamp);
        assert_eq!(a.diagnostic_text.as_deref(), Some("boom\n"));
        assert_eq!(a.attempts, 3);
    }

    #[test]
    fn test_classify_record() {
        let err = classify_record("args must be an array");
        assert_eq!(err.attempts, 0);
        assert!(err.diagnostic_text.is_none());
        assert!(err.suggestion.contains("configuration"));
    }

    #[test]
    fn test_classify_empty_inputs() {
        let err = classify("", &stdio(), Some("   ".to_string()), 1);
        assert_eq!(err.message, "Unknown connection error");
        assert!(err.diagnostic_text.is_none());
    }
}

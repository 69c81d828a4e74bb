// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool plumbing between the model and connected tool servers.
//!
//! - [`ToolHandler`] - a callable tool handle
//! - [`ToolRegistry`] - maps tool names to handles, dispatches calls
//!
//! Handles come from the capability bridge in [`crate::mcp::tools`]; the
//! chat pipeline builds a registry from them per request.
//!
//! ```rust,ignore
//! use toolbridge::tools::ToolRegistry;
//!
//! let registry = ToolRegistry::from_handlers(tools_for_active_sessions(&supervisor).await);
//! let result = registry.dispatch("mcp__time_get_current_time", json!({})).await?;
//! ```

pub mod registry;

pub use registry::{DispatchResult, ToolHandler, ToolOutput, ToolRegistry};

/// Tool output longer than this is cut before it is fed back to the model.
pub const MAX_TOOL_OUTPUT_BYTES: usize = 64 * 1024;

/// Truncate text to a maximum byte length, respecting UTF-8 boundaries.
pub fn truncate_text(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }

    if end == 0 {
        return String::new();
    }

    format!("{}... [truncated]", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_short() {
        let text = "Hello, world!";
        assert_eq!(truncate_text(text, 100), text);
    }

    #[test]
    fn test_truncate_text_long() {
        let text = "Hello, world!";
        let truncated = truncate_text(text, 5);
        assert!(truncated.starts_with("Hello"));
        assert!(truncated.contains("truncated"));
    }

    #[test]
    fn test_truncate_text_utf8() {
        let text = "こんにちは"; // 15 bytes
        let truncated = truncate_text(text, 6);
        assert!(truncated.starts_with("こん"));
    }
}

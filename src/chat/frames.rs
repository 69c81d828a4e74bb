// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Event framing of the streamed chat response.
//!
//! Every frame is one `data: <json>` line followed by a blank line. The
//! payload is one of `{"text": ...}`, `{"functionCall": {"name", "args"}}`
//! or `{"done": true}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::sse::SseDecoder;

/// Prefix of every frame line.
pub const FRAME_PREFIX: &str = "data: ";

/// Function call announced by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallFrame {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// One streamed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatFrame {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCallFrame,
    },
    Done {
        done: bool,
    },
}

impl ChatFrame {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn function_call(name: impl Into<String>, args: Value) -> Self {
        Self::FunctionCall {
            function_call: FunctionCallFrame {
                name: name.into(),
                args,
            },
        }
    }

    pub fn done() -> Self {
        Self::Done { done: true }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { done: true })
    }

    /// JSON payload of this frame.
    pub fn payload(&self) -> Value {
        match self {
            Self::Text { text } => json!({ "text": text }),
            Self::FunctionCall { function_call } => json!({
                "functionCall": { "name": function_call.name, "args": function_call.args }
            }),
            Self::Done { done } => json!({ "done": done }),
        }
    }

    /// Wire form: `data: <json>\n\n`.
    pub fn encode(&self) -> String {
        format!("{}{}\n\n", FRAME_PREFIX, self.payload())
    }
}

/// Incremental decoder for a framed chat stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    inner: SseDecoder,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every complete frame. Payloads that are not a
    /// recognized shape are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ChatFrame> {
        self.inner
            .push(chunk)
            .into_iter()
            .filter_map(|event| parse_payload(&event.data))
            .collect()
    }

    /// Flush a trailing frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<ChatFrame> {
        self.inner.finish().and_then(|event| parse_payload(&event.data))
    }
}

fn parse_payload(data: &str) -> Option<ChatFrame> {
    match serde_json::from_str::<ChatFrame>(data) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, payload = %data, "Skipping unrecognized chat frame");
            None
        }
    }
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Streaming chat request pipeline.
//!
//! A request is streamed to the model as [`ChatFrame`]s. With tools enabled,
//! every connected server's tools are offered to the model; function calls
//! run through the capability bridge and their results go back to the model
//! for up to [`MAX_TOOL_ROUNDS`] rounds.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::frames::ChatFrame;
use super::ChatError;
use crate::mcp::{tools_for_active_sessions, FunctionCallEvent, Supervisor, ToolCallRelay};
use crate::tools::{truncate_text, ToolRegistry, MAX_TOOL_OUTPUT_BYTES};
use crate::types::{
    ContentBlock, Message, Role, SharedProvider, StreamCallback, StreamEvent, TokenUsage,
};

/// Most tool rounds per request.
pub const MAX_TOOL_ROUNDS: usize = 4;

/// One turn of prior conversation as the UI stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

impl HistoryMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Anything other than `user` is treated as the model's turn.
    pub fn to_message(&self) -> Message {
        if self.role == "user" {
            Message::user(&self.content)
        } else {
            Message::assistant(&self.content)
        }
    }
}

/// A chat request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    /// Offer tool server tools to the model for this request.
    #[serde(default)]
    pub enable_tools: bool,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<HistoryMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_tools(mut self, enable: bool) -> Self {
        self.enable_tools = enable;
        self
    }
}

/// What a finished request produced.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    /// Concatenated model text over all rounds.
    pub text: String,
    /// Finished function calls, in execution order.
    pub function_calls: Vec<FunctionCallEvent>,
    /// Tool rounds executed.
    pub tool_rounds: usize,
    pub usage: TokenUsage,
}

/// Sends frames and guarantees exactly one trailing `done` frame.
struct FrameSink {
    tx: mpsc::UnboundedSender<ChatFrame>,
    finished: bool,
}

impl FrameSink {
    fn new(tx: mpsc::UnboundedSender<ChatFrame>) -> Self {
        Self { tx, finished: false }
    }

    fn sender(&self) -> mpsc::UnboundedSender<ChatFrame> {
        self.tx.clone()
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            // The receiver may be gone; nothing left to notify then.
            let _ = self.tx.send(ChatFrame::done());
        }
    }
}

impl Drop for FrameSink {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Streams chat requests through the provider, optionally with tools.
pub struct ChatPipeline {
    provider: SharedProvider,
    supervisor: Arc<Supervisor>,
    system_prompt: Option<String>,
}

impl ChatPipeline {
    pub fn new(provider: SharedProvider, supervisor: Arc<Supervisor>) -> Self {
        Self {
            provider,
            supervisor,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Run a request, sending frames to `frames` and finished function calls
    /// to `calls`. A `done` frame is sent exactly once, whether the request
    /// succeeds or fails.
    #[instrument(skip_all, fields(tools = request.enable_tools))]
    pub async fn run(
        &self,
        request: &ChatRequest,
        frames: mpsc::UnboundedSender<ChatFrame>,
        calls: Option<mpsc::UnboundedSender<FunctionCallEvent>>,
    ) -> Result<ChatOutcome, ChatError> {
        let mut sink = FrameSink::new(frames);
        let result = self.run_rounds(request, &sink, calls).await;
        if let Err(e) = &result {
            warn!(error = %e, "Chat request failed");
        }
        sink.finish();
        result
    }

    async fn run_rounds(
        &self,
        request: &ChatRequest,
        sink: &FrameSink,
        calls: Option<mpsc::UnboundedSender<FunctionCallEvent>>,
    ) -> Result<ChatOutcome, ChatError> {
        if request.message.trim().is_empty() {
            return Err(ChatError::InvalidMessage);
        }

        let handlers = if request.enable_tools {
            tools_for_active_sessions(&self.supervisor).await
        } else {
            Vec::new()
        };
        let mut relay = ToolCallRelay::new(ToolRegistry::from_handlers(handlers));
        if let Some(calls) = calls {
            relay = relay.with_events(calls);
        }
        let definitions = relay.registry().definitions();
        let tools = (!definitions.is_empty()).then_some(definitions.as_slice());

        let mut messages: Vec<Message> = request.history.iter().map(HistoryMessage::to_message).collect();
        messages.push(Message::user(&request.message));

        let mut outcome = ChatOutcome::default();
        for round in 0..=MAX_TOOL_ROUNDS {
            let response = self
                .provider
                .stream_chat(&messages, tools, self.system_prompt.as_deref(), frame_callback(sink))
                .await?;

            outcome.text.push_str(&response.content);
            if let Some(usage) = &response.usage {
                outcome.usage.input_tokens += usage.input_tokens;
                outcome.usage.output_tokens += usage.output_tokens;
            }

            if tools.is_none() || !response.has_tool_calls() {
                break;
            }
            if round == MAX_TOOL_ROUNDS {
                info!(rounds = round, "Tool round limit reached");
                break;
            }

            let mut assistant = Vec::new();
            if !response.content.is_empty() {
                assistant.push(ContentBlock::text(&response.content));
            }
            let mut results = Vec::new();
            for call in &response.tool_calls {
                assistant.push(ContentBlock::tool_use(&call.id, &call.name, call.input.clone()));
                let event = relay.invoke(call).await;
                let output = truncate_text(event.output.as_deref().unwrap_or_default(), MAX_TOOL_OUTPUT_BYTES);
                results.push(ContentBlock::tool_result(
                    &call.id,
                    &call.name,
                    output,
                    event.status != crate::mcp::FunctionCallStatus::Success,
                ));
                outcome.function_calls.push(event);
            }
            messages.push(Message::with_blocks(Role::Assistant, assistant));
            messages.push(Message::with_blocks(Role::User, results));
            outcome.tool_rounds = round + 1;
            debug!(round = outcome.tool_rounds, calls = response.tool_calls.len(), "Tool round finished");
        }

        Ok(outcome)
    }
}

/// Forward text and function call stream events as frames.
fn frame_callback(sink: &FrameSink) -> StreamCallback {
    let tx = sink.sender();
    Box::new(move |event| {
        let frame = match event {
            StreamEvent::TextDelta(text) if !text.is_empty() => ChatFrame::text(text),
            StreamEvent::FunctionCall(call) => ChatFrame::function_call(call.name, call.input),
            _ => return,
        };
        let _ = tx.send(frame);
    })
}

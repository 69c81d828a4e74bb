// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Google Gemini provider implementation.
//!
//! Talks to the Generative Language REST API:
//!
//! - `models/{model}:streamGenerateContent?alt=sse` for streaming chat
//! - `models/{model}:generateContent` for chat and one-shot completions
//!
//! Tool definitions are sent as `functionDeclarations`; the model's
//! `functionCall` parts surface as [`StreamEvent::FunctionCall`].

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

use tracing::debug;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use crate::error::ProviderError;
use crate::sse::SseDecoder;
use crate::types::{
    CompletionOptions, ContentBlock, Message, Provider, ProviderConfig, ProviderResponse, Role,
    StopReason, StreamCallback, StreamEvent, TokenUsage, ToolCall, ToolDefinition,
};

/// Default Gemini API base URL.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-001";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Gemini provider.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl GeminiProvider {
    /// Create a new Gemini provider. Missing config values take the
    /// defaults above.
    pub fn new(api_key: impl Into<String>, config: ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured(format!("{} is not set", API_KEY_ENV)));
        }

        let timeout = config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model: config.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: config
                .base_url
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        })
    }

    /// Create a provider from `GEMINI_API_KEY`.
    pub fn from_env(config: ProviderConfig) -> Result<Self, ProviderError> {
        let key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .ok_or_else(|| ProviderError::NotConfigured(format!("{} is not set", API_KEY_ENV)))?;
        Self::new(key, config)
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        system_prompt: Option<&str>,
        options: CompletionOptions,
    ) -> GenerateRequest {
        let tools = tools
            .filter(|t| !t.is_empty())
            .map(|defs| {
                vec![GeminiTool {
                    function_declarations: defs.iter().map(FunctionDeclaration::from).collect(),
                }]
            });

        GenerateRequest {
            contents: messages.iter().map(GeminiContent::from).collect(),
            system_instruction: system_prompt.map(|text| GeminiContent {
                role: None,
                parts: vec![Part::text(text)],
            }),
            tools,
            generation_config: GenerationConfig {
                temperature: options.temperature.unwrap_or(self.temperature),
                max_output_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            },
        }
    }

    async fn post(&self, url: &str, request: &GenerateRequest) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(DEFAULT_TIMEOUT_SECS * 1000)
                } else {
                    ProviderError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(handle_error_response(status.as_u16(), &body));
        }
        Ok(response)
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ProviderResponse, ProviderError> {
        let response = self.post(&self.endpoint("generateContent"), request).await?;
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let mut state = StreamState::default();
        state.apply(&body, &|_| {});
        Ok(state.into_response())
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        system_prompt: Option<&str>,
    ) -> Result<ProviderResponse, ProviderError> {
        let request = self.build_request(messages, tools, system_prompt, CompletionOptions::default());
        let start = Instant::now();
        debug!(model = %self.model, messages = messages.len(), "Sending chat request");

        let response = self.generate(&request).await;
        record(start, "gemini.chat", &response);
        response
    }

    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        system_prompt: Option<&str>,
        on_event: StreamCallback,
    ) -> Result<ProviderResponse, ProviderError> {
        let request = self.build_request(messages, tools, system_prompt, CompletionOptions::default());
        let start = Instant::now();
        debug!(model = %self.model, messages = messages.len(), "Sending streaming chat request");

        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self.post(&url, &request).await?;

        let mut stream = Box::pin(response.bytes_stream());
        let mut decoder = SseDecoder::new();
        let mut state = StreamState::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ProviderError::StreamError(e.to_string()))?;
            for event in decoder.push(&chunk) {
                state.apply_data(&event.data, &on_event)?;
            }
        }
        if let Some(event) = decoder.finish() {
            state.apply_data(&event.data, &on_event)?;
        }

        let response = state.into_response();
        on_event(StreamEvent::Usage(response.usage.clone().unwrap_or_default()));
        on_event(StreamEvent::Done(response.stop_reason));

        let response = Ok(response);
        record(start, "gemini.stream_chat", &response);
        response
    }

    async fn complete(&self, prompt: &str, options: CompletionOptions) -> Result<String, ProviderError> {
        let request = self.build_request(&[Message::user(prompt)], None, None, options);
        let start = Instant::now();
        let response = self.generate(&request).await;
        record(start, "gemini.complete", &response);
        Ok(response?.content)
    }

    fn supports_tool_use(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "Gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(feature = "telemetry")]
fn record(start: Instant, operation: &str, response: &Result<ProviderResponse, ProviderError>) {
    GLOBAL_METRICS.record_operation(operation, start.elapsed());
    if let Ok(ProviderResponse { usage: Some(usage), .. }) = response {
        GLOBAL_METRICS.record_tokens(usage.input_tokens as u64, usage.output_tokens as u64);
    }
}

#[cfg(not(feature = "telemetry"))]
fn record(_start: Instant, _operation: &str, _response: &Result<ProviderResponse, ProviderError>) {}

/// Map an error response to a [`ProviderError`].
fn handle_error_response(status_code: u16, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());

    match status_code {
        401 | 403 => ProviderError::AuthError(message),
        429 => ProviderError::RateLimited(message),
        404 => ProviderError::ModelNotFound(message),
        400 if message.contains("API key") || message.contains("API_KEY") => {
            ProviderError::AuthError(message)
        }
        _ => ProviderError::api(message, status_code),
    }
}

/// Accumulates a (possibly streamed) response.
#[derive(Debug, Default)]
struct StreamState {
    content: String,
    tool_calls: Vec<ToolCall>,
    stop_reason: Option<StopReason>,
    usage: Option<TokenUsage>,
}

impl StreamState {
    fn apply_data(
        &mut self,
        data: &str,
        on_event: &(dyn Fn(StreamEvent) + Send + Sync),
    ) -> Result<(), ProviderError> {
        if data.trim().is_empty() {
            return Ok(());
        }
        let chunk: GenerateResponse =
            serde_json::from_str(data).map_err(|e| ProviderError::ParseError(e.to_string()))?;
        if let Some(error) = chunk.error {
            return Err(ProviderError::StreamError(error.message));
        }
        self.apply(&chunk, on_event);
        Ok(())
    }

    fn apply(&mut self, chunk: &GenerateResponse, on_event: &(dyn Fn(StreamEvent) + Send + Sync)) {
        if let Some(usage) = &chunk.usage_metadata {
            self.usage = Some(TokenUsage {
                input_tokens: usage.prompt_token_count,
                output_tokens: usage.candidates_token_count,
            });
        }

        let Some(candidate) = chunk.candidates.first() else {
            return;
        };

        for part in candidate.content.iter().flat_map(|c| c.parts.iter()) {
            if let Some(text) = part.text.as_deref().filter(|t| !t.is_empty()) {
                self.content.push_str(text);
                on_event(StreamEvent::TextDelta(text.to_string()));
            }
            if let Some(call) = &part.function_call {
                let call = ToolCall {
                    id: call
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                    name: call.name.clone(),
                    input: call.args.clone().unwrap_or_else(|| Value::Object(Default::default())),
                };
                on_event(StreamEvent::FunctionCall(call.clone()));
                self.tool_calls.push(call);
            }
        }

        if let Some(reason) = candidate.finish_reason.as_deref() {
            self.stop_reason = Some(match reason {
                "MAX_TOKENS" => StopReason::MaxTokens,
                "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => StopReason::Safety,
                _ => StopReason::EndTurn,
            });
        }
    }

    fn into_response(self) -> ProviderResponse {
        let stop_reason = if self.tool_calls.is_empty() {
            self.stop_reason.unwrap_or(StopReason::EndTurn)
        } else {
            StopReason::ToolUse
        };
        ProviderResponse {
            content: self.content,
            tool_calls: self.tool_calls,
            stop_reason,
            usage: self.usage,
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&ToolDefinition> for FunctionDeclaration {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl From<&Message> for GeminiContent {
    fn from(msg: &Message) -> Self {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "model",
        };
        let parts = msg
            .blocks()
            .into_iter()
            .map(|block| match block {
                ContentBlock::Text { text } => Part::text(text),
                ContentBlock::ToolUse { id, name, input } => Part {
                    function_call: Some(FunctionCall {
                        id: Some(id),
                        name,
                        args: Some(input),
                    }),
                    ..Part::default()
                },
                ContentBlock::ToolResult {
                    name,
                    content,
                    is_error,
                    ..
                } => {
                    let key = if is_error { "error" } else { "content" };
                    let mut response = serde_json::Map::new();
                    response.insert(key.to_string(), Value::String(content));
                    Part {
                        function_response: Some(FunctionResponse {
                            name,
                            response: Value::Object(response),
                        }),
                        ..Part::default()
                    }
                }
            })
            .collect();

        Self {
            role: Some(role.to_string()),
            parts,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn provider() -> GeminiProvider {
        GeminiProvider::new("test-key", ProviderConfig::default()).unwrap()
    }

    fn collect() -> (Arc<Mutex<Vec<StreamEvent>>>, impl Fn(StreamEvent) + Send + Sync) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (events, move |e| sink.lock().unwrap().push(e))
    }

    #[test]
    fn test_defaults() {
        let p = provider();
        assert_eq!(p.model(), DEFAULT_MODEL);
        assert_eq!(p.temperature, 0.7);
        assert_eq!(p.max_tokens, 2048);
        assert_eq!(
            p.endpoint("generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash-001:generateContent"
        );
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        let err = GeminiProvider::new("  ", ProviderConfig::default()).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn test_request_maps_roles_and_tools() {
        let p = provider();
        let messages = vec![Message::user("hi"), Message::assistant("hello")];
        let tools = vec![ToolDefinition::new("mcp__time_now", "Current time")];
        let request = p.build_request(&messages, Some(&tools), Some("be brief"), CompletionOptions::default());
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][1]["role"], "model");
        assert_eq!(value["contents"][1]["parts"][0]["text"], "hello");
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(value["tools"][0]["functionDeclarations"][0]["name"], "mcp__time_now");
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn test_request_without_tools_omits_field() {
        let p = provider();
        let options = CompletionOptions {
            temperature: Some(0.3),
            max_tokens: Some(50),
        };
        let request = p.build_request(&[Message::user("x")], Some(&[]), None, options);
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("tools").is_none());
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 50);
    }

    #[test]
    fn test_tool_round_trip_parts() {
        let msg = Message::with_blocks(
            Role::User,
            vec![ContentBlock::tool_result("c1", "mcp__time_now", "12:00", false)],
        );
        let content = GeminiContent::from(&msg);
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value["parts"][0]["functionResponse"]["name"], "mcp__time_now");
        assert_eq!(value["parts"][0]["functionResponse"]["response"]["content"], "12:00");
    }

    #[test]
    fn test_stream_state_text_and_calls() {
        let (events, sink) = collect();
        let mut state = StreamState::default();
        state
            .apply_data(r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"}]}}]}"#, &sink)
            .unwrap();
        state
            .apply_data(
                r#"{"candidates":[{"content":{"parts":[{"text":"lo"},{"functionCall":{"name":"mcp__time_now","args":{"tz":"UTC"}}}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":5}}"#,
                &sink,
            )
            .unwrap();

        let response = state.into_response();
        assert_eq!(response.content, "Hello");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.tool_calls[0].input, json!({"tz": "UTC"}));
        assert_eq!(response.usage.unwrap().total(), 8);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[2], StreamEvent::FunctionCall(c) if c.name == "mcp__time_now"));
    }

    #[test]
    fn test_stream_error_chunk() {
        let (_events, sink) = collect();
        let mut state = StreamState::default();
        let err = state
            .apply_data(r#"{"error":{"code":500,"message":"backend"}}"#, &sink)
            .unwrap_err();
        assert!(matches!(err, ProviderError::StreamError(m) if m == "backend"));
    }

    #[test]
    fn test_error_mapping() {
        let body = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#;
        assert!(matches!(handle_error_response(400, body), ProviderError::AuthError(_)));
        assert!(matches!(handle_error_response(429, "quota"), ProviderError::RateLimited(_)));
        assert!(matches!(
            handle_error_response(500, "boom"),
            ProviderError::ApiError { status_code: Some(500), .. }
        ));
    }
}

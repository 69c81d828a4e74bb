// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Conversation title summarization.

use tracing::debug;

use super::ChatError;
use crate::types::{CompletionOptions, Provider};

pub const TITLE_TEMPERATURE: f32 = 0.3;
pub const TITLE_MAX_TOKENS: u32 = 50;

/// Characters of the user message used when the model returns nothing.
pub const FALLBACK_TITLE_CHARS: usize = 30;

/// Characters of the assistant reply included in the prompt.
const ASSISTANT_EXCERPT_CHARS: usize = 200;

/// Prompt asking for a 3-5 word title.
pub fn title_prompt(user_message: &str, assistant_message: Option<&str>) -> String {
    match assistant_message {
        Some(reply) => {
            let excerpt: String = reply.chars().take(ASSISTANT_EXCERPT_CHARS).collect();
            format!(
                "Summarize the following conversation as a short title of 3-5 words. \
                 Reply with the title only.\n\nUser: {user_message}\nAI: {excerpt}..."
            )
        }
        None => format!(
            "Summarize the following question as a short title of 3-5 words. \
             Reply with the title only.\n\nQuestion: {user_message}"
        ),
    }
}

/// First characters of the user message.
pub fn fallback_title(user_message: &str) -> String {
    user_message.chars().take(FALLBACK_TITLE_CHARS).collect()
}

/// Ask the model for a short title. An empty answer falls back to the start
/// of the user message; provider failures are returned.
pub async fn summarize_title(
    provider: &dyn Provider,
    user_message: &str,
    assistant_message: Option<&str>,
) -> Result<String, ChatError> {
    if user_message.trim().is_empty() {
        return Err(ChatError::InvalidMessage);
    }

    let options = CompletionOptions {
        temperature: Some(TITLE_TEMPERATURE),
        max_tokens: Some(TITLE_MAX_TOKENS),
    };
    let raw = provider
        .complete(&title_prompt(user_message, assistant_message), options)
        .await?;

    let title = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if title.is_empty() {
        debug!("Model returned an empty title; using the message prefix");
        return Ok(fallback_title(user_message));
    }
    Ok(title.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::types::{Message, ProviderResponse, StreamCallback, ToolDefinition};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedCompletion {
        answer: String,
        options: Mutex<Option<CompletionOptions>>,
    }

    #[async_trait]
    impl Provider for FixedCompletion {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _system_prompt: Option<&str>,
        ) -> Result<ProviderResponse, ProviderError> {
            unimplemented!()
        }

        async fn stream_chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            _system_prompt: Option<&str>,
            _on_event: StreamCallback,
        ) -> Result<ProviderResponse, ProviderError> {
            unimplemented!()
        }

        async fn complete(&self, _prompt: &str, options: CompletionOptions) -> Result<String, ProviderError> {
            *self.options.lock().unwrap() = Some(options);
            Ok(self.answer.clone())
        }

        fn supports_tool_use(&self) -> bool {
            false
        }

        fn name(&self) -> &str {
            "fixed"
        }

        fn model(&self) -> &str {
            "fixed"
        }
    }

    fn provider(answer: &str) -> FixedCompletion {
        FixedCompletion {
            answer: answer.to_string(),
            options: Mutex::new(None),
        }
    }

    #[tokio::test]
    async fn test_title_trimmed_and_sampling_set() {
        let p = provider("  \"Weather in Seoul\"\n");
        let title = summarize_title(&p, "What's the weather in Seoul?", None).await.unwrap();
        assert_eq!(title, "Weather in Seoul");
        let options = p.options.lock().unwrap().unwrap();
        assert_eq!(options.temperature, Some(0.3));
        assert_eq!(options.max_tokens, Some(50));
    }

    #[tokio::test]
    async fn test_empty_answer_falls_back() {
        let p = provider("   ");
        let message = "Explain how the retry delay interacts with handshakes";
        let title = summarize_title(&p, message, Some("It waits.")).await.unwrap();
        assert_eq!(title, "Explain how the retry delay in");
        assert_eq!(title.chars().count(), 30);
    }

    #[test]
    fn test_prompt_truncates_reply() {
        let reply = "x".repeat(500);
        let prompt = title_prompt("q", Some(&reply));
        assert!(prompt.contains(&"x".repeat(200)));
        assert!(!prompt.contains(&"x".repeat(201)));
        assert!(title_prompt("q", None).contains("Question: q"));
    }
}

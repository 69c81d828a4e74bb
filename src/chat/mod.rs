// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Chat request handling: response framing, the streaming pipeline and
//! title summarization.

pub mod frames;
pub mod pipeline;
pub mod title;

pub use frames::{ChatFrame, FrameDecoder, FunctionCallFrame};
pub use pipeline::{ChatOutcome, ChatPipeline, ChatRequest, HistoryMessage, MAX_TOOL_ROUNDS};
pub use title::summarize_title;

use thiserror::Error;

use crate::error::ProviderError;

/// Errors from a chat request.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Invalid message")]
    InvalidMessage,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

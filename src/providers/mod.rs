// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model provider implementations.
//!
//! - [`gemini::GeminiProvider`] - Google Gemini via the Generative Language API
//!
//! # Quick Start
//!
//! ```bash
//! export GEMINI_API_KEY=your-key
//! ```
//!
//! ```rust,ignore
//! use toolbridge::providers::create_provider_from_env;
//!
//! let provider = create_provider_from_env()?;
//! let response = provider.chat(&messages, Some(&tools), None).await?;
//! ```

pub mod gemini;

pub use gemini::GeminiProvider;

use crate::config::ResolvedConfig;
use crate::error::ProviderError;
use crate::types::{BoxedProvider, ProviderConfig};

/// Environment variable overriding the default model.
pub const MODEL_ENV: &str = "TOOLBRIDGE_MODEL";

/// Create a provider from an explicit configuration. The API key falls back
/// to `GEMINI_API_KEY` when the config carries none.
pub fn create_provider(config: ProviderConfig) -> Result<BoxedProvider, ProviderError> {
    Ok(Box::new(GeminiProvider::from_env(config)?))
}

/// Create a provider purely from environment variables.
///
/// ```bash
/// export GEMINI_API_KEY=...
/// export TOOLBRIDGE_MODEL=gemini-2.5-flash   # optional
/// ```
pub fn create_provider_from_env() -> Result<BoxedProvider, ProviderError> {
    let config = ProviderConfig {
        model: std::env::var(MODEL_ENV).ok().filter(|m| !m.is_empty()),
        ..ProviderConfig::default()
    };
    create_provider(config)
}

/// Create a provider from resolved CLI/config file settings.
pub fn create_provider_from_config(config: &ResolvedConfig) -> Result<BoxedProvider, ProviderError> {
    let provider_config = config.provider_config();
    if provider_config.api_key.is_none() {
        return Err(ProviderError::NotConfigured(format!(
            "{} is not set",
            config.api_key_env
        )));
    }
    create_provider(provider_config)
}

/// Convenience constructor.
pub fn gemini(api_key: impl Into<String>, model: impl Into<String>) -> Result<BoxedProvider, ProviderError> {
    create_provider(ProviderConfig::new(api_key, model))
}

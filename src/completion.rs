//! External text-completion service
//!
//! The pipeline treats the language model as an opaque, possibly slow,
//! possibly failing call behind `CompletionService`.
//!
//! # Feature Flags
//!
//! - `openai`: Enables the OpenAI-compatible HTTP client (requires API key)

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{HearthError, Result};
use crate::types::ChatTurn;

/// Per-call options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Overrides the client's configured model
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Ask the service to return a JSON object
    pub json_mode: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 800,
            temperature: 0.7,
            json_mode: false,
        }
    }
}

impl CompletionOptions {
    /// Low-temperature JSON output, used by diagnostics
    pub fn structured(max_tokens: u32) -> Self {
        Self {
            model: None,
            max_tokens,
            temperature: 0.2,
            json_mode: true,
        }
    }
}

/// Trait for text-completion backends
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        prior_turns: &[ChatTurn],
        user_message: &str,
        options: &CompletionOptions,
    ) -> Result<String>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Completion backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Reply length for chat turns
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 800,
            temperature: 0.7,
        }
    }
}

impl CompletionConfig {
    /// Read `OPENAI_API_KEY` and the `HEARTH_COMPLETION_*` variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            base_url: std::env::var("HEARTH_COMPLETION_BASE_URL").unwrap_or(defaults.base_url),
            model: std::env::var("HEARTH_COMPLETION_MODEL").unwrap_or(defaults.model),
            max_tokens: std::env::var("HEARTH_COMPLETION_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_tokens),
            temperature: std::env::var("HEARTH_COMPLETION_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.temperature),
        }
    }

    /// Options for ordinary chat replies
    pub fn chat_options(&self) -> CompletionOptions {
        CompletionOptions {
            model: None,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            json_mode: false,
        }
    }
}

/// Stand-in used when no backend is configured: every call fails, so the
/// pipeline takes its degraded paths (apology reply, rule-based
/// diagnostics, skipped summaries).
pub struct UnconfiguredCompletion;

#[async_trait]
impl CompletionService for UnconfiguredCompletion {
    async fn complete(
        &self,
        _system_prompt: &str,
        _prior_turns: &[ChatTurn],
        _user_message: &str,
        _options: &CompletionOptions,
    ) -> Result<String> {
        Err(HearthError::Completion(
            "no completion backend configured".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "unconfigured"
    }
}

/// OpenAI-compatible chat completion client.
///
/// Works with OpenAI, OpenRouter, Azure OpenAI and local servers that
/// speak the `/chat/completions` protocol.
#[cfg(feature = "openai")]
pub struct OpenAICompletion {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[cfg(feature = "openai")]
impl OpenAICompletion {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        let defaults = CompletionConfig::default();
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or(defaults.base_url),
            model: model.unwrap_or(defaults.model),
        }
    }

    fn build_body(
        &self,
        system_prompt: &str,
        prior_turns: &[ChatTurn],
        user_message: &str,
        options: &CompletionOptions,
    ) -> serde_json::Value {
        let mut messages = Vec::with_capacity(prior_turns.len() + 2);
        if !system_prompt.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": system_prompt}));
        }
        for turn in prior_turns {
            messages.push(serde_json::json!({"role": turn.role.as_str(), "content": turn.content}));
        }
        messages.push(serde_json::json!({"role": "user", "content": user_message}));

        let mut body = serde_json::json!({
            "model": options.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        });
        if options.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl CompletionService for OpenAICompletion {
    async fn complete(
        &self,
        system_prompt: &str,
        prior_turns: &[ChatTurn],
        user_message: &str,
        options: &CompletionOptions,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.build_body(system_prompt, prior_turns, user_message, options);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", "Hearth")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(HearthError::Completion(format!(
                "Completion API error {}: {}",
                status, text
            )));
        }

        let data: serde_json::Value = response.json().await?;
        data["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HearthError::Completion("Invalid response format".to_string()))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Build the completion backend for a configuration
pub fn create_completion_service(config: &CompletionConfig) -> Arc<dyn CompletionService> {
    match &config.api_key {
        #[cfg(feature = "openai")]
        Some(key) => Arc::new(OpenAICompletion::new(
            key.clone(),
            Some(config.base_url.clone()),
            Some(config.model.clone()),
        )),
        _ => {
            tracing::warn!("No completion API key configured; replies will degrade");
            Arc::new(UnconfiguredCompletion)
        }
    }
}

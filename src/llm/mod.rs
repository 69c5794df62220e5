//! LLM completion clients used by the post-process step.
//!
//! One [`HttpLlmClient`] serves every [`Provider`]; each provider module owns
//! its wire format. Transport failures (timeouts, 429, 5xx) are retried with
//! exponential backoff; everything else surfaces immediately.

mod anthropic;
mod gemini;
mod openai;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::LlmConfig;

/// Completion provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[default]
    Gemini,
}

impl Provider {
    pub fn all() -> &'static [Provider] {
        &[
            Provider::Anthropic,
            Provider::OpenAi,
            Provider::DeepSeek,
            Provider::Gemini,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
            Provider::DeepSeek => "deepseek",
            Provider::Gemini => "gemini",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Anthropic => "claude-3-5-sonnet-20241022",
            Provider::OpenAi => "gpt-5-mini",
            Provider::DeepSeek => "deepseek-chat",
            Provider::Gemini => "gemini-2.5-flash-lite",
        }
    }

    /// Environment variable holding the API key
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Anthropic => anthropic::API_BASE,
            Provider::OpenAi => openai::OPENAI_API_BASE,
            Provider::DeepSeek => openai::DEEPSEEK_API_BASE,
            Provider::Gemini => gemini::API_BASE,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Provider::all()
            .iter()
            .find(|p| p.as_str() == wanted)
            .copied()
            .ok_or_else(|| {
                format!("unknown provider '{s}' (expected anthropic, openai, deepseek or gemini)")
            })
    }
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("{provider} is not configured: set {env_var}")]
    NotConfigured {
        provider: Provider,
        env_var: &'static str,
    },

    #[error("request to {provider} failed: {source}")]
    Http {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned HTTP {code}: {body}")]
    Status {
        provider: Provider,
        code: u16,
        body: String,
    },

    #[error("unexpected response from {provider}: {reason}")]
    InvalidResponse { provider: Provider, reason: String },
}

impl LlmError {
    /// Timeouts, connection failures, rate limits and server errors
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http { source, .. } => source.is_timeout() || source.is_connect(),
            LlmError::Status { code, .. } => *code == 429 || *code >= 500,
            LlmError::NotConfigured { .. } | LlmError::InvalidResponse { .. } => false,
        }
    }

    fn invalid(provider: Provider, reason: impl Into<String>) -> Self {
        LlmError::InvalidResponse {
            provider,
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single-turn completion of `prompt`
    async fn complete(
        &self,
        provider: Provider,
        model: &str,
        prompt: &str,
    ) -> Result<String, LlmError>;
}

/// reqwest-backed client for every provider
pub struct HttpLlmClient {
    client: reqwest::Client,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("brandscout/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        })
    }

    fn retry_strategy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
    }

    fn api_key(provider: Provider) -> Result<String, LlmError> {
        match std::env::var(provider.api_key_var()) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(LlmError::NotConfigured {
                provider,
                env_var: provider.api_key_var(),
            }),
        }
    }

    async fn send_once(
        &self,
        provider: Provider,
        api_key: &str,
        model: &str,
        prompt: &str,
    ) -> Result<String, LlmError> {
        let base = provider.default_base_url();

        let request = match provider {
            Provider::Anthropic => anthropic::request(&self.client, base, api_key, model, prompt),
            Provider::OpenAi | Provider::DeepSeek => {
                openai::request(&self.client, base, api_key, model, prompt)
            }
            Provider::Gemini => gemini::request(&self.client, base, api_key, model, prompt),
        };

        let response = request
            .send()
            .await
            .map_err(|source| LlmError::Http { provider, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                provider,
                code: status.as_u16(),
                body: truncate_chars(&body, 500),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|source| LlmError::Http { provider, source })?;

        let text = match provider {
            Provider::Anthropic => anthropic::parse(&body),
            Provider::OpenAi | Provider::DeepSeek => openai::parse(&body),
            Provider::Gemini => gemini::parse(&body),
        };
        text.map_err(|reason| LlmError::invalid(provider, reason))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(
        &self,
        provider: Provider,
        model: &str,
        prompt: &str,
    ) -> Result<String, LlmError> {
        let api_key = Self::api_key(provider)?;
        tracing::debug!(
            %provider,
            model,
            prompt_chars = prompt.len(),
            "Sending completion request"
        );

        let op = || async { self.send_once(provider, &api_key, model, prompt).await };
        op.retry(self.retry_strategy())
            .when(LlmError::is_retryable)
            .notify(|err, dur| {
                warn!(%provider, "Retrying completion after {:?}: {}", dur, err);
            })
            .await
    }
}

/// First `max` characters of `text`
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

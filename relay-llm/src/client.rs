use crate::error::{LlmError, Result};
use crate::openai::OpenAiCompatClient;
use crate::types::{ChatMessage, ChatResponse};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    DeepSeek,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::DeepSeek => "deepseek",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::DeepSeek => "DeepSeek",
        }
    }

    pub fn default_api_base(self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::DeepSeek => "https://api.deepseek.com/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAI => "gpt-4o-mini",
            Provider::DeepSeek => "deepseek-chat",
        }
    }

    /// Environment variable conventionally holding this provider's key.
    pub fn api_key_env(self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "deepseek" => Ok(Provider::DeepSeek),
            other => Err(LlmError::InvalidInput(format!(
                "unknown provider {other:?}; expected one of: openai, deepseek"
            ))),
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    provider: Provider,
    api_key: String,
    model: String,
    api_base: String,
    client: reqwest::Client,
}

impl fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("api_key_configured", &self.has_api_key())
            .finish()
    }
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(provider: Provider, api_key: &str, model: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Self {
            provider,
            api_key: api_key.trim().to_string(),
            model: model.to_string(),
            api_base: provider.default_api_base().to_string(),
            client,
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim().trim_end_matches('/').to_string();
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    #[tracing::instrument(level = "info", skip_all, fields(provider = %self.provider, model = %self.model))]
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        if !self.has_api_key() {
            return Err(LlmError::Authentication(format!(
                "{} api key is not configured (set {})",
                self.provider.display_name(),
                self.provider.api_key_env()
            )));
        }
        if messages.is_empty() {
            return Err(LlmError::InvalidInput(
                "at least one message is required".to_string(),
            ));
        }

        let c = OpenAiCompatClient::new(
            self.client.clone(),
            &self.api_base,
            &self.api_key,
            &self.model,
        );
        let resp = c.chat(messages).await?;
        tracing::debug!(
            prompt_tokens = resp.usage.prompt_tokens,
            completion_tokens = resp.usage.completion_tokens,
            finish_reason = %resp.finish_reason,
            "chat completion received"
        );
        Ok(resp)
    }
}

use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatResponse, Role, Usage};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    completions_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(http: reqwest::Client, api_base: &str, api_key: &str, model: &str) -> Self {
        Self {
            http,
            completions_url: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let req = OpenAiChatRequest::new(&self.model, messages);

        let response = self
            .http
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LlmError::Authentication(format!(
                "chat completion rejected credentials: status={status} body={body}"
            )));
        }
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OpenAiChatResponse = serde_json::from_str(&body)?;
        parsed.try_into()
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
}

impl OpenAiChatRequest {
    fn new(model: &str, messages: &[ChatMessage]) -> Self {
        Self {
            model: model.to_string(),
            messages: messages.iter().map(to_openai_message).collect(),
            stream: false,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

fn to_openai_message(m: &ChatMessage) -> OpenAiMessage {
    OpenAiMessage {
        role: m.role.as_str(),
        content: m.content.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl TryFrom<OpenAiChatResponse> for ChatResponse {
    type Error = LlmError;

    fn try_from(v: OpenAiChatResponse) -> Result<Self> {
        let choice = v.choices.into_iter().next().ok_or_else(|| {
            LlmError::ResponseFormat("chat completion response missing choices".to_string())
        })?;

        let usage = v
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            message: ChatMessage {
                role: Role::Assistant,
                content: choice.message.content.unwrap_or_default(),
            },
            usage,
            finish_reason: choice
                .finish_reason
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

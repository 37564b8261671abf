use crate::traits::NotificationAdapter;
use crate::types::Notification;
use anyhow::{Result, anyhow};
use std::time::Duration;

const PUSHOVER_MESSAGES_URL: &str = "https://api.pushover.net/1/messages.json";
const MAX_TITLE_CHARS: usize = 250;
const MAX_MESSAGE_CHARS: usize = 1024;
const EMPTY_MESSAGE_PLACEHOLDER: &str = "(empty reply)";

#[derive(Clone)]
pub struct PushoverAdapter {
    http: reqwest::Client,
    api_url: String,
    api_token: String,
    user_key: String,
}

impl std::fmt::Debug for PushoverAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushoverAdapter")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

impl PushoverAdapter {
    pub fn new(api_token: &str, user_key: &str) -> Result<Self> {
        let api_token = api_token.trim();
        if api_token.is_empty() {
            return Err(anyhow!("pushover api token is required"));
        }
        let user_key = user_key.trim();
        if user_key.is_empty() {
            return Err(anyhow!("pushover user key is required"));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_url: PUSHOVER_MESSAGES_URL.to_string(),
            api_token: api_token.to_string(),
            user_key: user_key.to_string(),
        })
    }

    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim().to_string();
        self
    }
}

#[async_trait::async_trait]
impl NotificationAdapter for PushoverAdapter {
    fn channel_id(&self) -> &str {
        "pushover"
    }

    #[tracing::instrument(level = "info", skip_all, fields(channel = "pushover"))]
    async fn send(&self, notification: Notification) -> Result<()> {
        let title = truncate_chars(notification.title.trim(), MAX_TITLE_CHARS);
        let message = match notification.message.trim() {
            "" => EMPTY_MESSAGE_PLACEHOLDER.to_string(),
            text => truncate_chars(text, MAX_MESSAGE_CHARS),
        };
        let priority = notification.priority.to_string();

        let form = [
            ("token", self.api_token.as_str()),
            ("user", self.user_key.as_str()),
            ("title", title.as_str()),
            ("message", message.as_str()),
            ("priority", priority.as_str()),
        ];

        let response = self.http.post(&self.api_url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!(
                "pushover send failed: status={} body={}",
                status,
                body
            ));
        }

        tracing::info!(message_chars = message.chars().count(), "pushover notification sent");
        Ok(())
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

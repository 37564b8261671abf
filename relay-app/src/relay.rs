//! The relay: one command in, one persona-framed chat completion out, with a
//! best-effort push notification on the side.

use crate::config::RelayConfig;
use axum::http::StatusCode;
use relay_llm::{ChatMessage, LlmClient, LlmError, Provider};
use relay_notify::{Notification, NotificationAdapter, PushoverAdapter};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("missing command")]
    MissingCommand,

    #[error("invalid request body: {0}")]
    InvalidRequest(String),

    #[error("{provider} authentication failed: {detail}")]
    Authentication { provider: Provider, detail: String },

    #[error("{provider} api error: {detail}")]
    Upstream { provider: Provider, detail: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    fn from_llm(provider: Provider, e: LlmError) -> Self {
        match e {
            LlmError::Authentication(detail) => Self::Authentication { provider, detail },
            LlmError::Api { status, body } => Self::Upstream {
                provider,
                detail: format!("status={status} body={body}"),
            },
            LlmError::ResponseFormat(detail) => Self::Upstream { provider, detail },
            other => Self::Internal(other.to_string()),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingCommand | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Authentication { .. } | Self::Upstream { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Text returned to the HTTP caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::MissingCommand => "Comando mancante nel JSON.".to_string(),
            Self::InvalidRequest(detail) => format!("Richiesta non valida: {detail}"),
            Self::Authentication { provider, .. } => format!(
                "Mi dispiace, c'è un problema di autenticazione con i miei sistemi. Controlla la chiave API {}.",
                provider.display_name()
            ),
            Self::Upstream { provider, detail } => format!(
                "Mi dispiace, c'è stato un errore dall'API di {}: {detail}",
                provider.display_name()
            ),
            Self::Internal(_) => {
                "Mi dispiace, si è verificato un errore imprevisto. Riprova più tardi.".to_string()
            }
        }
    }

    /// Body of the operator notification, or `None` for caller mistakes.
    fn notification_message(&self) -> Option<String> {
        match self {
            Self::MissingCommand | Self::InvalidRequest(_) => None,
            Self::Authentication { provider, .. } => Some(format!(
                "Problema di autenticazione con l'API di {}. Controlla la chiave.",
                provider.display_name()
            )),
            Self::Upstream { provider, detail } => Some(format!(
                "Errore dall'API di {}: {detail}",
                provider.display_name()
            )),
            Self::Internal(detail) => Some(format!("Errore generale: {detail}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotifyPolicy {
    pub reply_title: String,
    pub error_title: String,
    trigger_keywords: Vec<String>,
    pub notify_on_error: bool,
}

impl NotifyPolicy {
    pub fn new(
        reply_title: impl Into<String>,
        error_title: impl Into<String>,
        trigger_keywords: &[String],
        notify_on_error: bool,
    ) -> Self {
        let mut keywords: Vec<String> = Vec::new();
        for keyword in trigger_keywords {
            let keyword = keyword.trim().to_lowercase();
            if !keyword.is_empty() && !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
        Self {
            reply_title: reply_title.into(),
            error_title: error_title.into(),
            trigger_keywords: keywords,
            notify_on_error,
        }
    }

    pub fn trigger_keywords(&self) -> &[String] {
        &self.trigger_keywords
    }

    /// First configured keyword contained in `reply`, ignoring case.
    pub fn matches(&self, reply: &str) -> Option<&str> {
        let haystack = reply.to_lowercase();
        self.trigger_keywords
            .iter()
            .find(|k| haystack.contains(k.as_str()))
            .map(String::as_str)
    }

    pub fn should_notify(&self, reply: &str) -> bool {
        self.trigger_keywords.is_empty() || self.matches(reply).is_some()
    }

    fn reply_notification(&self, reply: &str) -> Option<Notification> {
        if self.trigger_keywords.is_empty() {
            return Some(Notification::new(self.reply_title.clone(), reply));
        }
        let keyword = self.matches(reply)?;
        Some(Notification::new(format!("{} [{keyword}]", self.reply_title), reply).with_priority(1))
    }
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        let cfg = crate::config::NotifyConfig::default();
        Self::new(cfg.reply_title, cfg.error_title, &[], cfg.notify_on_error)
    }
}

pub struct Relay {
    llm: LlmClient,
    persona: String,
    notifier: Option<Arc<dyn NotificationAdapter>>,
    policy: NotifyPolicy,
    deliveries: TaskTracker,
    abandon: CancellationToken,
}

impl Relay {
    pub fn new(llm: LlmClient, persona: impl Into<String>) -> Self {
        Self {
            llm,
            persona: persona.into(),
            notifier: None,
            policy: NotifyPolicy::default(),
            deliveries: TaskTracker::new(),
            abandon: CancellationToken::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationAdapter>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_policy(mut self, policy: NotifyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn from_config(cfg: &RelayConfig) -> anyhow::Result<Self> {
        let llm = LlmClient::new(
            cfg.llm.provider,
            cfg.llm.api_key().unwrap_or_default(),
            cfg.llm.model(),
        )
        .with_api_base(cfg.llm.api_base());
        if !llm.has_api_key() {
            tracing::error!(
                provider = %cfg.llm.provider,
                api_key_env = cfg.llm.provider.api_key_env(),
                "llm api key is not configured; every request will fail until it is set"
            );
        }

        let policy = NotifyPolicy::new(
            cfg.notify.reply_title.clone(),
            cfg.notify.error_title.clone(),
            &cfg.notify.trigger_keywords,
            cfg.notify.notify_on_error,
        );
        let mut relay = Relay::new(llm, cfg.persona.system_prompt.clone()).with_policy(policy);

        match cfg.notify.pushover_credentials() {
            Some((token, user)) => {
                let mut adapter = PushoverAdapter::new(token, user)?;
                if let Some(url) = cfg.notify.pushover_api_url.as_deref() {
                    adapter = adapter.with_api_url(url);
                }
                relay = relay.with_notifier(Arc::new(adapter));
            }
            None => tracing::info!(
                notify_enabled = cfg.notify.enabled,
                "pushover credentials not configured; notifications disabled"
            ),
        }
        Ok(relay)
    }

    pub fn llm(&self) -> &LlmClient {
        &self.llm
    }

    pub fn notifier_channel(&self) -> Option<&str> {
        self.notifier.as_deref().map(|n| n.channel_id())
    }

    pub fn policy(&self) -> &NotifyPolicy {
        &self.policy
    }

    #[tracing::instrument(level = "info", skip_all, fields(provider = %self.llm.provider(), model = %self.llm.model()))]
    pub async fn ask(&self, command: &str) -> Result<String, RelayError> {
        if command.trim().is_empty() {
            return Err(RelayError::MissingCommand);
        }
        tracing::info!(command_chars = command.chars().count(), "command received");
        tracing::debug!(%command, "command text");

        let messages = [
            ChatMessage::system(self.persona.as_str()),
            ChatMessage::user(command),
        ];
        match self.llm.chat(&messages).await {
            Ok(resp) => {
                let reply = resp.message.content;
                tracing::info!(reply_chars = reply.chars().count(), "reply received");
                match self.policy.reply_notification(&reply) {
                    Some(notification) => self.dispatch(notification),
                    None => tracing::debug!("reply matched no trigger keyword; notification skipped"),
                }
                Ok(reply)
            }
            Err(e) => {
                let err = RelayError::from_llm(self.llm.provider(), e);
                tracing::error!(error = %err, "chat completion failed");
                if self.policy.notify_on_error {
                    if let Some(message) = err.notification_message() {
                        self.dispatch(Notification::new(self.policy.error_title.clone(), message));
                    }
                }
                Err(err)
            }
        }
    }

    /// Sends in the background; delivery failures never reach the caller.
    fn dispatch(&self, notification: Notification) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let abandon = self.abandon.clone();
        self.deliveries.spawn(async move {
            tokio::select! {
                result = notifier.send(notification) => {
                    if let Err(e) = result {
                        tracing::warn!(
                            channel = notifier.channel_id(),
                            error = %e,
                            "notification delivery failed"
                        );
                    }
                }
                _ = abandon.cancelled() => {
                    tracing::warn!(
                        channel = notifier.channel_id(),
                        "notification abandoned at shutdown"
                    );
                }
            }
        });
    }

    /// Waits for notifications still in flight. Later dispatches still run.
    pub async fn drain_notifications(&self) {
        self.deliveries.close();
        self.deliveries.wait().await;
        self.deliveries.reopen();
    }

    /// Final drain on shutdown. Deliveries still pending after `grace` are
    /// cancelled; returns how many were cut off.
    pub async fn shutdown_notifications(&self, grace: Duration) -> usize {
        self.deliveries.close();
        if tokio::time::timeout(grace, self.deliveries.wait()).await.is_ok() {
            return 0;
        }
        let pending = self.deliveries.len();
        self.abandon.cancel();
        self.deliveries.wait().await;
        pending
    }
}

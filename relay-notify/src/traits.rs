use crate::types::Notification;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait NotificationAdapter: Send + Sync {
    /// Unique adapter identifier, e.g. "pushover".
    fn channel_id(&self) -> &str;

    /// Deliver one notification to the configured recipient.
    async fn send(&self, notification: Notification) -> Result<()>;
}

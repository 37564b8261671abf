use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    /// Pushover priority, -2 (silent) through 1 (high). Emergency (2) needs
    /// retry/expire parameters this crate does not send, so it is never produced.
    #[serde(default)]
    pub priority: i8,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i8) -> Self {
        self.priority = priority.clamp(-2, 1);
        self
    }
}

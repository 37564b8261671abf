//! Push-notification adapters for the relay.
//!
//! Adapters are pure I/O: they turn a `Notification` into a call against a
//! hosted push service.

mod pushover;
mod traits;
mod types;

pub use pushover::PushoverAdapter;
pub use traits::NotificationAdapter;
pub use types::Notification;

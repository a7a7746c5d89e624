//! Outbound notifications: composing messages and delivering them.

pub mod message;
pub mod webhook;

pub use message::{NotificationBatch, SlackMessage, StageNotice};
pub use webhook::{AlertSink, SlackWebhook};

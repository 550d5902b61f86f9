//! Outbound transports. The persisted row is the web delivery; email and
//! push go through a [`ChannelSender`] per channel.

use thiserror::Error;
use tracing::info;

use super::types::{Channel, Notification};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    fn send(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Writes the outbound message to the log instead of a provider.
///
/// Used for email and push until a provider is configured.
#[derive(Debug, Clone, Copy)]
pub struct LogSender {
    channel: Channel,
}

impl LogSender {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

impl ChannelSender for LogSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        info!(
            channel = %self.channel,
            notification_id = %notification.id,
            user_id = %notification.user_id,
            notification_type = %notification.notification_type,
            title = %notification.title,
            "notification sent"
        );
        Ok(())
    }
}

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::traits::Channel;
use crate::types::{ConversationRef, MessageRef};

/// Registry of chat platforms, keyed by channel name.
///
/// Controllers look up their channel once at construction. Conversations on
/// a platform with no registered channel are refused rather than routed to
/// some other channel.
pub struct ChannelHub {
    /// Registered channels. Uses RwLock to support dynamic registration.
    channels: RwLock<Vec<Arc<dyn Channel>>>,
}

impl ChannelHub {
    pub fn new(channels: Vec<Arc<dyn Channel>>) -> Self {
        Self {
            channels: RwLock::new(channels),
        }
    }

    /// Register a channel. A channel with the same name replaces the old one.
    /// Returns the channel name after registration.
    pub async fn register_channel(&self, channel: Arc<dyn Channel>) -> String {
        let name = channel.name();
        let mut channels = self.channels.write().await;
        channels.retain(|c| c.name() != name);
        channels.push(channel);
        info!(channel = %name, total = channels.len(), "Registered channel");
        name
    }

    pub async fn channel_names(&self) -> Vec<String> {
        self.channels.read().await.iter().map(|c| c.name()).collect()
    }

    /// Find the channel serving a conversation's platform.
    pub async fn channel_for(&self, conv: &ConversationRef) -> anyhow::Result<Arc<dyn Channel>> {
        let platform = conv.platform.as_str();
        let channels = self.channels.read().await;
        channels
            .iter()
            .find(|c| c.name() == platform)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No channel found for platform {}", platform))
    }

    /// Send a one-off notice, e.g. an auth rejection before any controller exists.
    pub async fn send_text(&self, conv: &ConversationRef, text: &str) -> anyhow::Result<MessageRef> {
        let channel = self.channel_for(conv).await?;
        channel.send_text(conv, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestChannel;
    use crate::types::Platform;

    #[tokio::test]
    async fn routes_by_platform_name() {
        let telegram = Arc::new(TestChannel::new("telegram"));
        let hub = ChannelHub::new(vec![telegram.clone()]);
        let conv = ConversationRef::new(Platform::Telegram, "1");
        hub.send_text(&conv, "hi").await.unwrap();
        assert_eq!(telegram.sent_texts(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn unknown_platform_is_refused() {
        let hub = ChannelHub::new(vec![Arc::new(TestChannel::new("telegram"))]);
        let conv = ConversationRef::new(Platform::Slack, "C1");
        let err = hub.channel_for(&conv).await.err().unwrap();
        assert!(err.to_string().contains("No channel found"));
    }

    #[tokio::test]
    async fn register_replaces_same_name() {
        let hub = ChannelHub::new(vec![Arc::new(TestChannel::new("slack"))]);
        let replacement = Arc::new(TestChannel::new("slack"));
        hub.register_channel(replacement.clone()).await;
        assert_eq!(hub.channel_names().await, vec!["slack".to_string()]);

        let conv = ConversationRef::new(Platform::Slack, "C1");
        hub.send_text(&conv, "x").await.unwrap();
        assert_eq!(replacement.sent_texts().len(), 1);
    }
}

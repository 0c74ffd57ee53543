use async_trait::async_trait;

use crate::types::{Button, ConversationRef, MessageRef};

/// Capabilities that vary by chat platform.
///
/// The stream sink and the tmux bridge branch on these instead of on the
/// platform name.
#[derive(Debug, Clone)]
pub struct ChannelCapabilities {
    /// Maximum message length in characters. Longer text is split.
    pub max_message_len: usize,
    /// Whether a sent message can be edited in place.
    pub supports_edit: bool,
    /// Whether a sent message can be deleted.
    pub supports_delete: bool,
    /// Whether inline buttons can be attached to a message.
    pub supports_buttons: bool,
    /// Whether the platform has provisional "draft" messages for streaming.
    pub supports_draft: bool,
}

/// A chat platform (Telegram, Slack, Discord, ...).
///
/// Implementations own all wire details: HTTP, retries, markup escaping.
/// The core only speaks in conversation references and message handles.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Platform name used to route outbound traffic (e.g. "telegram").
    fn name(&self) -> String;

    fn capabilities(&self) -> ChannelCapabilities;

    /// Send a plain message and return a handle for later edits.
    async fn send_text(&self, conv: &ConversationRef, text: &str) -> anyhow::Result<MessageRef>;

    /// Send a message with rows of inline buttons.
    async fn send_buttons(
        &self,
        conv: &ConversationRef,
        text: &str,
        buttons: &[Vec<Button>],
    ) -> anyhow::Result<MessageRef>;

    /// Replace the text of a previously sent message. Buttons are removed.
    async fn edit_text(&self, message: &MessageRef, text: &str) -> anyhow::Result<()>;

    async fn delete_message(&self, message: &MessageRef) -> anyhow::Result<()>;

    /// Acknowledge a button press, optionally with a short toast.
    async fn acknowledge(&self, action_id: &str, text: Option<&str>) -> anyhow::Result<()>;

    /// Update a provisional draft message. `draft_id` is stable for one turn.
    async fn send_draft(
        &self,
        conv: &ConversationRef,
        draft_id: u64,
        text: &str,
    ) -> anyhow::Result<()> {
        let _ = (conv, draft_id, text);
        anyhow::bail!("{} does not support draft messages", self.name())
    }
}

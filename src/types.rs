use std::fmt;

use serde_json::Value;

/// Chat platform a conversation lives on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
    Telegram,
    Slack,
    Discord,
    Other(String),
}

impl Platform {
    pub fn as_str(&self) -> &str {
        match self {
            Platform::Telegram => "telegram",
            Platform::Slack => "slack",
            Platform::Discord => "discord",
            Platform::Other(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "telegram" => Platform::Telegram,
            "slack" => Platform::Slack,
            "discord" => Platform::Discord,
            other => Platform::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat plus an optional sub-thread (forum topic, Slack thread, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRef {
    pub platform: Platform,
    pub conversation_id: String,
    pub thread_id: Option<String>,
    /// Human-visible thread title, when the platform reports one.
    /// Not part of the conversation key.
    pub thread_name: Option<String>,
}

impl ConversationRef {
    pub fn new(platform: Platform, conversation_id: impl Into<String>) -> Self {
        Self {
            platform,
            conversation_id: conversation_id.into(),
            thread_id: None,
            thread_name: None,
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    /// Stable conversation key, e.g. "telegram:-100123:42".
    pub fn key(&self) -> String {
        crate::session::conversation_key(self)
    }
}

/// Who sent an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub user_id: String,
    pub display_name: Option<String>,
}

impl Sender {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
        }
    }
}

/// An image attached to an inbound message.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// What kind of inbound event a platform adapter produced.
#[derive(Debug, Clone)]
pub enum InboundKind {
    Text(String),
    /// A slash command, already split by the adapter ("model", "gpt-5").
    Command { name: String, args: String },
    Image {
        caption: Option<String>,
        images: Vec<ImageAttachment>,
    },
    /// Button press. `action_id` is the platform handle used to acknowledge it.
    Action { action_id: String, data: String },
}

/// A normalized platform event, consumed once by the Router.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub kind: InboundKind,
    pub sender: Sender,
    pub conversation: ConversationRef,
    /// Original platform payload, kept for adapters and logging.
    pub raw: Value,
}

impl InboundEvent {
    pub fn text(conversation: ConversationRef, sender: Sender, text: &str) -> Self {
        Self {
            kind: InboundKind::Text(text.to_string()),
            sender,
            conversation,
            raw: Value::Null,
        }
    }

    pub fn command(conversation: ConversationRef, sender: Sender, name: &str, args: &str) -> Self {
        Self {
            kind: InboundKind::Command {
                name: name.to_string(),
                args: args.to_string(),
            },
            sender,
            conversation,
            raw: Value::Null,
        }
    }

    pub fn action(conversation: ConversationRef, sender: Sender, action_id: &str, data: &str) -> Self {
        Self {
            kind: InboundKind::Action {
                action_id: action_id.to_string(),
                data: data.to_string(),
            },
            sender,
            conversation,
            raw: Value::Null,
        }
    }
}

/// Handle to a message the core previously sent, used for edits and deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub conversation: ConversationRef,
    pub message_id: String,
}

/// An inline button: label shown to the user plus callback data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

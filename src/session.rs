//! Conversation key rendering and parsing.
//!
//! Router serialization, controller lifetime, permission files and session
//! directories are all scoped by the same key, so every format decision for
//! it lives here.

use crate::types::{ConversationRef, Platform};

/// Render the stable key for a conversation: "platform:conversation[:thread]".
pub fn conversation_key(conv: &ConversationRef) -> String {
    match &conv.thread_id {
        Some(thread) if !thread.is_empty() => {
            format!("{}:{}:{}", conv.platform, conv.conversation_id, thread)
        }
        _ => format!("{}:{}", conv.platform, conv.conversation_id),
    }
}

/// Parse a key produced by [`conversation_key`].
///
/// Supports:
/// - "telegram:12345"
/// - "telegram:-10012345:77" (forum topic 77)
/// - "slack:C123:1700000000.123456" (thread ts contains a dot, not a colon)
pub fn parse_key(key: &str) -> Option<ConversationRef> {
    let mut parts = key.splitn(3, ':');
    let platform = parts.next()?.trim();
    let conversation = parts.next()?.trim();
    if platform.is_empty() || conversation.is_empty() {
        return None;
    }
    let mut conv = ConversationRef::new(Platform::from_name(platform), conversation);
    if let Some(thread) = parts.next() {
        let thread = thread.trim();
        if !thread.is_empty() {
            conv.thread_id = Some(thread.to_string());
        }
    }
    Some(conv)
}

/// Filesystem-safe form of a conversation key.
pub fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

/// How a thread title binds a conversation to direct-topic terminal mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicBinding {
    /// Not a terminal topic.
    None,
    /// A terminal topic with no session named yet.
    Unbound,
    /// A terminal topic naming a specific tmux session.
    Session(String),
}

/// Classify a thread title against the terminal-topic prefix.
///
/// "tmux" → Unbound, "tmux:build" → Session("build"), anything else → None.
/// Matching on the prefix is case-insensitive; the session name keeps its case.
pub fn topic_binding(thread_name: Option<&str>, prefix: &str) -> TopicBinding {
    let Some(name) = thread_name.map(str::trim) else {
        return TopicBinding::None;
    };
    if prefix.is_empty() {
        return TopicBinding::None;
    }
    // `get` refuses offsets inside a multi-byte character.
    let Some(rest) = name
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &name[prefix.len()..])
    else {
        return TopicBinding::None;
    };
    if rest.is_empty() {
        return TopicBinding::Unbound;
    }
    match rest.strip_prefix(':') {
        Some(session) if !session.trim().is_empty() => {
            TopicBinding::Session(session.trim().to_string())
        }
        Some(_) => TopicBinding::Unbound,
        None => TopicBinding::None,
    }
}

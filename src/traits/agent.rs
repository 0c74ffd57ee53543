use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::types::ImageAttachment;

/// Reasoning effort passed through to the agent runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingLevel {
    Off,
    Minimal,
    Low,
    Medium,
    High,
    XHigh,
}

impl ThinkingLevel {
    pub const ALL: [ThinkingLevel; 6] = [
        ThinkingLevel::Off,
        ThinkingLevel::Minimal,
        ThinkingLevel::Low,
        ThinkingLevel::Medium,
        ThinkingLevel::High,
        ThinkingLevel::XHigh,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "off" => Some(ThinkingLevel::Off),
            "minimal" => Some(ThinkingLevel::Minimal),
            "low" => Some(ThinkingLevel::Low),
            "medium" => Some(ThinkingLevel::Medium),
            "high" => Some(ThinkingLevel::High),
            "xhigh" => Some(ThinkingLevel::XHigh),
            _ => None,
        }
    }
}

impl fmt::Display for ThinkingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThinkingLevel::Off => "off",
            ThinkingLevel::Minimal => "minimal",
            ThinkingLevel::Low => "low",
            ThinkingLevel::Medium => "medium",
            ThinkingLevel::High => "high",
            ThinkingLevel::XHigh => "xhigh",
        };
        f.write_str(s)
    }
}

/// Events delivered by an agent session's feed.
///
/// The feed may deliver these out of the documented order; consumers must
/// not assume `TurnStart` precedes deltas.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    TurnStart,
    TextDelta(String),
    ThinkingDelta(String),
    ToolStart {
        call_id: String,
        name: String,
        args: Value,
    },
    ToolEnd {
        call_id: String,
        name: String,
        is_error: bool,
    },
    TurnEnd {
        error_message: Option<String>,
    },
    /// Anything the runtime emits that this crate has no use for.
    Other(String),
}

/// A tool the agent can invoke. Arguments arrive as a JSON object.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema for the tool's parameters.
    fn schema(&self) -> Value;
    async fn execute(&self, call_id: &str, args: Value) -> anyhow::Result<String>;
}

/// Parameters for creating an agent session.
pub struct SessionOptions {
    pub cwd: PathBuf,
    /// Directory the runtime persists session files into.
    pub session_dir: PathBuf,
    pub model: String,
    pub thinking: ThinkingLevel,
    /// Tools the session must use instead of its own built-ins.
    pub tools: Vec<Arc<dyn AgentTool>>,
}

/// The agent runtime: a black box that creates sessions.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// The runtime's own tools (bash, read, write, edit, ...) for `cwd`.
    /// The controller wraps these before handing them back in `SessionOptions`.
    fn builtin_tools(&self, cwd: &Path) -> Vec<Arc<dyn AgentTool>>;

    /// Model identifiers this runtime can switch to.
    fn available_models(&self) -> Vec<String>;

    async fn create_session(&self, options: SessionOptions) -> anyhow::Result<Arc<dyn AgentSession>>;
}

/// One live agent session.
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Take the event feed. Only the first call returns a receiver.
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<AgentEvent>>;

    /// Run one turn. Resolves after the runtime has emitted `TurnEnd`.
    async fn prompt(&self, text: &str, images: Vec<ImageAttachment>) -> anyhow::Result<()>;

    async fn abort(&self) -> anyhow::Result<()>;

    /// Whether `steer` can inject text into a running turn.
    fn supports_steer(&self) -> bool {
        false
    }

    async fn steer(&self, text: &str) -> anyhow::Result<()> {
        let _ = text;
        anyhow::bail!("steering is not supported by this runtime")
    }

    fn model(&self) -> String;

    async fn set_model(&self, model: &str) -> anyhow::Result<()>;

    async fn set_thinking_level(&self, level: ThinkingLevel) -> anyhow::Result<()>;

    /// Load a previously persisted session file into this session.
    async fn switch_session(&self, path: &Path) -> anyhow::Result<()>;

    /// Path of the file this session persists to, if any.
    fn session_file(&self) -> Option<PathBuf>;
}

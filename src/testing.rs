//! Test infrastructure: TestChannel, MockTerminal, MockRuntime and helpers.
//!
//! Everything records synchronously behind std mutexes so assertions can
//! read state without awaiting.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};

use crate::traits::{
    AgentEvent, AgentRuntime, AgentSession, AgentTool, Channel, ChannelCapabilities,
    SessionOptions, Terminal, TerminalSession, ThinkingLevel,
};
use crate::types::{Button, ConversationRef, ImageAttachment, MessageRef};

/// Poll `cond` every 5ms, panicking after two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}

// ---------------------------------------------------------------------------
// TestChannel
// ---------------------------------------------------------------------------

/// One outbound operation, in the order the channel saw it.
#[derive(Debug, Clone)]
pub enum Recorded {
    Sent {
        id: String,
        text: String,
        buttons: Option<Vec<Vec<Button>>>,
    },
    Edited {
        id: String,
        text: String,
    },
    Deleted {
        id: String,
    },
    Draft {
        draft_id: u64,
        text: String,
    },
    Ack {
        action_id: String,
        text: Option<String>,
    },
}

/// A channel that records everything it is asked to do.
pub struct TestChannel {
    name: String,
    caps: ChannelCapabilities,
    log: Mutex<Vec<Recorded>>,
    next_id: AtomicUsize,
    fail_edits: AtomicBool,
    fail_drafts: AtomicBool,
    panic_sends: AtomicUsize,
}

impl TestChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            caps: ChannelCapabilities {
                max_message_len: 4096,
                supports_edit: true,
                supports_delete: true,
                supports_buttons: true,
                supports_draft: false,
            },
            log: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            fail_edits: AtomicBool::new(false),
            fail_drafts: AtomicBool::new(false),
            panic_sends: AtomicUsize::new(0),
        }
    }

    pub fn with_capabilities(mut self, caps: ChannelCapabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn without_buttons(mut self) -> Self {
        self.caps.supports_buttons = false;
        self
    }

    pub fn fail_edits(&self, fail: bool) {
        self.fail_edits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_drafts(&self, fail: bool) {
        self.fail_drafts.store(fail, Ordering::SeqCst);
    }

    /// Make the next `send_text` panic, as a buggy adapter would.
    pub fn panic_on_next_send(&self) {
        self.panic_sends.store(1, Ordering::SeqCst);
    }

    pub fn log(&self) -> Vec<Recorded> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, entry: Recorded) {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
    }

    /// Texts of every new message, with or without buttons.
    pub fn sent_texts(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Sent { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<(String, String)> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Edited { id, text } => Some((id, text)),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Deleted { id } => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn drafts(&self) -> Vec<(u64, String)> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Draft { draft_id, text } => Some((draft_id, text)),
                _ => None,
            })
            .collect()
    }

    pub fn acks(&self) -> Vec<(String, Option<String>)> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Ack { action_id, text } => Some((action_id, text)),
                _ => None,
            })
            .collect()
    }

    /// Buttons of the most recent message that had any.
    pub fn last_buttons(&self) -> Option<Vec<Vec<Button>>> {
        self.log().into_iter().rev().find_map(|r| match r {
            Recorded::Sent {
                buttons: Some(buttons),
                ..
            } => Some(buttons),
            _ => None,
        })
    }

    /// Sent and edited texts in order: what a user scrolling the chat saw change.
    pub fn outputs(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Sent { text, .. } | Recorded::Edited { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Current text of every message still visible, oldest first.
    pub fn latest_message_texts(&self) -> Vec<String> {
        let mut messages: Vec<(String, String)> = Vec::new();
        for entry in self.log() {
            match entry {
                Recorded::Sent { id, text, .. } => messages.push((id, text)),
                Recorded::Edited { id, text } => {
                    if let Some(m) = messages.iter_mut().find(|(mid, _)| *mid == id) {
                        m.1 = text;
                    }
                }
                Recorded::Deleted { id } => messages.retain(|(mid, _)| *mid != id),
                _ => {}
            }
        }
        messages.into_iter().map(|(_, text)| text).collect()
    }

    fn next_message(&self, conv: &ConversationRef) -> MessageRef {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        MessageRef {
            conversation: conv.clone(),
            message_id: format!("m{}", n),
        }
    }
}

#[async_trait]
impl Channel for TestChannel {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn capabilities(&self) -> ChannelCapabilities {
        self.caps.clone()
    }

    async fn send_text(&self, conv: &ConversationRef, text: &str) -> anyhow::Result<MessageRef> {
        if self
            .panic_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            panic!("send_text blew up");
        }
        let message = self.next_message(conv);
        self.record(Recorded::Sent {
            id: message.message_id.clone(),
            text: text.to_string(),
            buttons: None,
        });
        Ok(message)
    }

    async fn send_buttons(
        &self,
        conv: &ConversationRef,
        text: &str,
        buttons: &[Vec<Button>],
    ) -> anyhow::Result<MessageRef> {
        let message = self.next_message(conv);
        self.record(Recorded::Sent {
            id: message.message_id.clone(),
            text: text.to_string(),
            buttons: Some(buttons.to_vec()),
        });
        Ok(message)
    }

    async fn edit_text(&self, message: &MessageRef, text: &str) -> anyhow::Result<()> {
        if self.fail_edits.load(Ordering::SeqCst) {
            anyhow::bail!("edit rejected");
        }
        self.record(Recorded::Edited {
            id: message.message_id.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, message: &MessageRef) -> anyhow::Result<()> {
        self.record(Recorded::Deleted {
            id: message.message_id.clone(),
        });
        Ok(())
    }

    async fn acknowledge(&self, action_id: &str, text: Option<&str>) -> anyhow::Result<()> {
        self.record(Recorded::Ack {
            action_id: action_id.to_string(),
            text: text.map(str::to_string),
        });
        Ok(())
    }

    async fn send_draft(
        &self,
        _conv: &ConversationRef,
        draft_id: u64,
        text: &str,
    ) -> anyhow::Result<()> {
        if !self.caps.supports_draft || self.fail_drafts.load(Ordering::SeqCst) {
            anyhow::bail!("draft rejected");
        }
        self.record(Recorded::Draft {
            draft_id,
            text: text.to_string(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EchoTool
// ---------------------------------------------------------------------------

/// Returns `args["text"]`, or "ok".
pub struct EchoTool {
    name: String,
    pub calls: AtomicUsize,
}

impl EchoTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AgentTool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echo the text argument"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": "Echo the text argument",
            "parameters": {"type": "object", "properties": {"text": {"type": "string"}}}
        })
    }

    async fn execute(&self, _call_id: &str, args: Value) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(args["text"].as_str().unwrap_or("ok").to_string())
    }
}

// ---------------------------------------------------------------------------
// MockTerminal
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Pane {
    typed: Vec<String>,
    pending: String,
    lines: Vec<String>,
    size: Option<(u16, u16)>,
}

/// In-memory tmux server. Submitted lines show up in the pane as `$ <line>`.
#[derive(Default)]
pub struct MockTerminal {
    sessions: Mutex<BTreeMap<String, Pane>>,
}

impl MockTerminal {
    pub fn with_sessions(names: &[&str]) -> Self {
        let terminal = Self::default();
        {
            let mut sessions = terminal.lock();
            for name in names {
                sessions.insert(name.to_string(), Pane::default());
            }
        }
        terminal
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Pane>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lines submitted with Enter, oldest first.
    pub fn typed(&self, name: &str) -> Vec<String> {
        self.lock().get(name).map(|p| p.typed.clone()).unwrap_or_default()
    }

    /// Simulate a session exiting behind the bridge's back.
    pub fn remove(&self, name: &str) {
        self.lock().remove(name);
    }

    pub fn size(&self, name: &str) -> Option<(u16, u16)> {
        self.lock().get(name).and_then(|p| p.size)
    }

    fn with_pane<T>(&self, name: &str, f: impl FnOnce(&mut Pane) -> T) -> anyhow::Result<T> {
        let mut sessions = self.lock();
        let pane = sessions
            .get_mut(name)
            .ok_or_else(|| anyhow::anyhow!("can't find session: {}", name))?;
        Ok(f(pane))
    }
}

#[async_trait]
impl Terminal for MockTerminal {
    async fn list_sessions(&self) -> anyhow::Result<Vec<TerminalSession>> {
        Ok(self
            .lock()
            .keys()
            .map(|name| TerminalSession {
                name: name.clone(),
                windows: 1,
                attached: false,
            })
            .collect())
    }

    async fn new_session(&self, name: &str, command: Option<&str>) -> anyhow::Result<()> {
        let mut sessions = self.lock();
        if sessions.contains_key(name) {
            anyhow::bail!("duplicate session: {}", name);
        }
        let mut pane = Pane::default();
        if let Some(command) = command {
            pane.lines.push(format!("$ {}", command));
        }
        sessions.insert(name.to_string(), pane);
        Ok(())
    }

    async fn kill_session(&self, name: &str) -> anyhow::Result<()> {
        self.lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| anyhow::anyhow!("can't find session: {}", name))
    }

    async fn send_keys(&self, target: &str, text: &str, literal: bool) -> anyhow::Result<()> {
        self.with_pane(target, |pane| {
            if literal {
                pane.pending.push_str(text);
            } else {
                pane.lines.push(format!("[{}]", text));
            }
        })
    }

    async fn send_enter(&self, target: &str) -> anyhow::Result<()> {
        self.with_pane(target, |pane| {
            let line = std::mem::take(&mut pane.pending);
            pane.lines.push(format!("$ {}", line));
            pane.typed.push(line);
        })
    }

    async fn send_ctrl_c(&self, target: &str) -> anyhow::Result<()> {
        self.with_pane(target, |pane| {
            pane.pending.clear();
            pane.lines.push("^C".to_string());
        })
    }

    async fn capture_pane(&self, target: &str, lines: usize) -> anyhow::Result<String> {
        self.with_pane(target, |pane| {
            let start = pane.lines.len().saturating_sub(lines);
            pane.lines[start..].join("\n")
        })
    }

    async fn has_session(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self.lock().contains_key(name))
    }

    async fn resize_window(&self, target: &str, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.with_pane(target, |pane| pane.size = Some((cols, rows)))
    }
}

// ---------------------------------------------------------------------------
// MockRuntime / MockSession
// ---------------------------------------------------------------------------

/// One step of a scripted agent turn.
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    /// Run a session tool by name, bracketed by tool start/end events.
    Tool { name: String, args: Value },
    /// Block until `MockSession::release` or an abort.
    Hold,
    /// End the turn with this error.
    Fail(String),
}

pub fn text(s: &str) -> Step {
    Step::Text(s.to_string())
}

pub fn tool(name: &str, args: Value) -> Step {
    Step::Tool {
        name: name.to_string(),
        args,
    }
}

type Script = Arc<Mutex<VecDeque<Vec<Step>>>>;

/// A runtime whose sessions play back scripted turns. Turns without a script
/// answer `echo: <prompt>`.
pub struct MockRuntime {
    script: Script,
    models: Vec<String>,
    steer: bool,
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            models: vec!["claude-sonnet-4-5".to_string(), "gpt-5".to_string()],
            steer: false,
            sessions: Mutex::new(Vec::new()),
        }
    }
}

impl MockRuntime {
    pub fn with_steer(mut self) -> Self {
        self.steer = true;
        self
    }

    /// Queue a turn for whichever session prompts next.
    pub fn push_turn(&self, steps: Vec<Step>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(steps);
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn latest(&self) -> Option<Arc<MockSession>> {
        self.sessions().last().cloned()
    }
}

#[async_trait]
impl AgentRuntime for MockRuntime {
    fn builtin_tools(&self, _cwd: &Path) -> Vec<Arc<dyn AgentTool>> {
        ["bash", "read", "write", "edit"]
            .iter()
            .map(|name| Arc::new(EchoTool::new(name)) as Arc<dyn AgentTool>)
            .collect()
    }

    fn available_models(&self) -> Vec<String> {
        self.models.clone()
    }

    async fn create_session(&self, options: SessionOptions) -> anyhow::Result<Arc<dyn AgentSession>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(MockSession {
            tx,
            rx: Mutex::new(Some(rx)),
            script: self.script.clone(),
            tools: options.tools,
            session_dir: options.session_dir,
            model: Mutex::new(options.model),
            thinking: Mutex::new(options.thinking),
            steer: self.steer,
            prompts: Mutex::new(Vec::new()),
            steers: Mutex::new(Vec::new()),
            switched: Mutex::new(Vec::new()),
            tool_results: Mutex::new(Vec::new()),
            release: Notify::new(),
            aborted: AtomicBool::new(false),
            running: AtomicBool::new(false),
        });
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(session.clone());
        Ok(session)
    }
}

pub struct MockSession {
    tx: mpsc::UnboundedSender<AgentEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<AgentEvent>>>,
    script: Script,
    tools: Vec<Arc<dyn AgentTool>>,
    pub session_dir: PathBuf,
    model: Mutex<String>,
    thinking: Mutex<ThinkingLevel>,
    steer: bool,
    prompts: Mutex<Vec<(String, usize)>>,
    steers: Mutex<Vec<String>>,
    switched: Mutex<Vec<PathBuf>>,
    tool_results: Mutex<Vec<(String, Result<String, String>)>>,
    release: Notify,
    aborted: AtomicBool,
    running: AtomicBool,
}

fn locked<T: Clone>(m: &Mutex<T>) -> T {
    m.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

impl MockSession {
    /// Prompt texts received, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        locked(&self.prompts).into_iter().map(|(t, _)| t).collect()
    }

    pub fn image_counts(&self) -> Vec<usize> {
        locked(&self.prompts).into_iter().map(|(_, n)| n).collect()
    }

    pub fn steers(&self) -> Vec<String> {
        locked(&self.steers)
    }

    pub fn switched(&self) -> Vec<PathBuf> {
        locked(&self.switched)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn tool_results(&self) -> Vec<(String, Result<String, String>)> {
        locked(&self.tool_results)
    }

    pub fn thinking(&self) -> ThinkingLevel {
        locked(&self.thinking)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Unblock a `Step::Hold`.
    pub fn release(&self) {
        self.release.notify_one();
    }

    /// Push a raw event into the feed, bypassing any turn.
    pub fn emit(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }

    async fn run_steps(&self, steps: Vec<Step>) -> Option<String> {
        for (i, step) in steps.into_iter().enumerate() {
            if self.aborted.load(Ordering::SeqCst) {
                return None;
            }
            match step {
                Step::Text(t) => self.emit(AgentEvent::TextDelta(t)),
                Step::Tool { name, args } => {
                    let call_id = format!("call-{}", i);
                    self.emit(AgentEvent::ToolStart {
                        call_id: call_id.clone(),
                        name: name.clone(),
                        args: args.clone(),
                    });
                    let result = match self.tools.iter().find(|t| t.name() == name) {
                        Some(tool) => tool.execute(&call_id, args).await.map_err(|e| e.to_string()),
                        None => Err(format!("unknown tool {}", name)),
                    };
                    self.emit(AgentEvent::ToolEnd {
                        call_id,
                        name: name.clone(),
                        is_error: result.is_err(),
                    });
                    self.tool_results
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push((name, result));
                }
                Step::Hold => self.release.notified().await,
                Step::Fail(message) => return Some(message),
            }
        }
        None
    }
}

#[async_trait]
impl AgentSession for MockSession {
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<AgentEvent>> {
        self.rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    async fn prompt(&self, text: &str, images: Vec<ImageAttachment>) -> anyhow::Result<()> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((text.to_string(), images.len()));
        self.aborted.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let steps = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| vec![Step::Text(format!("echo: {}", text))]);

        self.emit(AgentEvent::TurnStart);
        let failure = self.run_steps(steps).await;
        self.emit(AgentEvent::TurnEnd {
            error_message: failure.clone(),
        });
        self.running.store(false, Ordering::SeqCst);
        match failure {
            Some(message) => Err(anyhow::anyhow!(message)),
            None => Ok(()),
        }
    }

    async fn abort(&self) -> anyhow::Result<()> {
        self.aborted.store(true, Ordering::SeqCst);
        self.release.notify_one();
        Ok(())
    }

    fn supports_steer(&self) -> bool {
        self.steer
    }

    async fn steer(&self, text: &str) -> anyhow::Result<()> {
        if !self.steer {
            anyhow::bail!("steering is not supported by this runtime");
        }
        self.steers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        Ok(())
    }

    fn model(&self) -> String {
        locked(&self.model)
    }

    async fn set_model(&self, model: &str) -> anyhow::Result<()> {
        *self.model.lock().unwrap_or_else(|e| e.into_inner()) = model.to_string();
        Ok(())
    }

    async fn set_thinking_level(&self, level: ThinkingLevel) -> anyhow::Result<()> {
        *self.thinking.lock().unwrap_or_else(|e| e.into_inner()) = level;
        Ok(())
    }

    async fn switch_session(&self, path: &Path) -> anyhow::Result<()> {
        self.switched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.to_path_buf());
        Ok(())
    }

    fn session_file(&self) -> Option<PathBuf> {
        locked(&self.switched).last().cloned()
    }
}

//! Chat ↔ tmux bridge for one conversation.
//!
//! Two loops share the same primitives (send keys, press enter, wait, capture):
//!
//! - managed: text goes to the session picked with `/tmux select`, and the
//!   previous capture message is edited in place.
//! - direct topic: a thread named after the topic prefix types straight into
//!   a terminal; the previous capture is deleted and a fresh one sent.
//!
//! Both check that the session still exists before typing, and re-prompt
//! for a selection when it is gone.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::channels::formatting::{code_block, truncate_tail};
use crate::config::TmuxConfig;
use crate::session::TopicBinding;
use crate::traits::{Channel, Terminal, TerminalSession};
use crate::types::{Button, ConversationRef, MessageRef};

#[derive(Debug, Default, Clone)]
pub struct TmuxBridgeState {
    pub selected: Option<String>,
    /// Plain text goes to the selected session instead of the agent.
    pub direct_mode: bool,
    pub last_capture: Option<MessageRef>,
}

/// How a capture replaces the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Redisplay {
    Edit,
    Replace,
}

pub struct TmuxBridge {
    terminal: Arc<dyn Terminal>,
    channel: Arc<dyn Channel>,
    conv: ConversationRef,
    config: TmuxConfig,
    state: Mutex<TmuxBridgeState>,
}

impl TmuxBridge {
    pub fn new(
        terminal: Arc<dyn Terminal>,
        channel: Arc<dyn Channel>,
        conv: ConversationRef,
        config: TmuxConfig,
    ) -> Self {
        Self {
            terminal,
            channel,
            conv,
            config,
            state: Mutex::new(TmuxBridgeState::default()),
        }
    }

    pub fn terminal(&self) -> &Arc<dyn Terminal> {
        &self.terminal
    }

    pub async fn state(&self) -> TmuxBridgeState {
        self.state.lock().await.clone()
    }

    pub async fn selected(&self) -> Option<String> {
        self.state.lock().await.selected.clone()
    }

    pub async fn direct_mode(&self) -> bool {
        self.state.lock().await.direct_mode
    }

    /// Turning direct mode on requires a selected session.
    pub async fn set_direct_mode(&self, on: bool) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if on && state.selected.is_none() {
            anyhow::bail!("Select a session first with /tmux select <name>.");
        }
        state.direct_mode = on;
        Ok(())
    }

    pub async fn clear(&self) {
        *self.state.lock().await = TmuxBridgeState::default();
    }

    pub async fn list(&self) -> anyhow::Result<Vec<TerminalSession>> {
        self.terminal.list_sessions().await
    }

    pub async fn select(&self, name: &str) -> anyhow::Result<()> {
        if !self.terminal.has_session(name).await? {
            anyhow::bail!("No tmux session named {}.", name);
        }
        let mut state = self.state.lock().await;
        state.selected = Some(name.to_string());
        state.last_capture = None;
        info!(conversation = %self.conv.key(), session = name, "Selected tmux session");
        Ok(())
    }

    pub async fn new_session(&self, name: &str, command: Option<&str>) -> anyhow::Result<()> {
        validate_session_name(name)?;
        if self.terminal.has_session(name).await? {
            anyhow::bail!("A tmux session named {} already exists.", name);
        }
        self.terminal.new_session(name, command).await?;
        self.select(name).await
    }

    pub async fn kill_session(&self, name: &str) -> anyhow::Result<()> {
        self.terminal.kill_session(name).await?;
        let mut state = self.state.lock().await;
        if state.selected.as_deref() == Some(name) {
            *state = TmuxBridgeState::default();
        }
        Ok(())
    }

    /// Managed mode: type into the selected session, then edit the capture.
    pub async fn send_managed(&self, text: &str) -> anyhow::Result<()> {
        let Some(session) = self.live_selection().await? else {
            return self.prompt_selection("No tmux session selected.").await;
        };
        self.type_line(&session, text).await?;
        self.settle().await;
        self.show_capture(&session, Redisplay::Edit).await
    }

    /// Direct-topic mode: resolve the session from the topic binding (or the
    /// selection made from this topic), type, then replace the capture.
    pub async fn send_direct(&self, text: &str, binding: &TopicBinding) -> anyhow::Result<()> {
        let session = match binding {
            TopicBinding::Session(name) => {
                if self.terminal.has_session(name).await? {
                    let mut state = self.state.lock().await;
                    if state.selected.as_deref() != Some(name) {
                        state.selected = Some(name.clone());
                        state.last_capture = None;
                    }
                    Some(name.clone())
                } else {
                    self.forget_selection().await;
                    return self
                        .prompt_selection(&format!("tmux session {} does not exist.", name))
                        .await;
                }
            }
            TopicBinding::Unbound => self.live_selection().await?,
            TopicBinding::None => None,
        };
        let Some(session) = session else {
            return self.prompt_selection("Pick a tmux session for this topic.").await;
        };
        self.type_line(&session, text).await?;
        self.settle().await;
        self.show_capture(&session, Redisplay::Replace).await
    }

    /// Show the pane of the selected session without typing anything.
    pub async fn capture(&self) -> anyhow::Result<()> {
        let Some(session) = self.live_selection().await? else {
            return self.prompt_selection("No tmux session selected.").await;
        };
        self.show_capture(&session, Redisplay::Edit).await
    }

    pub async fn ctrl_c(&self) -> anyhow::Result<()> {
        let Some(session) = self.live_selection().await? else {
            return self.prompt_selection("No tmux session selected.").await;
        };
        self.terminal.send_ctrl_c(&session).await?;
        self.settle().await;
        self.show_capture(&session, Redisplay::Edit).await
    }

    pub async fn enter(&self) -> anyhow::Result<()> {
        let Some(session) = self.live_selection().await? else {
            return self.prompt_selection("No tmux session selected.").await;
        };
        self.terminal.send_enter(&session).await?;
        self.settle().await;
        self.show_capture(&session, Redisplay::Edit).await
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let Some(session) = self.live_selection().await? else {
            return self.prompt_selection("No tmux session selected.").await;
        };
        self.terminal.resize_window(&session, cols, rows).await
    }

    /// Offer the existing sessions as a pick list.
    pub async fn prompt_selection(&self, reason: &str) -> anyhow::Result<()> {
        let sessions = self.terminal.list_sessions().await?;
        if sessions.is_empty() {
            let text = format!("{}\nNo tmux sessions. Create one with /tmux new <name>.", reason);
            self.channel.send_text(&self.conv, &text).await?;
            return Ok(());
        }
        if self.channel.capabilities().supports_buttons {
            let rows: Vec<Vec<Button>> = sessions
                .iter()
                .map(|s| vec![Button::new(session_label(s), format!("tmux:select:{}", s.name))])
                .collect();
            self.channel
                .send_buttons(&self.conv, &format!("{}\nSelect a session:", reason), &rows)
                .await?;
        } else {
            let names: Vec<String> = sessions.iter().map(|s| format!("• {}", session_label(s))).collect();
            let text = format!(
                "{}\n{}\nReply /tmux select <name>.",
                reason,
                names.join("\n")
            );
            self.channel.send_text(&self.conv, &text).await?;
        }
        Ok(())
    }

    /// The selected session, if it still exists. A vanished session clears
    /// the binding.
    async fn live_selection(&self) -> anyhow::Result<Option<String>> {
        let Some(session) = self.selected().await else {
            return Ok(None);
        };
        if self.terminal.has_session(&session).await? {
            Ok(Some(session))
        } else {
            warn!(conversation = %self.conv.key(), session = %session, "Selected tmux session disappeared");
            self.forget_selection().await;
            Ok(None)
        }
    }

    async fn forget_selection(&self) {
        let mut state = self.state.lock().await;
        state.selected = None;
        state.direct_mode = false;
        state.last_capture = None;
    }

    async fn type_line(&self, session: &str, text: &str) -> anyhow::Result<()> {
        let line = text.trim_end_matches('\n');
        if !line.is_empty() {
            self.terminal.send_keys(session, line, true).await?;
        }
        self.terminal.send_enter(session).await
    }

    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(self.config.refresh_delay_ms)).await;
    }

    async fn show_capture(&self, session: &str, mode: Redisplay) -> anyhow::Result<()> {
        let raw = self
            .terminal
            .capture_pane(session, self.config.capture_lines)
            .await?;
        let text = render_capture(session, &raw, self.channel.capabilities().max_message_len);
        let previous = self.state.lock().await.last_capture.take();
        let caps = self.channel.capabilities();

        let message = match (mode, previous) {
            (Redisplay::Edit, Some(previous)) if caps.supports_edit => {
                match self.channel.edit_text(&previous, &text).await {
                    Ok(()) => previous,
                    Err(e) => {
                        warn!(conversation = %self.conv.key(), "Capture edit failed, sending new: {}", e);
                        self.channel.send_text(&self.conv, &text).await?
                    }
                }
            }
            (Redisplay::Replace, Some(previous)) if caps.supports_delete => {
                if let Err(e) = self.channel.delete_message(&previous).await {
                    warn!(conversation = %self.conv.key(), "Failed to delete old capture: {}", e);
                }
                self.channel.send_text(&self.conv, &text).await?
            }
            _ => self.channel.send_text(&self.conv, &text).await?,
        };
        self.state.lock().await.last_capture = Some(message);
        Ok(())
    }
}

fn session_label(session: &TerminalSession) -> String {
    if session.attached {
        format!("{} ({}w, attached)", session.name, session.windows)
    } else {
        format!("{} ({}w)", session.name, session.windows)
    }
}

/// Pane text as a code block that fits one message, newest lines kept.
fn render_capture(session: &str, raw: &str, max_len: usize) -> String {
    let trimmed = raw.trim_end();
    let body = if trimmed.is_empty() { "(empty pane)" } else { trimmed };
    let header = format!("🖥 {}\n", session);
    // Fence plus header overhead.
    let budget = max_len.saturating_sub(header.chars().count() + 8).max(1);
    format!("{}{}", header, code_block(&truncate_tail(body, budget)))
}

pub(crate) fn validate_session_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        anyhow::bail!("Session names may only contain letters, digits, '-' and '_'.");
    }
    Ok(())
}

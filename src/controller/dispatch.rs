//! Command and callback handlers.

use std::sync::Arc;

use tracing::{info, warn};

use super::commands::{Callback, Command, PermissionsCommand, TmuxCommand};
use super::sessions::{list_saved_sessions, MAX_LISTED};
use super::{default_thinking, ChatController};
use crate::authorizer::{ApprovalDecision, ResolveOutcome};
use crate::channels::formatting::build_help_text;
use crate::permissions::{DefaultMode, PermissionConfig, PermissionLevel};
use crate::traits::ThinkingLevel;
use crate::types::Button;

const BUSY: &str = "⏳ The agent is busy. Wait for the turn to end or /abort it first.";

const PERMISSIONS_USAGE: &str = "Usage:\n\
     /permissions\n\
     /permissions allow|ask|deny <rule>\n\
     /permissions remove <rule>\n\
     /permissions mode [default|acceptEdits|dontAsk|bypassPermissions]\n\
     /permissions reset";

const TMUX_USAGE: &str = "Usage:\n\
     /tmux list\n\
     /tmux select <name>\n\
     /tmux new <name> [command]\n\
     /tmux kill <name>\n\
     /tmux capture\n\
     /tmux on|off\n\
     /tmux ctrlc | /tmux enter\n\
     /tmux resize <cols> <rows>";

impl ChatController {
    async fn reply(&self, text: &str) {
        self.sink.notice(text).await;
    }

    async fn acknowledge(&self, action_id: &str, text: Option<&str>) {
        if let Err(e) = self.deps.channel.acknowledge(action_id, text).await {
            warn!(conversation = %self.key, "Failed to acknowledge action: {}", e);
        }
    }

    pub(super) async fn handle_command(self: &Arc<Self>, command: Command) -> anyhow::Result<()> {
        if command.is_blocked_while_running() && self.is_running() {
            self.reply(BUSY).await;
            return Ok(());
        }

        match command {
            Command::Help => self.reply(&build_help_text("/")).await,
            Command::Sessions => self.show_sessions().await?,
            Command::Resume(arg) => {
                let n = arg
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| anyhow::anyhow!("Usage: /resume <n>. See /sessions for the list."))?;
                self.resume(n).await?;
            }
            Command::New => {
                self.dispose().await;
                self.init(false).await?;
                self.reply("🆕 Started a new session.").await;
            }
            Command::Reset => self.reset().await?,
            Command::Abort => self.abort().await,
            Command::Model(None) => self.show_model().await,
            Command::Model(Some(name)) => self.set_model(&name).await?,
            Command::Thinking(level) => self.thinking(level).await?,
            Command::Permissions(sub) => self.permissions(sub).await?,
            Command::Tmux(sub) => self.tmux_command(sub).await?,
            Command::Approve(id) => {
                self.resolve_authorization(None, &id, ApprovalDecision::Approve)
                    .await
            }
            Command::Deny(id) => self.resolve_authorization(None, &id, ApprovalDecision::Deny).await,
            Command::Unknown(name) => {
                self.reply(&format!(
                    "Unknown command: /{}\nType /help for the list of commands.",
                    name
                ))
                .await
            }
        }
        Ok(())
    }

    pub(super) async fn handle_callback(
        self: &Arc<Self>,
        action_id: String,
        callback: Callback,
    ) -> anyhow::Result<()> {
        match callback {
            Callback::Allow(id) => {
                self.resolve_authorization(Some(&action_id), &id, ApprovalDecision::Approve)
                    .await
            }
            Callback::Always(id) => {
                self.resolve_authorization(Some(&action_id), &id, ApprovalDecision::AlwaysAllow)
                    .await
            }
            Callback::Deny(id) => {
                self.resolve_authorization(Some(&action_id), &id, ApprovalDecision::Deny)
                    .await
            }
            Callback::TmuxSelect(name) => {
                let selected = self.tmux.select(&name).await;
                self.acknowledge(&action_id, None).await;
                match selected {
                    Ok(()) => self.reply(&format!("🖥 Selected {}.", name)).await,
                    Err(e) => {
                        self.tmux
                            .prompt_selection(&format!("⚠️ {}", e))
                            .await?
                    }
                }
            }
            Callback::Resume(n) => {
                self.acknowledge(&action_id, None).await;
                if self.is_running() {
                    self.reply(BUSY).await;
                } else {
                    self.resume(n).await?;
                }
            }
            Callback::Model(name) => {
                self.acknowledge(&action_id, None).await;
                if self.is_running() {
                    self.reply(BUSY).await;
                } else {
                    self.set_model(&name).await?;
                }
            }
            Callback::Unknown(data) => {
                warn!(conversation = %self.key, data = %data, "Unknown callback");
                self.acknowledge(&action_id, Some("Unknown action")).await;
            }
        }
        Ok(())
    }

    /// Answer a pending approval. An empty id picks the oldest pending one.
    async fn resolve_authorization(
        &self,
        action_id: Option<&str>,
        auth_id: &str,
        decision: ApprovalDecision,
    ) {
        let auth_id = match auth_id.trim() {
            "" => match self.authorizer.pending_ids().await.into_iter().next() {
                Some(id) => id,
                None => {
                    self.reply("Nothing is waiting for approval.").await;
                    return;
                }
            },
            id => id.to_string(),
        };

        match self.authorizer.resolve(&auth_id, decision).await {
            ResolveOutcome::Expired => match action_id {
                Some(action_id) => {
                    self.acknowledge(action_id, Some("This request has expired."))
                        .await
                }
                None => {
                    self.reply(&format!(
                        "⏱ No pending approval {}. It may have expired.",
                        auth_id
                    ))
                    .await
                }
            },
            ResolveOutcome::Resolved { tool, new_rule } => {
                if let Some(action_id) = action_id {
                    let toast = match decision {
                        ApprovalDecision::Deny => "Denied",
                        _ => "Approved",
                    };
                    self.acknowledge(action_id, Some(toast)).await;
                }
                let Some(rule) = new_rule else {
                    if decision == ApprovalDecision::AlwaysAllow {
                        self.reply(
                            "ℹ️ Approved this call only. It contains wildcard characters, so no rule was saved.",
                        )
                        .await;
                    }
                    return;
                };
                match self
                    .update_permissions(|c| c.add_rule(PermissionLevel::Allow, &rule))
                    .await
                {
                    Ok(_) => {
                        info!(conversation = %self.key, tool = %tool, rule = %rule, "Added allow rule from approval");
                        self.reply(&format!("✅ Added allow rule: {}", rule)).await;
                    }
                    Err(e) => {
                        self.reply(&format!("❌ Failed to save allow rule {}: {}", rule, e))
                            .await
                    }
                }
            }
        }
    }

    /// Apply `f` to a copy of the policy, persist it, then swap it in.
    async fn update_permissions<T>(
        &self,
        f: impl FnOnce(&mut PermissionConfig) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let _guard = self.permissions_lock.lock().await;
        let mut config = self.evaluator.config();
        let out = f(&mut config)?;
        self.deps.permissions.save(&self.key, &config).await?;
        self.evaluator.replace(config);
        Ok(out)
    }

    async fn show_sessions(&self) -> anyhow::Result<()> {
        let saved = list_saved_sessions(&self.session_dir).await?;
        if saved.is_empty() {
            self.reply("No saved sessions.").await;
            return Ok(());
        }
        let saved: Vec<_> = saved.into_iter().take(MAX_LISTED).collect();
        let lines: Vec<String> = saved
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, s.label()))
            .collect();
        let text = format!("📂 Saved sessions\n{}", lines.join("\n"));

        if self.deps.channel.capabilities().supports_buttons {
            let rows: Vec<Vec<Button>> = (1..=saved.len())
                .map(|n| vec![Button::new(format!("Resume {}", n), format!("resume:{}", n))])
                .collect();
            self.deps
                .channel
                .send_buttons(&self.conv, &text, &rows)
                .await?;
        } else {
            self.reply(&format!("{}\nReply /resume <n>.", text)).await;
        }
        Ok(())
    }

    async fn resume(self: &Arc<Self>, n: usize) -> anyhow::Result<()> {
        let saved = list_saved_sessions(&self.session_dir).await?;
        let Some(target) = n.checked_sub(1).and_then(|i| saved.get(i)) else {
            anyhow::bail!("No saved session {}. See /sessions for the list.", n);
        };
        let (session, _) = self.init(false).await?;
        session.switch_session(&target.path).await?;
        info!(conversation = %self.key, path = %target.path.display(), "Switched session");
        self.reply(&format!("📂 Resumed {}", target.label())).await;
        Ok(())
    }

    async fn reset(self: &Arc<Self>) -> anyhow::Result<()> {
        self.dispose().await;
        self.tmux.clear().await;
        self.agent.lock().await.thinking = default_thinking(&self.deps.config);
        self.reload_permissions().await;
        self.init(false).await?;
        info!(conversation = %self.key, "Conversation reset");
        self.reply("🔄 Conversation reset. Started a new session.").await;
        Ok(())
    }

    async fn abort(self: &Arc<Self>) {
        let (session, id) = {
            let mut turn = self.turn.lock().await;
            if !turn.running {
                drop(turn);
                self.reply("Nothing is running.").await;
                return;
            }
            turn.queued = None;
            // The runtime's "aborted" error is expected, not news.
            turn.reported = turn.turn;
            (self.agent.lock().await.session.clone(), turn.turn)
        };
        if let Some(session) = session {
            if let Err(e) = session.abort().await {
                warn!(conversation = %self.key, "Abort failed: {}", e);
            }
        }
        self.authorizer.dispose().await;
        self.finish_turn(id, None).await;
        info!(conversation = %self.key, turn = id, "Aborted turn");
        self.reply("⏹ Aborted.").await;
    }

    async fn current_model(&self) -> String {
        match &self.agent.lock().await.session {
            Some(session) => session.model(),
            None => self.deps.config.agent.default_model.clone(),
        }
    }

    async fn show_model(&self) {
        let current = self.current_model().await;
        let models = self.deps.runtime.available_models();
        let text = format!("🧠 Model: {}", current);
        if models.is_empty() {
            self.reply(&text).await;
            return;
        }
        if self.deps.channel.capabilities().supports_buttons {
            let rows: Vec<Vec<Button>> = models
                .iter()
                .map(|m| {
                    let label = if *m == current { format!("• {}", m) } else { m.clone() };
                    vec![Button::new(label, format!("model:{}", m))]
                })
                .collect();
            if let Err(e) = self.deps.channel.send_buttons(&self.conv, &text, &rows).await {
                warn!(conversation = %self.key, "Failed to send model list: {}", e);
            }
        } else {
            self.reply(&format!("{}\nAvailable: {}", text, models.join(", ")))
                .await;
        }
    }

    async fn set_model(self: &Arc<Self>, name: &str) -> anyhow::Result<()> {
        let models = self.deps.runtime.available_models();
        if !models.is_empty() && !models.iter().any(|m| m == name) {
            anyhow::bail!("Unknown model {}. Available: {}", name, models.join(", "));
        }
        let (session, _) = self.init(true).await?;
        session.set_model(name).await?;
        info!(conversation = %self.key, model = name, "Model switched");
        self.reply(&format!("🧠 Model set to {}", name)).await;
        Ok(())
    }

    async fn thinking(self: &Arc<Self>, level: Option<String>) -> anyhow::Result<()> {
        let Some(raw) = level else {
            let current = self.agent.lock().await.thinking;
            let all: Vec<String> = ThinkingLevel::ALL.iter().map(|l| l.to_string()).collect();
            self.reply(&format!("💭 Thinking: {}\nLevels: {}", current, all.join(", ")))
                .await;
            return Ok(());
        };
        let Some(level) = ThinkingLevel::parse(&raw) else {
            let all: Vec<String> = ThinkingLevel::ALL.iter().map(|l| l.to_string()).collect();
            anyhow::bail!("Unknown thinking level {}. Use one of: {}", raw, all.join(", "));
        };
        let (session, _) = self.init(true).await?;
        session.set_thinking_level(level).await?;
        self.agent.lock().await.thinking = level;
        self.reply(&format!("💭 Thinking set to {}", level)).await;
        Ok(())
    }

    async fn permissions(&self, command: PermissionsCommand) -> anyhow::Result<()> {
        match command {
            PermissionsCommand::Show => {
                let summary = self.evaluator.config().summary();
                self.reply(&format!("🔐 Permissions\n{}", summary)).await;
            }
            PermissionsCommand::Add(level, rule) => {
                let added = self.update_permissions(|c| c.add_rule(level, &rule)).await?;
                if added {
                    self.reply(&format!("Added {} rule: {}", level, rule)).await;
                } else {
                    self.reply(&format!("{} rule already present: {}", level, rule))
                        .await;
                }
            }
            PermissionsCommand::Remove(rule) => {
                let removed = self.update_permissions(|c| Ok(c.remove_rule(&rule))).await?;
                if removed {
                    self.reply(&format!("Removed rule: {}", rule)).await;
                } else {
                    self.reply(&format!("No such rule: {}", rule)).await;
                }
            }
            PermissionsCommand::Mode(None) => {
                let current = self.evaluator.config().default_mode;
                let all: Vec<&str> = DefaultMode::ALL.iter().map(|m| m.as_str()).collect();
                self.reply(&format!("Default mode: {}\nModes: {}", current, all.join(", ")))
                    .await;
            }
            PermissionsCommand::Mode(Some(raw)) => {
                let Some(mode) = DefaultMode::parse(&raw) else {
                    anyhow::bail!("Unknown mode {}.\n{}", raw, PERMISSIONS_USAGE);
                };
                self.update_permissions(|c| {
                    c.default_mode = mode;
                    Ok(())
                })
                .await?;
                self.reply(&format!("Default mode set to {}", mode)).await;
            }
            PermissionsCommand::Reset => {
                self.update_permissions(|c| {
                    *c = PermissionConfig::default();
                    Ok(())
                })
                .await?;
                self.reply("Permissions reset to defaults.").await;
            }
            PermissionsCommand::Usage => self.reply(PERMISSIONS_USAGE).await,
        }
        Ok(())
    }

    async fn tmux_command(&self, command: TmuxCommand) -> anyhow::Result<()> {
        match command {
            TmuxCommand::List => {
                let reason = match self.tmux.selected().await {
                    Some(name) => format!("🖥 Selected: {}", name),
                    None => "🖥 No session selected.".to_string(),
                };
                self.tmux.prompt_selection(&reason).await?;
            }
            TmuxCommand::Select(name) => {
                self.tmux.select(&name).await?;
                self.reply(&format!(
                    "🖥 Selected {}. /tmux on sends plain messages to it.",
                    name
                ))
                .await;
            }
            TmuxCommand::New { name, command } => {
                self.tmux.new_session(&name, command.as_deref()).await?;
                self.reply(&format!("🖥 Created and selected {}.", name)).await;
            }
            TmuxCommand::Kill(name) => {
                self.tmux.kill_session(&name).await?;
                self.reply(&format!("Killed tmux session {}.", name)).await;
            }
            TmuxCommand::Capture => self.tmux.capture().await?,
            TmuxCommand::On => {
                self.tmux.set_direct_mode(true).await?;
                let name = self.tmux.selected().await.unwrap_or_default();
                self.reply(&format!(
                    "⌨️ Direct terminal mode on. Messages go to {}. /tmux off returns to the agent.",
                    name
                ))
                .await;
            }
            TmuxCommand::Off => {
                self.tmux.set_direct_mode(false).await?;
                self.reply("Direct terminal mode off.").await;
            }
            TmuxCommand::CtrlC => self.tmux.ctrl_c().await?,
            TmuxCommand::Enter => self.tmux.enter().await?,
            TmuxCommand::Resize { cols, rows } => {
                self.tmux.resize(cols, rows).await?;
                self.reply(&format!("Resized to {}x{}.", cols, rows)).await;
            }
            TmuxCommand::Usage => self.reply(TMUX_USAGE).await,
        }
        Ok(())
    }
}

//! Human-in-the-loop gate in front of every agent tool.
//!
//! Each call is evaluated first. "ask" parks the call in a pending table
//! keyed by authorization id until exactly one of three things happens: the
//! user answers, the deadline passes, or the conversation is disposed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::ToolError;
use crate::permissions::{primary_arg, PermissionEvaluator, PermissionLevel, ToolShape};
use crate::traits::{AgentTool, Channel};
use crate::types::{Button, ConversationRef, MessageRef};
use crate::utils::truncate_str;

/// The user's answer to an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    /// Approve, and add an allow rule so the same call never asks again.
    AlwaysAllow,
    Deny,
}

impl ApprovalDecision {
    fn caption(&self) -> &'static str {
        match self {
            ApprovalDecision::Approve => "✅ Approved",
            ApprovalDecision::AlwaysAllow => "✅ Always allowed",
            ApprovalDecision::Deny => "❌ Denied",
        }
    }
}

/// Result of feeding a decision to the authorizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved {
        tool: String,
        /// Allow rule to persist, set for `AlwaysAllow` unless the call
        /// cannot be written as a rule matching only itself.
        new_rule: Option<String>,
    },
    /// Unknown id: already answered, timed out, or never existed.
    Expired,
}

struct PendingAuthorization {
    tool: String,
    args: Value,
    call_id: String,
    description: String,
    deadline: Instant,
    message: Option<MessageRef>,
    tx: oneshot::Sender<ApprovalDecision>,
}

pub struct ToolAuthorizer {
    channel: Arc<dyn Channel>,
    conv: ConversationRef,
    evaluator: Arc<PermissionEvaluator>,
    timeout: Duration,
    command_prefix: String,
    pending: Mutex<HashMap<String, PendingAuthorization>>,
}

impl ToolAuthorizer {
    pub fn new(
        channel: Arc<dyn Channel>,
        conv: ConversationRef,
        evaluator: Arc<PermissionEvaluator>,
        timeout: Duration,
    ) -> Self {
        Self {
            channel,
            conv,
            evaluator,
            timeout,
            command_prefix: "/".to_string(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn evaluator(&self) -> &Arc<PermissionEvaluator> {
        &self.evaluator
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Ids of outstanding requests, soonest deadline first.
    pub async fn pending_ids(&self) -> Vec<String> {
        let pending = self.pending.lock().await;
        let mut entries: Vec<(&String, Instant)> =
            pending.iter().map(|(id, p)| (id, p.deadline)).collect();
        entries.sort_by_key(|(_, deadline)| *deadline);
        entries.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Decide whether a call may run, asking the user when the policy says so.
    pub async fn authorize(&self, call_id: &str, tool: &str, args: &Value) -> Result<(), ToolError> {
        let evaluation = self.evaluator.evaluate(tool, args);
        match evaluation.decision {
            PermissionLevel::Allow => Ok(()),
            PermissionLevel::Deny => {
                info!(conversation = %self.conv.key(), tool, rule = ?evaluation.rule, "Tool call denied by policy");
                Err(ToolError::PolicyViolation {
                    tool: tool.to_string(),
                    rule: evaluation.rule,
                })
            }
            PermissionLevel::Ask => self.ask(call_id, tool, args).await,
        }
    }

    async fn ask(&self, call_id: &str, tool: &str, args: &Value) -> Result<(), ToolError> {
        let description = describe_call(tool, args);
        let (tx, mut rx) = oneshot::channel();

        let auth_id = {
            let mut pending = self.pending.lock().await;
            if pending.values().any(|p| p.call_id == call_id) {
                return Err(ToolError::AlreadyPending);
            }
            let auth_id = loop {
                let id = uuid::Uuid::new_v4().simple().to_string();
                let short_id = id[..8].to_string();
                if !pending.contains_key(&short_id) {
                    break short_id;
                }
            };
            pending.insert(
                auth_id.clone(),
                PendingAuthorization {
                    tool: tool.to_string(),
                    args: args.clone(),
                    call_id: call_id.to_string(),
                    description: description.clone(),
                    deadline: Instant::now() + self.timeout,
                    message: None,
                    tx,
                },
            );
            info!(conversation = %self.conv.key(), auth_id = %auth_id, tool, pending_count = pending.len(), "Stored pending authorization");
            auth_id
        };

        let sent = if self.channel.capabilities().supports_buttons {
            let text = format!("🔐 Approval needed\n\n{}\n\n[{}]", description, auth_id);
            let buttons = vec![vec![
                Button::new("Approve", format!("allow:{}", auth_id)),
                Button::new("Always", format!("always:{}", auth_id)),
                Button::new("Deny", format!("deny:{}", auth_id)),
            ]];
            self.channel.send_buttons(&self.conv, &text, &buttons).await
        } else {
            let p = &self.command_prefix;
            let text = format!(
                "🔐 Approval needed\n\n{}\n\nReply {p}approve {id} or {p}deny {id}",
                description,
                id = auth_id
            );
            self.channel.send_text(&self.conv, &text).await
        };

        match sent {
            Ok(message) => {
                if let Some(entry) = self.pending.lock().await.get_mut(&auth_id) {
                    entry.message = Some(message);
                }
            }
            Err(e) => {
                warn!(auth_id = %auth_id, "Failed to send approval request: {}", e);
                // Nobody can answer a request they never saw.
                self.pending.lock().await.remove(&auth_id);
                return Err(ToolError::ApprovalDenied);
            }
        }

        match tokio::time::timeout(self.timeout, &mut rx).await {
            Ok(Ok(decision)) => decision_result(decision),
            Ok(Err(_)) => {
                info!(auth_id = %auth_id, "Authorization cancelled");
                Err(ToolError::Cancelled)
            }
            Err(_) => {
                let expired = self.pending.lock().await.remove(&auth_id);
                match expired {
                    Some(entry) => {
                        warn!(auth_id = %auth_id, tool, "Authorization timed out");
                        self.show_outcome(entry.message.as_ref(), "⏱ Expired", &entry.description)
                            .await;
                        Err(ToolError::ApprovalTimeout)
                    }
                    // An answer landed between the deadline and the removal.
                    None => match rx.try_recv() {
                        Ok(decision) => decision_result(decision),
                        Err(_) => Err(ToolError::ApprovalTimeout),
                    },
                }
            }
        }
    }

    /// Feed an answer for one authorization id. An id that is no longer
    /// pending reports `Expired` and changes nothing.
    pub async fn resolve(&self, auth_id: &str, decision: ApprovalDecision) -> ResolveOutcome {
        let Some(entry) = self.pending.lock().await.remove(auth_id) else {
            info!(auth_id, "Authorization callback for unknown or expired id");
            return ResolveOutcome::Expired;
        };
        info!(conversation = %self.conv.key(), auth_id, tool = %entry.tool, ?decision, "Authorization resolved");

        let new_rule = (decision == ApprovalDecision::AlwaysAllow)
            .then(|| allow_rule_for(&entry.tool, &entry.args, self.evaluator.cwd()))
            .flatten();
        let caption = match (decision, &new_rule) {
            (ApprovalDecision::AlwaysAllow, None) => "✅ Approved once",
            _ => decision.caption(),
        };
        let _ = entry.tx.send(decision);
        self.show_outcome(entry.message.as_ref(), caption, &entry.description)
            .await;

        ResolveOutcome::Resolved {
            tool: entry.tool,
            new_rule,
        }
    }

    /// Reject every outstanding request. Waiting calls fail with `Cancelled`.
    pub async fn dispose(&self) {
        let drained: Vec<PendingAuthorization> = {
            let mut pending = self.pending.lock().await;
            pending.drain().map(|(_, p)| p).collect()
        };
        if drained.is_empty() {
            return;
        }
        info!(conversation = %self.conv.key(), count = drained.len(), "Cancelling pending authorizations");
        for entry in drained {
            drop(entry.tx);
            self.show_outcome(entry.message.as_ref(), "⏹ Cancelled", &entry.description)
                .await;
        }
    }

    async fn show_outcome(&self, message: Option<&MessageRef>, caption: &str, description: &str) {
        let text = format!("{}\n\n{}", caption, description);
        let result = match message {
            Some(message) if self.channel.capabilities().supports_edit => {
                self.channel.edit_text(message, &text).await
            }
            _ => self.channel.send_text(&self.conv, &text).await.map(|_| ()),
        };
        if let Err(e) = result {
            warn!(conversation = %self.conv.key(), "Failed to show authorization outcome: {}", e);
        }
    }
}

fn decision_result(decision: ApprovalDecision) -> Result<(), ToolError> {
    match decision {
        ApprovalDecision::Approve | ApprovalDecision::AlwaysAllow => Ok(()),
        ApprovalDecision::Deny => Err(ToolError::ApprovalDenied),
    }
}

/// One-line human description of a tool call, e.g. "bash: `ls -la`".
pub fn describe_call(tool: &str, args: &Value) -> String {
    match (ToolShape::of(tool), primary_arg(tool, args)) {
        (ToolShape::Shell, Some(command)) => {
            format!("{}: `{}`", tool, truncate_str(&command, 300))
        }
        (_, Some(target)) => format!("{}: {}", tool, truncate_str(&target, 300)),
        (_, None) => {
            let raw = match args {
                Value::Object(map) if map.is_empty() => String::new(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            if raw.is_empty() {
                tool.to_string()
            } else {
                format!("{}: {}", tool, truncate_str(&raw, 200))
            }
        }
    }
}

/// The allow rule that makes exactly this call pass next time.
///
/// Rule specifiers are patterns with no escape syntax, so a command or path
/// holding wildcard characters would widen into a broader rule. Those calls
/// get `None`.
pub fn allow_rule_for(tool: &str, args: &Value, cwd: &std::path::Path) -> Option<String> {
    let tool = tool.to_ascii_lowercase();
    let rule = match (ToolShape::of(&tool), primary_arg(&tool, args)) {
        (ToolShape::Shell, Some(command)) => {
            let command = command.trim();
            if command.contains('*') {
                return None;
            }
            format!("{}({})", tool, command)
        }
        (ToolShape::File, Some(path)) => {
            if path.contains(['*', '?', '[', ']']) {
                return None;
            }
            // Specifier anchors: "//" absolute, "/" cwd-relative.
            let path = path.trim();
            let spec = match std::path::Path::new(path).strip_prefix(cwd) {
                Ok(rel) if path.starts_with('/') => format!("/{}", rel.display()),
                _ if path.starts_with('/') => format!("/{}", path),
                _ => path.to_string(),
            };
            format!("{}({})", tool, spec)
        }
        _ => tool,
    };
    Some(rule)
}

/// An agent tool whose execution first passes through the authorizer.
pub struct AuthorizedTool {
    inner: Arc<dyn AgentTool>,
    authorizer: Arc<ToolAuthorizer>,
}

impl AuthorizedTool {
    pub fn wrap(inner: Arc<dyn AgentTool>, authorizer: Arc<ToolAuthorizer>) -> Arc<dyn AgentTool> {
        Arc::new(Self { inner, authorizer })
    }
}

#[async_trait]
impl AgentTool for AuthorizedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn schema(&self) -> Value {
        self.inner.schema()
    }

    async fn execute(&self, call_id: &str, args: Value) -> anyhow::Result<String> {
        self.authorizer
            .authorize(call_id, self.inner.name(), &args)
            .await?;
        self.inner.execute(call_id, args).await
    }
}

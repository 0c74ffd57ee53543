use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::bridge::validate_session_name;
use crate::traits::{AgentTool, Terminal};
use crate::utils::truncate_tail;

/// Largest capture an agent tool hands back, in characters.
const MAX_TOOL_OUTPUT: usize = 20_000;

fn required_str<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    args[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {}", key))
}

/// The agent-facing tmux tools, sharing one terminal.
pub fn tmux_tools(terminal: Arc<dyn Terminal>, capture_lines: usize) -> Vec<Arc<dyn AgentTool>> {
    vec![
        Arc::new(TmuxListTool {
            terminal: terminal.clone(),
        }),
        Arc::new(TmuxNewTool {
            terminal: terminal.clone(),
        }),
        Arc::new(TmuxKillTool {
            terminal: terminal.clone(),
        }),
        Arc::new(TmuxSendKeysTool {
            terminal: terminal.clone(),
        }),
        Arc::new(TmuxCaptureTool {
            terminal,
            default_lines: capture_lines,
        }),
    ]
}

pub struct TmuxListTool {
    terminal: Arc<dyn Terminal>,
}

#[async_trait]
impl AgentTool for TmuxListTool {
    fn name(&self) -> &str {
        "tmux_list"
    }

    fn description(&self) -> &str {
        "List tmux sessions on the shared terminal server"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "tmux_list",
            "description": "List tmux sessions on the shared terminal server, with window count and whether a client is attached.",
            "parameters": {
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }
        })
    }

    async fn execute(&self, _call_id: &str, _args: Value) -> anyhow::Result<String> {
        let sessions = self.terminal.list_sessions().await?;
        if sessions.is_empty() {
            return Ok("No tmux sessions.".to_string());
        }
        let lines: Vec<String> = sessions
            .iter()
            .map(|s| {
                format!(
                    "{}\t{} window(s){}",
                    s.name,
                    s.windows,
                    if s.attached { "\tattached" } else { "" }
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

pub struct TmuxNewTool {
    terminal: Arc<dyn Terminal>,
}

#[async_trait]
impl AgentTool for TmuxNewTool {
    fn name(&self) -> &str {
        "tmux_new"
    }

    fn description(&self) -> &str {
        "Create a detached tmux session, optionally running a command"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "tmux_new",
            "description": "Create a detached tmux session. Use this for long-running processes (dev servers, builds) that should outlive a single command.",
            "parameters": {
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Session name (letters, digits, '-' and '_')"
                    },
                    "command": {
                        "type": "string",
                        "description": "Command to run in the session (default: a shell)"
                    }
                },
                "required": ["name"],
                "additionalProperties": false
            }
        })
    }

    async fn execute(&self, _call_id: &str, args: Value) -> anyhow::Result<String> {
        let name = required_str(&args, "name")?;
        validate_session_name(name)?;
        if self.terminal.has_session(name).await? {
            anyhow::bail!("tmux session {} already exists", name);
        }
        let command = args["command"].as_str();
        self.terminal.new_session(name, command).await?;
        Ok(format!("Created tmux session {}", name))
    }
}

pub struct TmuxKillTool {
    terminal: Arc<dyn Terminal>,
}

#[async_trait]
impl AgentTool for TmuxKillTool {
    fn name(&self) -> &str {
        "tmux_kill"
    }

    fn description(&self) -> &str {
        "Kill a tmux session"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "tmux_kill",
            "description": "Kill a tmux session and every process running in it.",
            "parameters": {
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Session name"}
                },
                "required": ["name"],
                "additionalProperties": false
            }
        })
    }

    async fn execute(&self, _call_id: &str, args: Value) -> anyhow::Result<String> {
        let name = required_str(&args, "name")?;
        if !self.terminal.has_session(name).await? {
            anyhow::bail!("No tmux session named {}", name);
        }
        self.terminal.kill_session(name).await?;
        Ok(format!("Killed tmux session {}", name))
    }
}

pub struct TmuxSendKeysTool {
    terminal: Arc<dyn Terminal>,
}

#[async_trait]
impl AgentTool for TmuxSendKeysTool {
    fn name(&self) -> &str {
        "tmux_send_keys"
    }

    fn description(&self) -> &str {
        "Type text into a tmux session"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "tmux_send_keys",
            "description": "Type text into a tmux session. Text is sent literally; set enter to submit it. Use keys for named keys like C-c or Escape.",
            "parameters": {
                "type": "object",
                "properties": {
                    "target": {"type": "string", "description": "Session name"},
                    "text": {"type": "string", "description": "Literal text to type"},
                    "keys": {"type": "string", "description": "A tmux key name sent after text, e.g. C-c"},
                    "enter": {"type": "boolean", "description": "Press Enter afterwards (default: true)"}
                },
                "required": ["target"],
                "additionalProperties": false
            }
        })
    }

    async fn execute(&self, _call_id: &str, args: Value) -> anyhow::Result<String> {
        let target = required_str(&args, "target")?;
        if !self.terminal.has_session(target).await? {
            anyhow::bail!("No tmux session named {}", target);
        }
        let text = args["text"].as_str().unwrap_or("");
        let keys = args["keys"].as_str().unwrap_or("").trim();
        if text.is_empty() && keys.is_empty() && args["enter"].as_bool() == Some(false) {
            anyhow::bail!("Nothing to send: provide text, keys or enter");
        }
        if !text.is_empty() {
            self.terminal.send_keys(target, text, true).await?;
        }
        if !keys.is_empty() {
            self.terminal.send_keys(target, keys, false).await?;
        }
        if args["enter"].as_bool().unwrap_or(true) {
            self.terminal.send_enter(target).await?;
        }
        Ok(format!("Sent input to {}", target))
    }
}

pub struct TmuxCaptureTool {
    terminal: Arc<dyn Terminal>,
    default_lines: usize,
}

#[async_trait]
impl AgentTool for TmuxCaptureTool {
    fn name(&self) -> &str {
        "tmux_capture"
    }

    fn description(&self) -> &str {
        "Read the current contents of a tmux pane"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "tmux_capture",
            "description": "Read the visible contents of a tmux pane plus recent scrollback.",
            "parameters": {
                "type": "object",
                "properties": {
                    "target": {"type": "string", "description": "Session name"},
                    "lines": {"type": "integer", "description": "Scrollback lines to include"}
                },
                "required": ["target"],
                "additionalProperties": false
            }
        })
    }

    async fn execute(&self, _call_id: &str, args: Value) -> anyhow::Result<String> {
        let target = required_str(&args, "target")?;
        if !self.terminal.has_session(target).await? {
            anyhow::bail!("No tmux session named {}", target);
        }
        let lines = args["lines"]
            .as_u64()
            .map(|n| n.min(10_000) as usize)
            .unwrap_or(self.default_lines);
        let output = self.terminal.capture_pane(target, lines).await?;
        Ok(truncate_tail(output.trim_end(), MAX_TOOL_OUTPUT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTerminal;

    fn tool(name: &str, terminal: Arc<MockTerminal>) -> Arc<dyn AgentTool> {
        tmux_tools(terminal, 60)
            .into_iter()
            .find(|t| t.name() == name)
            .unwrap()
    }

    #[test]
    fn all_five_tools_are_exposed() {
        let names: Vec<String> = tmux_tools(Arc::new(MockTerminal::default()), 60)
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["tmux_list", "tmux_new", "tmux_kill", "tmux_send_keys", "tmux_capture"]
        );
    }

    #[tokio::test]
    async fn new_send_capture_kill() {
        let terminal = Arc::new(MockTerminal::default());
        tool("tmux_new", terminal.clone())
            .execute("1", json!({"name": "srv"}))
            .await
            .unwrap();
        assert!(tool("tmux_list", terminal.clone())
            .execute("2", json!({}))
            .await
            .unwrap()
            .starts_with("srv"));

        tool("tmux_send_keys", terminal.clone())
            .execute("3", json!({"target": "srv", "text": "npm start"}))
            .await
            .unwrap();
        let pane = tool("tmux_capture", terminal.clone())
            .execute("4", json!({"target": "srv"}))
            .await
            .unwrap();
        assert!(pane.contains("$ npm start"));

        tool("tmux_kill", terminal.clone())
            .execute("5", json!({"name": "srv"}))
            .await
            .unwrap();
        assert_eq!(
            tool("tmux_list", terminal).execute("6", json!({})).await.unwrap(),
            "No tmux sessions."
        );
    }

    #[tokio::test]
    async fn missing_target_is_an_error() {
        let terminal = Arc::new(MockTerminal::default());
        let err = tool("tmux_capture", terminal)
            .execute("1", json!({"target": "nope"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No tmux session named nope"));
    }

    #[test]
    fn schemas_name_themselves() {
        for t in tmux_tools(Arc::new(MockTerminal::default()), 60) {
            assert_eq!(t.schema()["name"], t.name());
        }
    }
}

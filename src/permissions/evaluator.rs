use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::patterns::{bash_glob_regex, domain_matches, path_matches};
use super::rules::{DefaultMode, PermissionConfig, PermissionLevel, PermissionRule};

const SHELL_TOOLS: &[&str] = &["bash", "shell"];
const FILE_TOOLS: &[&str] = &["read", "write", "edit", "ls", "find", "grep"];
const NETWORK_TOOLS: &[&str] = &["webfetch", "web_fetch", "fetch"];
/// Content-mutating tools, allowed outright under `acceptEdits`.
const EDIT_TOOLS: &[&str] = &["write", "edit"];
/// Tools that ask under the `default` mode when no rule matched.
pub const SENSITIVE_TOOLS: &[&str] = &[
    "bash",
    "write",
    "edit",
    "tmux_new",
    "tmux_kill",
    "tmux_send_keys",
];

/// How a tool's arguments are interpreted by rule specifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolShape {
    Shell,
    File,
    Network,
    Other,
}

impl ToolShape {
    pub fn of(tool_name: &str) -> Self {
        let name = tool_name.to_ascii_lowercase();
        if SHELL_TOOLS.contains(&name.as_str()) {
            ToolShape::Shell
        } else if FILE_TOOLS.contains(&name.as_str()) {
            ToolShape::File
        } else if NETWORK_TOOLS.contains(&name.as_str()) {
            ToolShape::Network
        } else {
            ToolShape::Other
        }
    }
}

/// The primary argument a rule specifier is matched against.
pub fn primary_arg(tool_name: &str, args: &Value) -> Option<String> {
    let key_order: &[&str] = match ToolShape::of(tool_name) {
        ToolShape::Shell => &["command"],
        ToolShape::File => &["path", "file_path"],
        ToolShape::Network => &["url"],
        ToolShape::Other => return None,
    };
    key_order
        .iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub decision: PermissionLevel,
    /// The rule that decided, or None when the default mode did.
    pub rule: Option<String>,
}

struct CompiledRule {
    rule: PermissionRule,
    command: Option<Regex>,
}

impl CompiledRule {
    fn matches(&self, tool_name: &str, args: &Value, cwd: &Path, home: &Path) -> bool {
        if !self.rule.matches_tool(tool_name) {
            return false;
        }
        let Some(spec) = self.rule.specifier.as_deref() else {
            return true;
        };
        match ToolShape::of(tool_name) {
            ToolShape::Shell => match (&self.command, primary_arg(tool_name, args)) {
                (Some(re), Some(command)) => re.is_match(command.trim()),
                _ => false,
            },
            ToolShape::File => primary_arg(tool_name, args)
                .is_some_and(|path| path_matches(spec, &path, cwd, home)),
            ToolShape::Network => {
                primary_arg(tool_name, args).is_some_and(|url| domain_matches(spec, &url))
            }
            ToolShape::Other => serde_json::to_string(args)
                .map(|raw| raw.contains(spec))
                .unwrap_or(false),
        }
    }
}

/// A fully compiled PermissionConfig. Never mutated after construction.
struct Policy {
    config: PermissionConfig,
    levels: Vec<(PermissionLevel, Vec<CompiledRule>)>,
}

impl Policy {
    fn compile(config: PermissionConfig) -> Self {
        let levels = PermissionLevel::ORDER
            .into_iter()
            .map(|level| {
                let rules = config
                    .rules(level)
                    .iter()
                    .filter_map(|raw| match PermissionRule::parse(level, raw) {
                        Ok(rule) => {
                            let command = rule.specifier.as_deref().and_then(bash_glob_regex);
                            Some(CompiledRule { rule, command })
                        }
                        Err(e) => {
                            warn!(rule = %raw, level = %level, "Skipping unparseable permission rule: {}", e);
                            None
                        }
                    })
                    .collect();
                (level, rules)
            })
            .collect();
        Self { config, levels }
    }
}

/// Answers allow/ask/deny for tool calls in one conversation.
///
/// The compiled policy sits behind an `Arc` that is swapped whole on
/// reload, so an evaluation in flight keeps the snapshot it started with.
pub struct PermissionEvaluator {
    policy: RwLock<Arc<Policy>>,
    cwd: PathBuf,
    home: PathBuf,
}

impl PermissionEvaluator {
    pub fn new(config: PermissionConfig, cwd: PathBuf, home: PathBuf) -> Self {
        Self {
            policy: RwLock::new(Arc::new(Policy::compile(config))),
            cwd,
            home,
        }
    }

    /// Swap in a new policy.
    pub fn replace(&self, config: PermissionConfig) {
        let compiled = Arc::new(Policy::compile(config));
        let mut policy = self.policy.write().unwrap_or_else(|e| e.into_inner());
        *policy = compiled;
    }

    pub fn config(&self) -> PermissionConfig {
        self.snapshot().config.clone()
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    fn snapshot(&self) -> Arc<Policy> {
        self.policy.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn evaluate(&self, tool_name: &str, args: &Value) -> Evaluation {
        let policy = self.snapshot();
        for (level, rules) in &policy.levels {
            if let Some(hit) = rules
                .iter()
                .find(|r| r.matches(tool_name, args, &self.cwd, &self.home))
            {
                debug!(tool = tool_name, decision = %level, rule = %hit.rule, "Permission rule matched");
                return Evaluation {
                    decision: *level,
                    rule: Some(hit.rule.to_string()),
                };
            }
        }
        Evaluation {
            decision: default_decision(policy.config.default_mode, tool_name),
            rule: None,
        }
    }
}

fn default_decision(mode: DefaultMode, tool_name: &str) -> PermissionLevel {
    let name = tool_name.to_ascii_lowercase();
    match mode {
        DefaultMode::BypassPermissions => PermissionLevel::Allow,
        DefaultMode::DontAsk => PermissionLevel::Deny,
        DefaultMode::AcceptEdits => {
            if EDIT_TOOLS.contains(&name.as_str()) {
                PermissionLevel::Allow
            } else {
                PermissionLevel::Ask
            }
        }
        DefaultMode::Default => {
            if SENSITIVE_TOOLS.contains(&name.as_str()) {
                PermissionLevel::Ask
            } else {
                PermissionLevel::Allow
            }
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Allow,
    Ask,
    Deny,
}

impl PermissionLevel {
    /// Evaluation order: the first level with a matching rule decides.
    pub const ORDER: [PermissionLevel; 3] = [
        PermissionLevel::Deny,
        PermissionLevel::Ask,
        PermissionLevel::Allow,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "allow" => Some(PermissionLevel::Allow),
            "ask" => Some(PermissionLevel::Ask),
            "deny" => Some(PermissionLevel::Deny),
            _ => None,
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionLevel::Allow => write!(f, "allow"),
            PermissionLevel::Ask => write!(f, "ask"),
            PermissionLevel::Deny => write!(f, "deny"),
        }
    }
}

/// What happens to a call no rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DefaultMode {
    /// Ask for sensitive tools, allow the rest.
    #[default]
    Default,
    /// Allow file edits, ask for everything else.
    AcceptEdits,
    /// Deny anything not explicitly allowed.
    DontAsk,
    /// Allow everything.
    BypassPermissions,
}

impl DefaultMode {
    pub const ALL: [DefaultMode; 4] = [
        DefaultMode::Default,
        DefaultMode::AcceptEdits,
        DefaultMode::DontAsk,
        DefaultMode::BypassPermissions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DefaultMode::Default => "default",
            DefaultMode::AcceptEdits => "acceptEdits",
            DefaultMode::DontAsk => "dontAsk",
            DefaultMode::BypassPermissions => "bypassPermissions",
        }
    }

    /// Accepts the canonical camelCase names, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(raw))
    }
}

impl fmt::Display for DefaultMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed policy line, e.g. `bash(npm run *)`, `webfetch`, `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRule {
    pub level: PermissionLevel,
    /// Lowercased tool name, or `*` for every tool.
    pub tool: String,
    pub specifier: Option<String>,
}

impl PermissionRule {
    pub fn parse(level: PermissionLevel, raw: &str) -> anyhow::Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            anyhow::bail!("empty rule");
        }

        let (tool, specifier) = match raw.find('(') {
            Some(open) => {
                let Some(inner) = raw[open + 1..].strip_suffix(')') else {
                    anyhow::bail!("rule {:?} is missing its closing parenthesis", raw);
                };
                let inner = inner.trim();
                let specifier = (!inner.is_empty()).then(|| inner.to_string());
                (raw[..open].trim(), specifier)
            }
            None => (raw, None),
        };

        if tool.is_empty() {
            anyhow::bail!("rule {:?} has no tool name", raw);
        }
        if tool != "*"
            && !tool
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            anyhow::bail!("invalid tool name {:?} in rule {:?}", tool, raw);
        }

        Ok(Self {
            level,
            tool: tool.to_ascii_lowercase(),
            specifier,
        })
    }

    pub fn matches_tool(&self, tool_name: &str) -> bool {
        self.tool == "*" || self.tool.eq_ignore_ascii_case(tool_name)
    }
}

impl fmt::Display for PermissionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.specifier {
            Some(spec) => write!(f, "{}({})", self.tool, spec),
            None => write!(f, "{}", self.tool),
        }
    }
}

/// Authorization policy for one conversation, as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionConfig {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub ask: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default)]
    pub default_mode: DefaultMode,
}

impl PermissionConfig {
    pub fn rules(&self, level: PermissionLevel) -> &[String] {
        match level {
            PermissionLevel::Allow => &self.allow,
            PermissionLevel::Ask => &self.ask,
            PermissionLevel::Deny => &self.deny,
        }
    }

    fn rules_mut(&mut self, level: PermissionLevel) -> &mut Vec<String> {
        match level {
            PermissionLevel::Allow => &mut self.allow,
            PermissionLevel::Ask => &mut self.ask,
            PermissionLevel::Deny => &mut self.deny,
        }
    }

    /// Add a rule at `level` after validating it.
    ///
    /// Returns `Ok(false)` when the same rule already sits at that level.
    /// A rule present at another level moves here.
    pub fn add_rule(&mut self, level: PermissionLevel, raw: &str) -> anyhow::Result<bool> {
        let canonical = PermissionRule::parse(level, raw)?.to_string();
        if self.find(&canonical) == Some(level) {
            return Ok(false);
        }
        self.remove_rule(&canonical);
        self.rules_mut(level).push(canonical);
        Ok(true)
    }

    /// Remove a rule from whatever level holds it. Returns whether it existed.
    pub fn remove_rule(&mut self, raw: &str) -> bool {
        let Some(canonical) = canonical_form(raw) else {
            return false;
        };
        let mut removed = false;
        for level in PermissionLevel::ORDER {
            let rules = self.rules_mut(level);
            let before = rules.len();
            rules.retain(|r| canonical_form(r).as_deref() != Some(canonical.as_str()));
            removed |= rules.len() != before;
        }
        removed
    }

    /// Which level holds this rule, if any.
    pub fn find(&self, raw: &str) -> Option<PermissionLevel> {
        let canonical = canonical_form(raw)?;
        PermissionLevel::ORDER.into_iter().find(|&level| {
            self.rules(level)
                .iter()
                .any(|r| canonical_form(r).as_deref() == Some(canonical.as_str()))
        })
    }

    pub fn summary(&self) -> String {
        let mut out = format!("Default mode: {}\n", self.default_mode);
        for level in PermissionLevel::ORDER {
            let rules = self.rules(level);
            if rules.is_empty() {
                out.push_str(&format!("\n{}: (none)", level));
            } else {
                out.push_str(&format!("\n{}:", level));
                for rule in rules {
                    out.push_str(&format!("\n  • {}", rule));
                }
            }
        }
        out
    }
}

fn canonical_form(raw: &str) -> Option<String> {
    PermissionRule::parse(PermissionLevel::Allow, raw)
        .ok()
        .map(|r| r.to_string())
}

//! The closed command and callback vocabulary.
//!
//! Parsed once at the Router boundary; the controller only ever matches on
//! these enums.

use crate::permissions::PermissionLevel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Sessions,
    /// 1-based index into the session list, unparsed.
    Resume(String),
    New,
    Reset,
    Abort,
    Model(Option<String>),
    Thinking(Option<String>),
    Permissions(PermissionsCommand),
    Tmux(TmuxCommand),
    Approve(String),
    Deny(String),
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionsCommand {
    Show,
    Add(PermissionLevel, String),
    Remove(String),
    Mode(Option<String>),
    Reset,
    Usage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TmuxCommand {
    List,
    Select(String),
    New { name: String, command: Option<String> },
    Kill(String),
    Capture,
    On,
    Off,
    CtrlC,
    Enter,
    Resize { cols: u16, rows: u16 },
    Usage,
}

impl Command {
    /// `name` may carry a leading slash and a `@botname` suffix.
    pub fn parse(name: &str, args: &str) -> Self {
        let name = name.trim().trim_start_matches('/');
        let name = name.split('@').next().unwrap_or(name).to_ascii_lowercase();
        let args = args.trim();
        let arg = (!args.is_empty()).then(|| args.to_string());

        match name.as_str() {
            "help" | "start" => Command::Help,
            "sessions" => Command::Sessions,
            "resume" => Command::Resume(args.to_string()),
            "new" => Command::New,
            "reset" => Command::Reset,
            "abort" | "stop" => Command::Abort,
            "model" => Command::Model(arg),
            "thinking" => Command::Thinking(arg),
            "permissions" | "perms" => Command::Permissions(PermissionsCommand::parse(args)),
            "tmux" => Command::Tmux(TmuxCommand::parse(args)),
            "approve" => Command::Approve(args.to_string()),
            "deny" => Command::Deny(args.to_string()),
            _ => Command::Unknown(name),
        }
    }

    /// Text form `/name args`, split the way platform adapters would.
    pub fn parse_text(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }
        let (name, args) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
        Some(Self::parse(name, args))
    }

    /// Answers to a pending approval. These must never wait behind the
    /// conversation queue.
    pub fn is_authorization(&self) -> bool {
        matches!(self, Command::Approve(_) | Command::Deny(_))
    }

    /// Commands that would change the agent out from under a running turn.
    pub fn is_blocked_while_running(&self) -> bool {
        matches!(
            self,
            Command::Resume(_) | Command::New | Command::Model(Some(_)) | Command::Thinking(Some(_))
        )
    }
}

impl PermissionsCommand {
    fn parse(args: &str) -> Self {
        let (sub, rest) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
        let rest = rest.trim();
        match sub.to_ascii_lowercase().as_str() {
            "" | "show" | "list" => PermissionsCommand::Show,
            "allow" | "ask" | "deny" if !rest.is_empty() => match PermissionLevel::parse(sub) {
                Some(level) => PermissionsCommand::Add(level, rest.to_string()),
                None => PermissionsCommand::Usage,
            },
            "remove" | "rm" if !rest.is_empty() => PermissionsCommand::Remove(rest.to_string()),
            "mode" => PermissionsCommand::Mode((!rest.is_empty()).then(|| rest.to_string())),
            "reset" => PermissionsCommand::Reset,
            _ => PermissionsCommand::Usage,
        }
    }
}

impl TmuxCommand {
    fn parse(args: &str) -> Self {
        let mut parts = args.split_whitespace();
        let sub = parts.next().unwrap_or("").to_ascii_lowercase();
        match sub.as_str() {
            "" | "list" | "ls" => TmuxCommand::List,
            "select" | "use" => match parts.next() {
                Some(name) => TmuxCommand::Select(name.to_string()),
                None => TmuxCommand::Usage,
            },
            "new" => match parts.next() {
                Some(name) => {
                    let command = parts.collect::<Vec<_>>().join(" ");
                    TmuxCommand::New {
                        name: name.to_string(),
                        command: (!command.is_empty()).then_some(command),
                    }
                }
                None => TmuxCommand::Usage,
            },
            "kill" => match parts.next() {
                Some(name) => TmuxCommand::Kill(name.to_string()),
                None => TmuxCommand::Usage,
            },
            "capture" | "show" => TmuxCommand::Capture,
            "on" => TmuxCommand::On,
            "off" => TmuxCommand::Off,
            "ctrlc" | "c-c" | "interrupt" => TmuxCommand::CtrlC,
            "enter" => TmuxCommand::Enter,
            "resize" => {
                let cols = parts.next().and_then(|c| c.parse().ok());
                let rows = parts.next().and_then(|r| r.parse().ok());
                match (cols, rows) {
                    (Some(cols), Some(rows)) if cols > 0 && rows > 0 => {
                        TmuxCommand::Resize { cols, rows }
                    }
                    _ => TmuxCommand::Usage,
                }
            }
            _ => TmuxCommand::Usage,
        }
    }
}

/// Button callback data.
///
/// Wire format: `allow:<id>`, `deny:<id>`, `always:<id>`,
/// `tmux:select:<session>`, `resume:<n>`, `model:<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Allow(String),
    Deny(String),
    Always(String),
    TmuxSelect(String),
    Resume(usize),
    Model(String),
    Unknown(String),
}

impl Callback {
    pub fn parse(data: &str) -> Self {
        let unknown = || Callback::Unknown(data.to_string());
        let Some((kind, rest)) = data.split_once(':') else {
            return unknown();
        };
        if rest.is_empty() {
            return unknown();
        }
        match kind {
            "allow" => Callback::Allow(rest.to_string()),
            "deny" => Callback::Deny(rest.to_string()),
            "always" => Callback::Always(rest.to_string()),
            "tmux" => match rest.split_once(':') {
                Some(("select", name)) if !name.is_empty() => Callback::TmuxSelect(name.to_string()),
                _ => unknown(),
            },
            "resume" => rest.parse().map(Callback::Resume).unwrap_or_else(|_| unknown()),
            "model" => Callback::Model(rest.to_string()),
            _ => unknown(),
        }
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, Callback::Allow(_) | Callback::Deny(_) | Callback::Always(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_commands() {
        assert_eq!(Command::parse("/help", ""), Command::Help);
        assert_eq!(Command::parse("model@my_bot", "gpt-5"), Command::Model(Some("gpt-5".into())));
        assert_eq!(Command::parse("MODEL", ""), Command::Model(None));
        assert_eq!(Command::parse("frobnicate", ""), Command::Unknown("frobnicate".into()));
    }

    #[test]
    fn parses_text_form() {
        assert_eq!(
            Command::parse_text("/approve abc123"),
            Some(Command::Approve("abc123".into()))
        );
        assert_eq!(Command::parse_text("hello"), None);
    }

    #[test]
    fn permissions_subcommands() {
        assert_eq!(
            Command::parse("permissions", "allow bash(npm run *)"),
            Command::Permissions(PermissionsCommand::Add(
                PermissionLevel::Allow,
                "bash(npm run *)".into()
            ))
        );
        assert_eq!(
            Command::parse("permissions", ""),
            Command::Permissions(PermissionsCommand::Show)
        );
        assert_eq!(
            Command::parse("permissions", "mode acceptEdits"),
            Command::Permissions(PermissionsCommand::Mode(Some("acceptEdits".into())))
        );
        assert_eq!(
            Command::parse("permissions", "deny"),
            Command::Permissions(PermissionsCommand::Usage)
        );
    }

    #[test]
    fn tmux_subcommands() {
        assert_eq!(
            Command::parse("tmux", "new dev npm run dev"),
            Command::Tmux(TmuxCommand::New {
                name: "dev".into(),
                command: Some("npm run dev".into())
            })
        );
        assert_eq!(
            Command::parse("tmux", "resize 120 40"),
            Command::Tmux(TmuxCommand::Resize { cols: 120, rows: 40 })
        );
        assert_eq!(Command::parse("tmux", "resize 0 40"), Command::Tmux(TmuxCommand::Usage));
        assert_eq!(Command::parse("tmux", "select"), Command::Tmux(TmuxCommand::Usage));
        assert_eq!(Command::parse("tmux", ""), Command::Tmux(TmuxCommand::List));
    }

    #[test]
    fn parses_callbacks() {
        assert_eq!(Callback::parse("allow:ab12cd34"), Callback::Allow("ab12cd34".into()));
        assert_eq!(Callback::parse("always:ab12cd34"), Callback::Always("ab12cd34".into()));
        assert_eq!(Callback::parse("tmux:select:dev"), Callback::TmuxSelect("dev".into()));
        assert_eq!(Callback::parse("resume:2"), Callback::Resume(2));
        assert_eq!(Callback::parse("model:gpt-5:mini"), Callback::Model("gpt-5:mini".into()));
        assert!(matches!(Callback::parse("resume:x"), Callback::Unknown(_)));
        assert!(matches!(Callback::parse("allow:"), Callback::Unknown(_)));
        assert!(matches!(Callback::parse("garbage"), Callback::Unknown(_)));
        assert!(Callback::parse("deny:1").is_authorization());
        assert!(!Callback::parse("resume:1").is_authorization());
    }

    #[test]
    fn busy_guard_covers_agent_mutations() {
        assert!(Command::parse("model", "x").is_blocked_while_running());
        assert!(!Command::parse("model", "").is_blocked_while_running());
        assert!(Command::parse("resume", "1").is_blocked_while_running());
        assert!(!Command::parse("abort", "").is_blocked_while_running());
    }
}

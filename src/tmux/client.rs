use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::traits::{Terminal, TerminalSession};

/// `tmux` CLI bound to one server socket (`tmux -S <socket>`).
pub struct TmuxClient {
    socket: PathBuf,
}

impl TmuxClient {
    pub fn new(socket: PathBuf) -> Self {
        Self { socket }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        debug!(socket = %self.socket.display(), ?args, "tmux");
        let output = Command::new("tmux")
            .arg("-S")
            .arg(&self.socket)
            .args(args)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run tmux: {}", e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tmux {} failed: {}", args.first().unwrap_or(&""), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Errors tmux prints when no server is listening on the socket yet.
fn is_no_server(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("no server running")
        || lower.contains("error connecting")
        || lower.contains("no such file or directory")
}

fn parse_session_line(line: &str) -> Option<TerminalSession> {
    let mut parts = line.split('\t');
    let name = parts.next()?.trim();
    if name.is_empty() {
        return None;
    }
    let windows = parts.next().and_then(|w| w.trim().parse().ok()).unwrap_or(1);
    let attached = parts
        .next()
        .and_then(|a| a.trim().parse::<u32>().ok())
        .is_some_and(|n| n > 0);
    Some(TerminalSession {
        name: name.to_string(),
        windows,
        attached,
    })
}

/// Drop ANSI escapes and stray control characters from captured output.
pub fn normalize_terminal_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            // CSI: ESC [ ... final byte in @..~
            if chars.peek() == Some(&'[') {
                chars.next();
                for n in chars.by_ref() {
                    if ('@'..='~').contains(&n) {
                        break;
                    }
                }
            } else {
                chars.next();
            }
            continue;
        }
        if !c.is_control() || matches!(c, '\n' | '\t') {
            out.push(c);
        }
    }
    out
}

#[async_trait]
impl Terminal for TmuxClient {
    async fn list_sessions(&self) -> anyhow::Result<Vec<TerminalSession>> {
        match self
            .run(&[
                "list-sessions",
                "-F",
                "#{session_name}\t#{session_windows}\t#{session_attached}",
            ])
            .await
        {
            Ok(out) => Ok(out.lines().filter_map(parse_session_line).collect()),
            Err(e) if is_no_server(&e.to_string()) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn new_session(&self, name: &str, command: Option<&str>) -> anyhow::Result<()> {
        let mut args = vec!["new-session", "-d", "-s", name];
        if let Some(command) = command.filter(|c| !c.trim().is_empty()) {
            args.push(command);
        }
        self.run(&args).await.map(|_| ())
    }

    async fn kill_session(&self, name: &str) -> anyhow::Result<()> {
        let target = format!("={}", name);
        self.run(&["kill-session", "-t", &target]).await.map(|_| ())
    }

    async fn send_keys(&self, target: &str, text: &str, literal: bool) -> anyhow::Result<()> {
        if literal {
            self.run(&["send-keys", "-t", target, "-l", text]).await?;
        } else {
            self.run(&["send-keys", "-t", target, text]).await?;
        }
        Ok(())
    }

    async fn send_enter(&self, target: &str) -> anyhow::Result<()> {
        self.run(&["send-keys", "-t", target, "C-m"]).await.map(|_| ())
    }

    async fn send_ctrl_c(&self, target: &str) -> anyhow::Result<()> {
        self.run(&["send-keys", "-t", target, "C-c"]).await.map(|_| ())
    }

    async fn capture_pane(&self, target: &str, lines: usize) -> anyhow::Result<String> {
        let start = format!("-{}", lines);
        let out = self
            .run(&["capture-pane", "-p", "-J", "-t", target, "-S", &start])
            .await?;
        Ok(normalize_terminal_text(&out))
    }

    async fn has_session(&self, name: &str) -> anyhow::Result<bool> {
        let target = format!("={}", name);
        match self.run(&["has-session", "-t", &target]).await {
            Ok(_) => Ok(true),
            // A non-zero exit means "no such session" or "no server".
            Err(e) if e.to_string().starts_with("tmux has-session failed") => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn resize_window(&self, target: &str, cols: u16, rows: u16) -> anyhow::Result<()> {
        let (cols, rows) = (cols.to_string(), rows.to_string());
        self.run(&["resize-window", "-t", target, "-x", &cols, "-y", &rows])
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_sessions_output() {
        let session = parse_session_line("build\t3\t1").unwrap();
        assert_eq!(session.name, "build");
        assert_eq!(session.windows, 3);
        assert!(session.attached);

        let session = parse_session_line("logs\t1\t0").unwrap();
        assert!(!session.attached);
        assert!(parse_session_line("").is_none());
    }

    #[test]
    fn strips_ansi_sequences() {
        let raw = "\u{1b}[1;32mok\u{1b}[0m done\r\n";
        assert_eq!(normalize_terminal_text(raw), "ok done\n");
    }

    #[test]
    fn recognizes_missing_server() {
        assert!(is_no_server("tmux list-sessions failed: no server running on /tmp/x"));
        assert!(is_no_server("error connecting to /tmp/x (No such file or directory)"));
        assert!(!is_no_server("unknown option"));
    }
}

use async_trait::async_trait;

/// A session on the tmux server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSession {
    pub name: String,
    pub windows: u32,
    pub attached: bool,
}

/// Terminal multiplexer operations, all scoped to one server socket.
#[async_trait]
pub trait Terminal: Send + Sync {
    async fn list_sessions(&self) -> anyhow::Result<Vec<TerminalSession>>;

    async fn new_session(&self, name: &str, command: Option<&str>) -> anyhow::Result<()>;

    async fn kill_session(&self, name: &str) -> anyhow::Result<()>;

    /// Type `text` into `target`. With `literal`, key names are not interpreted.
    async fn send_keys(&self, target: &str, text: &str, literal: bool) -> anyhow::Result<()>;

    async fn send_enter(&self, target: &str) -> anyhow::Result<()>;

    async fn send_ctrl_c(&self, target: &str) -> anyhow::Result<()>;

    /// Visible pane contents plus up to `lines` lines of scrollback.
    async fn capture_pane(&self, target: &str, lines: usize) -> anyhow::Result<String>;

    async fn has_session(&self, name: &str) -> anyhow::Result<bool>;

    async fn resize_window(&self, target: &str, cols: u16, rows: u16) -> anyhow::Result<()>;
}

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub authorizer: AuthorizerConfig,
    #[serde(default)]
    pub tmux: TmuxConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut config: AppConfig = toml::from_str(content)?;
        config.tmux.refresh_delay_ms = config.tmux.refresh_delay_ms.clamp(300, 500);
        Ok(config)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// Allowed user IDs per platform name ("telegram", "slack", ...).
    /// A platform with no entry admits nobody.
    #[serde(default)]
    pub allowed_users: HashMap<String, Vec<String>>,
}

impl AuthConfig {
    pub fn is_allowed(&self, platform: &str, user_id: &str) -> bool {
        self.allowed_users
            .get(platform)
            .is_some_and(|ids| ids.iter().any(|id| id == user_id))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_idle_ttl_secs() -> u64 {
    30 * 60
}
fn default_sweep_interval_secs() -> u64 {
    5 * 60
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// Minimum spacing between outbound edits of the streaming message.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    /// Draft messages longer than this are cut from the front.
    #[serde(default = "default_draft_max_len")]
    pub draft_max_len: usize,
    /// Use draft delivery when the channel supports it.
    #[serde(default = "default_true")]
    pub drafts: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
            draft_max_len: default_draft_max_len(),
            drafts: true,
        }
    }
}

fn default_throttle_ms() -> u64 {
    400
}
fn default_draft_max_len() -> usize {
    4000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthorizerConfig {
    #[serde(default = "default_approval_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_approval_timeout_secs(),
        }
    }
}

fn default_approval_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct TmuxConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
    #[serde(default = "default_capture_lines")]
    pub capture_lines: usize,
    /// Delay between sending input and capturing the pane (300..=500).
    #[serde(default = "default_refresh_delay_ms")]
    pub refresh_delay_ms: u64,
    /// Thread titles starting with this prefix are direct terminal topics.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            capture_lines: default_capture_lines(),
            refresh_delay_ms: default_refresh_delay_ms(),
            topic_prefix: default_topic_prefix(),
        }
    }
}

impl TmuxConfig {
    pub fn socket_path(&self) -> PathBuf {
        expand_path(&self.socket_path)
    }
}

fn default_socket_path() -> String {
    "/tmp/chatpilot.tmux.sock".to_string()
}
fn default_capture_lines() -> usize {
    60
}
fn default_refresh_delay_ms() -> u64 {
    400
}
fn default_topic_prefix() -> String {
    "tmux".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_thinking")]
    pub default_thinking: String,
    #[serde(default = "default_workdir")]
    pub workdir: String,
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: String,
    #[serde(default = "default_permissions_dir")]
    pub permissions_dir: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            default_thinking: default_thinking(),
            workdir: default_workdir(),
            sessions_dir: default_sessions_dir(),
            permissions_dir: default_permissions_dir(),
        }
    }
}

impl AgentConfig {
    pub fn workdir(&self) -> PathBuf {
        expand_path(&self.workdir)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        expand_path(&self.sessions_dir)
    }

    pub fn permissions_dir(&self) -> PathBuf {
        expand_path(&self.permissions_dir)
    }
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_thinking() -> String {
    "medium".to_string()
}
fn default_workdir() -> String {
    "~".to_string()
}
fn default_sessions_dir() -> String {
    "~/.chatpilot/sessions".to_string()
}
fn default_permissions_dir() -> String {
    "~/.chatpilot/permissions".to_string()
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

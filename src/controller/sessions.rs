//! Saved agent sessions on disk, one directory per conversation.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};

use crate::session::file_stem;

/// Most sessions offered by `/sessions`.
pub const MAX_LISTED: usize = 10;

#[derive(Debug, Clone)]
pub struct SavedSession {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl SavedSession {
    pub fn label(&self) -> String {
        let modified: DateTime<Local> = self.modified.into();
        let name = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{} ({})", modified.format("%Y-%m-%d %H:%M"), name)
    }
}

/// Where one conversation's agent runtime keeps its session files.
pub fn session_dir(root: &Path, key: &str) -> PathBuf {
    root.join(file_stem(key))
}

/// `*.jsonl` files under `dir`, newest first. A missing directory lists
/// nothing.
pub async fn list_saved_sessions(dir: &Path) -> anyhow::Result<Vec<SavedSession>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(anyhow::anyhow!("Failed to read {}: {}", dir.display(), e)),
    };

    let mut sessions = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        sessions.push(SavedSession {
            path,
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    sessions.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.path.cmp(&a.path)));
    Ok(sessions)
}

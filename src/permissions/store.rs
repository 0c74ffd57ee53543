use std::path::{Path, PathBuf};

use tracing::info;

use super::rules::PermissionConfig;
use crate::session::file_stem;

/// Per-conversation permission files: `<dir>/<file_stem(key)>.json`.
#[derive(Debug, Clone)]
pub struct PermissionStore {
    dir: PathBuf,
}

impl PermissionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }

    /// Load a conversation's config. A missing file is the default config;
    /// an unreadable or corrupt one is an error.
    pub async fn load(&self, key: &str) -> anyhow::Result<PermissionConfig> {
        let path = self.path_for(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PermissionConfig::default())
            }
            Err(e) => anyhow::bail!("Failed to read {}: {}", path.display(), e),
        };
        if content.trim().is_empty() {
            return Ok(PermissionConfig::default());
        }
        serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid permission file {}: {}", path.display(), e))
    }

    /// Write atomically: a temp file in the same directory, then rename.
    pub async fn save(&self, key: &str, config: &PermissionConfig) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = self
            .dir
            .join(format!(".{}.json.{}.tmp", file_stem(key), uuid::Uuid::new_v4().simple()));
        let body = serde_json::to_string_pretty(config)?;
        tokio::fs::write(&tmp, body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        info!(conversation = %key, path = %path.display(), "Saved permission config");
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Source of "this conversation's permission file changed" signals.
///
/// Items are file stems (see [`crate::session::file_stem`]); the Router maps
/// them back onto live conversation keys.
#[async_trait]
pub trait ConfigWatch: Send {
    /// Next batch of changed stems. `None` once the watch has shut down.
    async fn changed(&mut self) -> Option<Vec<String>>;
}

/// Watches the permissions directory with `notify`.
///
/// Bursts of events (editors writing temp files, rename-into-place) are
/// collapsed over a short debounce window into one batch of distinct stems.
pub struct FsConfigWatch {
    // Dropping the watcher stops event delivery.
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<String>,
    debounce: Duration,
}

impl FsConfigWatch {
    pub fn new(dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        return;
                    }
                    for path in &event.paths {
                        if let Some(stem) = permission_stem(path) {
                            let _ = tx.send(stem);
                        }
                    }
                }
                Err(err) => error!(%err, "Permission watcher error"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        debug!(directory = %dir.display(), "Watching permission files");
        Ok(Self {
            _watcher: watcher,
            rx,
            debounce: Duration::from_millis(200),
        })
    }
}

#[async_trait]
impl ConfigWatch for FsConfigWatch {
    async fn changed(&mut self) -> Option<Vec<String>> {
        let first = self.rx.recv().await?;
        let mut seen = HashSet::from([first.clone()]);
        let mut batch = vec![first];
        let deadline = tokio::time::Instant::now() + self.debounce;
        while let Ok(Some(stem)) = tokio::time::timeout_at(deadline, self.rx.recv()).await {
            if seen.insert(stem.clone()) {
                batch.push(stem);
            }
        }
        Some(batch)
    }
}

/// In-process watch fed by a channel. Used when no filesystem watch is wanted.
pub struct ChannelConfigWatch {
    rx: mpsc::UnboundedReceiver<String>,
}

impl ChannelConfigWatch {
    pub fn new() -> (mpsc::UnboundedSender<String>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl ConfigWatch for ChannelConfigWatch {
    async fn changed(&mut self) -> Option<Vec<String>> {
        let first = self.rx.recv().await?;
        let mut batch = vec![first];
        while let Ok(stem) = self.rx.try_recv() {
            if !batch.contains(&stem) {
                batch.push(stem);
            }
        }
        Some(batch)
    }
}

/// `<dir>/<stem>.json` → stem. Temp files and other extensions are ignored.
fn permission_stem(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') {
        return None;
    }
    let stem = name.strip_suffix(".json")?;
    (!stem.is_empty()).then(|| stem.to_string())
}

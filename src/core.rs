use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::channels::ChannelHub;
use crate::config::AppConfig;
use crate::permissions::{ConfigWatch, FsConfigWatch, PermissionStore};
use crate::router::Router;
use crate::tmux::TmuxClient;
use crate::traits::{AgentRuntime, Terminal};
use crate::types::InboundEvent;

/// Process-wide collaborators shared by every conversation.
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub hub: Arc<ChannelHub>,
    pub runtime: Arc<dyn AgentRuntime>,
    pub terminal: Arc<dyn Terminal>,
    pub permissions: PermissionStore,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        hub: Arc<ChannelHub>,
        runtime: Arc<dyn AgentRuntime>,
        terminal: Arc<dyn Terminal>,
    ) -> Self {
        let permissions = PermissionStore::new(config.agent.permissions_dir());
        Self {
            config: Arc::new(config),
            hub,
            runtime,
            terminal,
            permissions,
        }
    }

    /// Context backed by the tmux server at `tmux.socket_path`.
    pub fn with_tmux(config: AppConfig, hub: Arc<ChannelHub>, runtime: Arc<dyn AgentRuntime>) -> Self {
        let terminal: Arc<dyn Terminal> = Arc::new(TmuxClient::new(config.tmux.socket_path()));
        Self::new(config, hub, runtime, terminal)
    }
}

/// Install the global fmt subscriber. `RUST_LOG` overrides the default `info`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Route inbound events until the adapters hang up or the process is
/// interrupted. Without an explicit `watch`, the permissions directory is
/// watched on disk.
pub async fn run(
    ctx: Arc<AppContext>,
    mut inbound: mpsc::Receiver<InboundEvent>,
    watch: Option<Box<dyn ConfigWatch>>,
) -> anyhow::Result<()> {
    // 1. Router
    let router = Router::new(ctx.clone());
    let sweeper = router.spawn_sweeper();
    info!(
        idle_ttl_secs = ctx.config.router.idle_ttl_secs,
        channels = ?ctx.hub.channel_names().await,
        "Router started"
    );

    // 2. Permission hot reload
    let watch = match watch {
        Some(watch) => Some(watch),
        None => match FsConfigWatch::new(ctx.permissions.dir()) {
            Ok(watch) => Some(Box::new(watch) as Box<dyn ConfigWatch>),
            Err(e) => {
                warn!("Permission hot reload disabled: {}", e);
                None
            }
        },
    };
    let watcher = watch.map(|watch| router.spawn_permission_watch(watch));

    // 3. Event loop. Events are dispatched in arrival order; the router only
    // enqueues, so this never waits on an agent turn.
    loop {
        tokio::select! {
            event = inbound.recv() => match event {
                Some(event) => router.handle_event(event).await,
                None => {
                    info!("Inbound stream closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    router.shutdown().await;
    let _ = sweeper.await;
    if let Some(watcher) = watcher {
        let _ = watcher.await;
    }
    info!("Router stopped");
    Ok(())
}

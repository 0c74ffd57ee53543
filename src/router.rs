//! Inbound event routing.
//!
//! Every conversation key gets a slot: one controller plus a FIFO queue
//! drained by a single worker task, so two events for the same key never run
//! concurrently while different keys proceed independently. Approval answers
//! skip the queue because the turn they unblock may be what the queue is
//! waiting on.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::controller::{Callback, ChatController, Command, ControllerDeps, ControllerInput};
use crate::core::AppContext;
use crate::permissions::ConfigWatch;
use crate::session::file_stem;
use crate::types::{ConversationRef, InboundEvent, InboundKind};

struct Slot {
    controller: Arc<ChatController>,
    queue: mpsc::UnboundedSender<ControllerInput>,
    /// Inputs enqueued but not yet fully handled.
    in_flight: Arc<AtomicUsize>,
    last_used: Instant,
    worker: JoinHandle<()>,
}

impl Slot {
    fn sender(&self) -> InFlightSender {
        InFlightSender {
            queue: self.queue.clone(),
            in_flight: self.in_flight.clone(),
        }
    }

    fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.last_used) >= ttl
            && self.in_flight.load(Ordering::SeqCst) == 0
            && !self.controller.is_running()
    }
}

pub struct Router {
    ctx: Arc<AppContext>,
    slots: Mutex<HashMap<String, Slot>>,
    idle_ttl: Duration,
    /// Stops the background sweeper and permission watch.
    cancel: CancellationToken,
}

impl Router {
    pub fn new(ctx: Arc<AppContext>) -> Arc<Self> {
        let idle_ttl = Duration::from_secs(ctx.config.router.idle_ttl_secs);
        Arc::new(Self {
            ctx,
            slots: Mutex::new(HashMap::new()),
            idle_ttl,
            cancel: CancellationToken::new(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_idle_ttl(ctx: Arc<AppContext>, idle_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            slots: Mutex::new(HashMap::new()),
            idle_ttl,
            cancel: CancellationToken::new(),
        })
    }

    /// Authenticate, parse and dispatch one inbound event.
    pub async fn handle_event(&self, event: InboundEvent) {
        let InboundEvent {
            kind,
            sender,
            conversation,
            ..
        } = event;
        let input = parse_input(kind);
        let key = conversation.key();

        if !self
            .ctx
            .config
            .auth
            .is_allowed(conversation.platform.as_str(), &sender.user_id)
        {
            info!(conversation = %key, user = %sender.user_id, "Rejected unauthorized sender");
            if matches!(input, ControllerInput::Command(_)) {
                if let Err(e) = self
                    .ctx
                    .hub
                    .send_text(&conversation, "⛔ You are not authorized to use this bot.")
                    .await
                {
                    warn!(conversation = %key, "Failed to send rejection: {}", e);
                }
            }
            return;
        }

        if input.is_authorization() {
            let controller = match self.controller_for(&conversation).await {
                Ok((controller, _)) => controller,
                Err(e) => {
                    warn!(conversation = %key, "Dropping event: {}", e);
                    return;
                }
            };
            controller.handle(input).await;
            return;
        }

        let queue = match self.controller_for(&conversation).await {
            Ok((_, queue)) => queue,
            Err(e) => {
                warn!(conversation = %key, "Dropping event: {}", e);
                return;
            }
        };
        if queue.send(input).is_err() {
            error!(conversation = %key, "Conversation worker is gone, event dropped");
        }
    }

    /// The live controller for a conversation and its queue, creating both on
    /// first use. Enqueueing through the returned sender counts as in flight.
    async fn controller_for(
        &self,
        conv: &ConversationRef,
    ) -> anyhow::Result<(Arc<ChatController>, InFlightSender)> {
        let key = conv.key();
        if let Some(found) = self.touch(&key).await {
            return Ok(found);
        }

        // Built outside the slot lock: loading permissions must not stall
        // routing for other conversations.
        let channel = self.ctx.hub.channel_for(conv).await?;
        let deps = ControllerDeps {
            config: self.ctx.config.clone(),
            channel,
            runtime: self.ctx.runtime.clone(),
            terminal: self.ctx.terminal.clone(),
            permissions: self.ctx.permissions.clone(),
        };
        let controller = ChatController::new(conv.clone(), deps).await;

        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(&key) {
            // Lost a race with another event for this key; keep the winner.
            slot.last_used = Instant::now();
            return Ok((slot.controller.clone(), slot.sender()));
        }

        let (queue, rx) = mpsc::unbounded_channel::<ControllerInput>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let worker = tokio::spawn(drain_queue(
            key.clone(),
            controller.clone(),
            rx,
            in_flight.clone(),
        ));
        let slot = Slot {
            controller: controller.clone(),
            queue,
            in_flight,
            last_used: Instant::now(),
            worker,
        };
        let sender = slot.sender();
        slots.insert(key.clone(), slot);
        info!(conversation = %key, live = slots.len(), "Opened conversation");
        Ok((controller, sender))
    }

    async fn touch(&self, key: &str) -> Option<(Arc<ChatController>, InFlightSender)> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(key)?;
        slot.last_used = Instant::now();
        Some((slot.controller.clone(), slot.sender()))
    }

    pub async fn controller(&self, key: &str) -> Option<Arc<ChatController>> {
        self.slots.lock().await.get(key).map(|s| s.controller.clone())
    }

    pub async fn live_count(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Evict controllers idle past the TTL. Returns how many were evicted.
    pub async fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let evicted: Vec<(String, Slot)> = {
            let mut slots = self.slots.lock().await;
            let keys: Vec<String> = slots
                .iter()
                .filter(|(_, slot)| slot.is_idle(now, self.idle_ttl))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| slots.remove(&key).map(|slot| (key, slot)))
                .collect()
        };

        let count = evicted.len();
        for (key, slot) in evicted {
            // Closing the queue ends the worker once it is empty.
            drop(slot.queue);
            slot.controller.dispose().await;
            drop(slot.worker);
            info!(conversation = %key, "Evicted idle conversation");
        }
        count
    }

    /// Run `sweep_idle` every `sweep_interval_secs`.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let router = self.clone();
        let interval = Duration::from_secs(self.ctx.config.router.sweep_interval_secs.max(1));
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => break,
                }
                let evicted = router.sweep_idle().await;
                if evicted > 0 {
                    let live = router.live_count().await;
                    info!(evicted, live, "Idle sweep");
                }
            }
        })
    }

    /// Forward permission-file changes to the matching live controllers.
    pub fn spawn_permission_watch(self: &Arc<Self>, mut watch: Box<dyn ConfigWatch>) -> JoinHandle<()> {
        let router = self.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let stems = tokio::select! {
                    stems = watch.changed() => stems,
                    _ = cancel.cancelled() => return,
                };
                let Some(stems) = stems else {
                    warn!("Permission watch ended");
                    return;
                };
                for stem in stems {
                    router.reload_permissions(&stem).await;
                }
            }
        })
    }

    /// Reload permissions for every live conversation stored under `stem`.
    pub async fn reload_permissions(&self, stem: &str) {
        let controllers: Vec<Arc<ChatController>> = self
            .slots
            .lock()
            .await
            .iter()
            .filter(|(key, _)| file_stem(key) == stem)
            .map(|(_, slot)| slot.controller.clone())
            .collect();
        for controller in controllers {
            controller.reload_permissions().await;
        }
    }

    /// Stop background tasks and dispose every controller.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let slots: Vec<(String, Slot)> = self.slots.lock().await.drain().collect();
        for (key, slot) in slots {
            slot.worker.abort();
            slot.controller.dispose().await;
            info!(conversation = %key, "Closed conversation");
        }
    }
}

/// Handle one conversation's inputs in order. A panicking handler is logged
/// and skipped so later inputs still run and the slot can still go idle.
async fn drain_queue(
    key: String,
    controller: Arc<ChatController>,
    mut rx: mpsc::UnboundedReceiver<ControllerInput>,
    in_flight: Arc<AtomicUsize>,
) {
    while let Some(input) = rx.recv().await {
        let _done = InFlightGuard(&in_flight);
        if AssertUnwindSafe(controller.handle(input))
            .catch_unwind()
            .await
            .is_err()
        {
            error!(conversation = %key, "Input handler panicked, continuing with the next event");
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A queue handle that keeps the slot's in-flight count honest.
struct InFlightSender {
    queue: mpsc::UnboundedSender<ControllerInput>,
    in_flight: Arc<AtomicUsize>,
}

impl InFlightSender {
    fn send(&self, input: ControllerInput) -> Result<(), ()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.queue.send(input).map_err(|_| {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        })
    }
}

/// Map a platform event onto the controller vocabulary. Text that spells a
/// known command is treated as that command.
pub fn parse_input(kind: InboundKind) -> ControllerInput {
    match kind {
        InboundKind::Text(text) => match Command::parse_text(&text) {
            Some(command) if !matches!(command, Command::Unknown(_)) => {
                ControllerInput::Command(command)
            }
            _ => ControllerInput::Text(text),
        },
        InboundKind::Command { name, args } => ControllerInput::Command(Command::parse(&name, &args)),
        InboundKind::Image { caption, images } => ControllerInput::Image { caption, images },
        InboundKind::Action { action_id, data } => ControllerInput::Callback {
            callback: Callback::parse(&data),
            action_id,
        },
    }
}

//! Incremental delivery of one agent turn's text.
//!
//! Deltas accumulate in a buffer and a coalescing timer bounds how often the
//! platform sees an update. Two delivery modes exist:
//!
//! - draft: a provisional message updated via `Channel::send_draft`, cut
//!   from the front when it outgrows `draft_max_len`.
//! - edit: a list of real messages edited in place, split when the buffer
//!   exceeds the platform's message limit.
//!
//! A failed draft update switches the rest of the turn to edit mode. A
//! failed edit sends a new message instead. Neither error reaches the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::formatting::{split_message, truncate_tail};
use crate::config::StreamConfig;
use crate::traits::Channel;
use crate::types::{ConversationRef, MessageRef};

static NEXT_DRAFT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Draft,
    Edit,
}

struct SentChunk {
    message: MessageRef,
    text: String,
}

#[derive(Default)]
struct StreamState {
    active: bool,
    buffer: String,
    sent: Vec<SentChunk>,
    draft_ok: bool,
    draft_id: u64,
    /// Bumped on every turn boundary so stale timers can tell they are stale.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct SinkInner {
    channel: Arc<dyn Channel>,
    conv: ConversationRef,
    config: StreamConfig,
    state: Mutex<StreamState>,
}

/// Streaming output for one conversation. Cheap to clone.
#[derive(Clone)]
pub struct StreamSink {
    inner: Arc<SinkInner>,
}

impl StreamSink {
    pub fn new(channel: Arc<dyn Channel>, conv: ConversationRef, config: StreamConfig) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                channel,
                conv,
                config,
                state: Mutex::new(StreamState::default()),
            }),
        }
    }

    /// Start a turn. Any leftovers from an earlier turn are discarded and
    /// draft mode is retried if the channel supports it.
    pub async fn begin_turn(&self) {
        let mut state = self.inner.state.lock().await;
        reset(&mut state);
        state.active = true;
        state.draft_ok = self.inner.config.drafts && self.inner.channel.capabilities().supports_draft;
        state.draft_id = NEXT_DRAFT_ID.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.active
    }

    pub async fn mode(&self) -> DeliveryMode {
        if self.inner.state.lock().await.draft_ok {
            DeliveryMode::Draft
        } else {
            DeliveryMode::Edit
        }
    }

    /// Append a text delta. Deltas outside a turn are dropped.
    pub async fn push_text(&self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock().await;
        if !state.active {
            debug!(conversation = %self.inner.conv.key(), "Dropping delta outside a turn");
            return;
        }
        state.buffer.push_str(delta);
        if state.timer.is_none() {
            let generation = state.generation;
            let sink = self.clone();
            let delay = Duration::from_millis(self.inner.config.throttle_ms);
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                sink.flush_progress(generation).await;
            }));
        }
    }

    /// Send a standalone message right away, outside the throttled buffer.
    pub async fn notice(&self, text: &str) {
        if let Err(e) = self.inner.channel.send_text(&self.inner.conv, text).await {
            warn!(conversation = %self.inner.conv.key(), "Failed to send notice: {}", e);
        }
    }

    /// End the turn: deliver the whole buffer as real messages and reset.
    /// Safe to call when no turn is active.
    pub async fn finish_turn(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.active && !state.buffer.is_empty() {
            self.deliver_edits(&mut state).await;
        }
        reset(&mut state);
    }

    /// Drop everything without delivering it. Used on reset and dispose.
    pub async fn clear(&self) {
        let mut state = self.inner.state.lock().await;
        reset(&mut state);
    }

    async fn flush_progress(&self, generation: u64) {
        let mut state = self.inner.state.lock().await;
        if state.generation != generation || !state.active {
            return;
        }
        state.timer = None;
        if state.buffer.is_empty() {
            return;
        }

        if state.draft_ok {
            let caps = self.inner.channel.capabilities();
            let max = self.inner.config.draft_max_len.min(caps.max_message_len.max(1));
            let text = truncate_tail(&state.buffer, max);
            match self
                .inner
                .channel
                .send_draft(&self.inner.conv, state.draft_id, &text)
                .await
            {
                Ok(()) => return,
                Err(e) => {
                    warn!(
                        conversation = %self.inner.conv.key(),
                        "Draft update failed, switching to edit mode for this turn: {}",
                        e
                    );
                    state.draft_ok = false;
                }
            }
        }

        // Without in-place edits every intermediate update would be a new
        // message, so those channels only see the final delivery.
        if self.inner.channel.capabilities().supports_edit {
            self.deliver_edits(&mut state).await;
        }
    }

    /// Bring the sent messages in line with the buffer: edit chunks that
    /// changed, send chunks that are new.
    async fn deliver_edits(&self, state: &mut StreamState) {
        let caps = self.inner.channel.capabilities();
        let chunks = split_message(&state.buffer, caps.max_message_len);

        for (i, chunk) in chunks.into_iter().enumerate() {
            if chunk.is_empty() {
                continue;
            }
            if let Some(existing) = state.sent.get(i) {
                if existing.text == chunk {
                    continue;
                }
                if caps.supports_edit {
                    let message = existing.message.clone();
                    match self.inner.channel.edit_text(&message, &chunk).await {
                        Ok(()) => {
                            state.sent[i].text = chunk;
                            continue;
                        }
                        Err(e) => {
                            warn!(
                                conversation = %self.inner.conv.key(),
                                "Edit failed, sending a new message: {}",
                                e
                            );
                        }
                    }
                }
                match self.inner.channel.send_text(&self.inner.conv, &chunk).await {
                    Ok(message) => state.sent[i] = SentChunk { message, text: chunk },
                    Err(e) => warn!(conversation = %self.inner.conv.key(), "Send failed: {}", e),
                }
            } else {
                match self.inner.channel.send_text(&self.inner.conv, &chunk).await {
                    Ok(message) => state.sent.push(SentChunk { message, text: chunk }),
                    Err(e) => {
                        warn!(conversation = %self.inner.conv.key(), "Send failed: {}", e);
                        // Keep indices aligned; later chunks must not shift into this slot.
                        break;
                    }
                }
            }
        }
    }
}

fn reset(state: &mut StreamState) {
    if let Some(timer) = state.timer.take() {
        timer.abort();
    }
    state.active = false;
    state.buffer.clear();
    state.sent.clear();
    state.draft_ok = false;
    state.generation = state.generation.wrapping_add(1);
}

//! Per-conversation orchestration.
//!
//! A `ChatController` owns one agent session, one stream sink, one tool
//! authorizer and one tmux bridge. The Router feeds it inputs one at a time;
//! agent turns run in a spawned task so that a turn waiting on approval
//! never blocks the conversation's queue.
//!
//! Turn bookkeeping lives behind `turn`; session plumbing behind `agent`.
//! When both are needed, `turn` is always locked first.

mod commands;
mod dispatch;
mod sessions;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use commands::{Callback, Command, PermissionsCommand, TmuxCommand};
pub use sessions::{list_saved_sessions, session_dir, SavedSession};

use crate::authorizer::{describe_call, AuthorizedTool, ToolAuthorizer};
use crate::channels::StreamSink;
use crate::config::AppConfig;
use crate::error::ErrorClass;
use crate::permissions::{PermissionConfig, PermissionEvaluator, PermissionStore};
use crate::session::{topic_binding, TopicBinding};
use crate::tmux::{tmux_tools, TmuxBridge};
use crate::traits::{
    AgentEvent, AgentRuntime, AgentSession, Channel, SessionOptions, Terminal, ThinkingLevel,
};
use crate::types::{ConversationRef, ImageAttachment};

/// How long a new turn waits for the previous prompt call to return.
const PROMPT_SETTLE: Duration = Duration::from_secs(5);

/// Collaborators a controller is built from.
#[derive(Clone)]
pub struct ControllerDeps {
    pub config: Arc<AppConfig>,
    pub channel: Arc<dyn Channel>,
    pub runtime: Arc<dyn AgentRuntime>,
    pub terminal: Arc<dyn Terminal>,
    pub permissions: PermissionStore,
}

/// One parsed inbound event, as the controller sees it.
#[derive(Debug, Clone)]
pub enum ControllerInput {
    Text(String),
    Image {
        caption: Option<String>,
        images: Vec<ImageAttachment>,
    },
    Command(Command),
    Callback {
        action_id: String,
        callback: Callback,
    },
}

impl ControllerInput {
    /// Approval answers, which must not queue behind the turn they unblock.
    pub fn is_authorization(&self) -> bool {
        match self {
            ControllerInput::Command(command) => command.is_authorization(),
            ControllerInput::Callback { callback, .. } => callback.is_authorization(),
            _ => false,
        }
    }
}

struct Prompt {
    text: String,
    images: Vec<ImageAttachment>,
}

enum Signal {
    PromptFinished { turn: u64, error: Option<String> },
}

#[derive(Default)]
struct TurnState {
    running: bool,
    /// Id of the current (or last) turn.
    turn: u64,
    /// The feed has announced the current turn. Feed turn ends before that
    /// belong to an earlier turn.
    started: bool,
    /// Error carried only by the feed's turn end.
    feed_error: Option<String>,
    /// Turn whose error has already been shown.
    reported: u64,
    queued: Option<Prompt>,
    prompt_task: Option<JoinHandle<()>>,
}

struct AgentState {
    session: Option<Arc<dyn AgentSession>>,
    signals: Option<mpsc::UnboundedSender<Signal>>,
    consumer: Option<JoinHandle<()>>,
    thinking: ThinkingLevel,
}

pub struct ChatController {
    key: String,
    conv: ConversationRef,
    deps: ControllerDeps,
    sink: StreamSink,
    evaluator: Arc<PermissionEvaluator>,
    authorizer: Arc<ToolAuthorizer>,
    tmux: TmuxBridge,
    session_dir: PathBuf,
    agent: Mutex<AgentState>,
    turn: Mutex<TurnState>,
    running: AtomicBool,
    /// Serializes read-modify-write of the permission file.
    permissions_lock: Mutex<()>,
}

impl ChatController {
    pub async fn new(conv: ConversationRef, deps: ControllerDeps) -> Arc<Self> {
        let key = conv.key();
        let config = deps.config.clone();

        let permissions = match deps.permissions.load(&key).await {
            Ok(permissions) => permissions,
            Err(e) => {
                warn!(conversation = %key, "Failed to load permissions, using defaults: {}", e);
                PermissionConfig::default()
            }
        };
        let home = PathBuf::from(shellexpand::tilde("~").into_owned());
        let evaluator = Arc::new(PermissionEvaluator::new(
            permissions,
            config.agent.workdir(),
            home,
        ));
        let authorizer = Arc::new(ToolAuthorizer::new(
            deps.channel.clone(),
            conv.clone(),
            evaluator.clone(),
            Duration::from_secs(config.authorizer.timeout_secs),
        ));
        let sink = StreamSink::new(deps.channel.clone(), conv.clone(), config.stream.clone());
        let tmux = TmuxBridge::new(
            deps.terminal.clone(),
            deps.channel.clone(),
            conv.clone(),
            config.tmux.clone(),
        );

        info!(conversation = %key, "Created chat controller");
        Arc::new(Self {
            session_dir: session_dir(&config.agent.sessions_dir(), &key),
            key,
            conv,
            sink,
            evaluator,
            authorizer,
            tmux,
            agent: Mutex::new(AgentState {
                session: None,
                signals: None,
                consumer: None,
                thinking: default_thinking(&config),
            }),
            turn: Mutex::new(TurnState::default()),
            running: AtomicBool::new(false),
            permissions_lock: Mutex::new(()),
            deps,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn conversation(&self) -> &ConversationRef {
        &self.conv
    }

    /// Whether an agent turn is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn evaluator(&self) -> &Arc<PermissionEvaluator> {
        &self.evaluator
    }

    pub fn authorizer(&self) -> &Arc<ToolAuthorizer> {
        &self.authorizer
    }

    pub fn tmux(&self) -> &TmuxBridge {
        &self.tmux
    }

    pub async fn has_session(&self) -> bool {
        self.agent.lock().await.session.is_some()
    }

    /// Handle one input. Failures are reported to the conversation.
    pub async fn handle(self: &Arc<Self>, input: ControllerInput) {
        let result = match input {
            ControllerInput::Text(text) => self.handle_text(text).await,
            ControllerInput::Image { caption, images } => self.handle_image(caption, images).await,
            ControllerInput::Command(command) => self.handle_command(command).await,
            ControllerInput::Callback {
                action_id,
                callback,
            } => self.handle_callback(action_id, callback).await,
        };
        if let Err(e) = result {
            warn!(conversation = %self.key, "Input failed: {}", e);
            self.sink.notice(&format!("❌ {}", e)).await;
        }
    }

    /// Re-read the permission file. A bad file keeps the current policy.
    pub async fn reload_permissions(&self) {
        match self.deps.permissions.load(&self.key).await {
            Ok(config) => {
                self.evaluator.replace(config);
                info!(conversation = %self.key, "Reloaded permissions");
            }
            Err(e) => {
                warn!(conversation = %self.key, "Keeping previous permissions: {}", e);
            }
        }
    }

    /// Tear down the agent side: abort the turn, cancel pending approvals,
    /// drop buffered output and the session. Tmux state is untouched.
    pub async fn dispose(&self) {
        let mut turn = self.turn.lock().await;
        let mut agent = self.agent.lock().await;

        if turn.running {
            if let Some(session) = &agent.session {
                if let Err(e) = session.abort().await {
                    warn!(conversation = %self.key, "Abort during dispose failed: {}", e);
                }
            }
        }
        self.authorizer.dispose().await;
        if let Some(task) = turn.prompt_task.take() {
            task.abort();
        }
        turn.running = false;
        turn.queued = None;
        // Stale completion signals must not match anything after this.
        turn.turn += 1;
        self.running.store(false, Ordering::SeqCst);
        self.sink.clear().await;

        if let Some(consumer) = agent.consumer.take() {
            consumer.abort();
        }
        agent.session = None;
        agent.signals = None;
        info!(conversation = %self.key, "Disposed agent session");
    }

    async fn handle_text(self: &Arc<Self>, text: String) -> anyhow::Result<()> {
        let binding = topic_binding(
            self.conv.thread_name.as_deref(),
            &self.deps.config.tmux.topic_prefix,
        );
        if binding != TopicBinding::None {
            return self.tmux.send_direct(&text, &binding).await;
        }
        if self.tmux.direct_mode().await {
            return self.tmux.send_managed(&text).await;
        }
        self.submit(Prompt {
            text,
            images: Vec::new(),
        })
        .await
    }

    async fn handle_image(
        self: &Arc<Self>,
        caption: Option<String>,
        images: Vec<ImageAttachment>,
    ) -> anyhow::Result<()> {
        let binding = topic_binding(
            self.conv.thread_name.as_deref(),
            &self.deps.config.tmux.topic_prefix,
        );
        if binding != TopicBinding::None || self.tmux.direct_mode().await {
            anyhow::bail!("Images can't be typed into a terminal.");
        }
        self.submit(Prompt {
            text: caption.unwrap_or_default(),
            images,
        })
        .await
    }

    /// Start a turn, or steer/queue when one is already running.
    async fn submit(self: &Arc<Self>, prompt: Prompt) -> anyhow::Result<()> {
        let mut turn = self.turn.lock().await;
        if !turn.running {
            return self.start_prompt(&mut turn, prompt).await;
        }

        if prompt.images.is_empty() {
            let session = self.agent.lock().await.session.clone();
            if let Some(session) = session.filter(|s| s.supports_steer()) {
                match session.steer(&prompt.text).await {
                    Ok(()) => {
                        info!(conversation = %self.key, "Steered text into running turn");
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(conversation = %self.key, "Steer failed, queueing instead: {}", e);
                    }
                }
            }
        }

        let replaced = turn.queued.replace(prompt).is_some();
        drop(turn);
        info!(conversation = %self.key, replaced, "Queued prompt behind running turn");
        let notice = if replaced {
            "⏳ Replaced the queued message. It will run when the current turn ends."
        } else {
            "⏳ Queued. It will run when the current turn ends."
        };
        self.sink.notice(notice).await;
        Ok(())
    }

    /// Launch a turn, creating the session if needed. Caller holds the turn lock.
    async fn start_prompt(self: &Arc<Self>, turn: &mut TurnState, prompt: Prompt) -> anyhow::Result<()> {
        let (session, signals) = self.init(true).await?;
        self.launch(turn, session, signals, prompt).await;
        Ok(())
    }

    async fn launch(
        &self,
        turn: &mut TurnState,
        session: Arc<dyn AgentSession>,
        signals: mpsc::UnboundedSender<Signal>,
        prompt: Prompt,
    ) {
        if let Some(mut previous) = turn.prompt_task.take() {
            if tokio::time::timeout(PROMPT_SETTLE, &mut previous).await.is_err() {
                warn!(conversation = %self.key, "Previous prompt call did not return, abandoning it");
                previous.abort();
            }
        }

        turn.turn += 1;
        turn.running = true;
        turn.started = false;
        turn.feed_error = None;
        self.running.store(true, Ordering::SeqCst);
        self.sink.begin_turn().await;

        let id = turn.turn;
        info!(conversation = %self.key, turn = id, images = prompt.images.len(), "Starting agent turn");
        turn.prompt_task = Some(tokio::spawn(async move {
            let error = session
                .prompt(&prompt.text, prompt.images)
                .await
                .err()
                .map(|e| e.to_string());
            let _ = signals.send(Signal::PromptFinished { turn: id, error });
        }));
    }

    /// End turn `id` once. The prompt call returning (or an abort) is what
    /// ends a turn; the feed's turn end only contributes its error. Replays a
    /// queued prompt afterwards.
    async fn finish_turn(&self, id: u64, error: Option<String>) {
        let mut turn = self.turn.lock().await;
        if turn.turn != id || !turn.running {
            return;
        }
        let error = error.or_else(|| turn.feed_error.take());

        self.sink.finish_turn().await;
        turn.running = false;
        self.running.store(false, Ordering::SeqCst);
        info!(conversation = %self.key, turn = id, failed = error.is_some(), "Agent turn ended");

        if let Some(error) = error.filter(|_| turn.reported != id) {
            turn.reported = id;
            self.report_agent_error(&error).await;
        }

        if let Some(next) = turn.queued.take() {
            let live = {
                let agent = self.agent.lock().await;
                agent.session.clone().zip(agent.signals.clone())
            };
            match live {
                Some((session, signals)) => {
                    info!(conversation = %self.key, "Replaying queued prompt");
                    self.launch(&mut turn, session, signals, next).await;
                }
                None => warn!(conversation = %self.key, "Dropping queued prompt, session is gone"),
            }
        }
    }

    /// Recoverable failures on a non-default model fall back to the default.
    async fn report_agent_error(&self, error: &str) {
        let class = ErrorClass::classify(error);
        warn!(conversation = %self.key, class = %class, "Agent turn failed: {}", error);

        let default_model = &self.deps.config.agent.default_model;
        let session = self.agent.lock().await.session.clone();
        if let Some(session) = session {
            let current = session.model();
            if class.is_recoverable() && current != *default_model {
                match session.set_model(default_model).await {
                    Ok(()) => {
                        info!(conversation = %self.key, from = %current, to = %default_model, "Fell back to default model");
                        self.sink
                            .notice(&format!(
                                "⚠️ {} error on {}. Switched to {}, please retry.",
                                class, current, default_model
                            ))
                            .await;
                        return;
                    }
                    Err(e) => {
                        warn!(conversation = %self.key, "Fallback to default model failed: {}", e);
                    }
                }
            }
        }
        self.sink.notice(&format!("Error: {}", error)).await;
    }

    /// The live session, created on first use. With `resume`, a fresh session
    /// picks up the newest saved one for this conversation.
    async fn init(
        self: &Arc<Self>,
        resume: bool,
    ) -> anyhow::Result<(Arc<dyn AgentSession>, mpsc::UnboundedSender<Signal>)> {
        let mut agent = self.agent.lock().await;
        if let (Some(session), Some(signals)) = (&agent.session, &agent.signals) {
            return Ok((session.clone(), signals.clone()));
        }

        let config = &self.deps.config;
        let cwd = config.agent.workdir();
        let mut tools = self.deps.runtime.builtin_tools(&cwd);
        tools.extend(tmux_tools(self.deps.terminal.clone(), config.tmux.capture_lines));
        let tools = tools
            .into_iter()
            .map(|tool| AuthorizedTool::wrap(tool, self.authorizer.clone()))
            .collect();

        let previous = if resume {
            match list_saved_sessions(&self.session_dir).await {
                Ok(saved) => saved.into_iter().next(),
                Err(e) => {
                    warn!(conversation = %self.key, "Failed to list saved sessions: {}", e);
                    None
                }
            }
        } else {
            None
        };

        tokio::fs::create_dir_all(&self.session_dir).await.map_err(|e| {
            anyhow::anyhow!("Failed to create {}: {}", self.session_dir.display(), e)
        })?;
        let session = self
            .deps
            .runtime
            .create_session(SessionOptions {
                cwd,
                session_dir: self.session_dir.clone(),
                model: config.agent.default_model.clone(),
                thinking: agent.thinking,
                tools,
            })
            .await?;

        if let Some(previous) = previous {
            match session.switch_session(&previous.path).await {
                Ok(()) => {
                    info!(conversation = %self.key, path = %previous.path.display(), "Resumed saved session")
                }
                Err(e) => warn!(conversation = %self.key, "Failed to resume saved session: {}", e),
            }
        }

        let feed = session
            .subscribe()
            .ok_or_else(|| anyhow::anyhow!("Agent session feed is already taken"))?;
        let (signals, signal_rx) = mpsc::unbounded_channel();
        agent.consumer = Some(tokio::spawn(consume(Arc::downgrade(self), feed, signal_rx)));
        agent.session = Some(session.clone());
        agent.signals = Some(signals.clone());
        info!(conversation = %self.key, model = %session.model(), "Agent session ready");
        Ok((session, signals))
    }

    async fn on_event(&self, event: AgentEvent) {
        match event {
            AgentEvent::TurnStart => {
                let mut turn = self.turn.lock().await;
                if turn.running && !turn.started {
                    turn.started = true;
                    debug!(conversation = %self.key, turn = turn.turn, "Turn start");
                } else {
                    debug!(conversation = %self.key, "Ignoring unexpected turn start");
                }
            }
            AgentEvent::TextDelta(delta) => self.sink.push_text(&delta).await,
            AgentEvent::ThinkingDelta(_) => {}
            AgentEvent::ToolStart { name, args, .. } => {
                self.sink
                    .notice(&format!("🔧 {}", describe_call(&name, &args)))
                    .await
            }
            AgentEvent::ToolEnd { name, is_error, .. } => {
                if is_error {
                    self.sink.notice(&format!("⚠️ {} failed", name)).await;
                }
            }
            AgentEvent::TurnEnd { error_message } => {
                let mut turn = self.turn.lock().await;
                if turn.running && turn.started {
                    turn.started = false;
                    if turn.feed_error.is_none() {
                        turn.feed_error = error_message;
                    }
                    debug!(conversation = %self.key, turn = turn.turn, "Turn end");
                } else {
                    debug!(conversation = %self.key, "Ignoring turn end outside a turn");
                }
            }
            AgentEvent::Other(kind) => {
                debug!(conversation = %self.key, kind = %kind, "Ignoring agent event")
            }
        }
    }
}

/// Drain one session's feed plus the controller's own completion signals.
/// Feed events win ties so a turn's last deltas land before it is closed.
async fn consume(
    controller: Weak<ChatController>,
    mut feed: mpsc::UnboundedReceiver<AgentEvent>,
    mut signals: mpsc::UnboundedReceiver<Signal>,
) {
    loop {
        tokio::select! {
            biased;
            Some(event) = feed.recv() => {
                let Some(controller) = controller.upgrade() else { break };
                controller.on_event(event).await;
            }
            Some(signal) = signals.recv() => {
                let Some(controller) = controller.upgrade() else { break };
                match signal {
                    Signal::PromptFinished { turn, error } => controller.finish_turn(turn, error).await,
                }
            }
            else => break,
        }
    }
}

fn default_thinking(config: &AppConfig) -> ThinkingLevel {
    ThinkingLevel::parse(&config.agent.default_thinking).unwrap_or(ThinkingLevel::Medium)
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::console::classify::classify;
use crate::console::event::{ConsoleMessage, LogEvent, ServerId};
use crate::console::observer::{ChannelError, ObserverChannel, ObserverId};
use crate::docker::provider::HandleProvider;
use crate::docker::runtime::{ContainerHandle, ContainerRuntime, RuntimeError};
use crate::history::HistoryStore;

/// Lifecycle of a console session. CLOSED is terminal; a server gets a new
/// console only through a brand-new session instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Created,
    AttachingContainer,
    Streaming,
    Draining,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        matches!(
            (self, target),
            (SessionState::Created, SessionState::AttachingContainer)
                | (SessionState::AttachingContainer, SessionState::Streaming)
                | (SessionState::AttachingContainer, SessionState::Closed)
                | (SessionState::Streaming, SessionState::Draining)
                | (SessionState::Draining, SessionState::Closed)
        )
    }

    pub fn accepts_commands(&self) -> bool {
        matches!(self, SessionState::Streaming)
    }
}

#[derive(Debug, Clone, Error)]
pub enum AttachError {
    /// Container absent or stopped. The wording is surfaced to the client.
    #[error("Server is not running")]
    NotRunning,

    /// Runtime unreachable after the internal retry.
    #[error("container runtime unreachable: {0}")]
    Unreachable(String),

    /// The session is draining or closed; the caller should evict it and
    /// attach to a fresh one.
    #[error("console session is shutting down")]
    Stale,
}

#[derive(Debug, Clone, Error)]
pub enum CommandError {
    #[error("Server is not running")]
    NotRunning,

    #[error("failed to submit command: {0}")]
    Runtime(String),
}

/// Per-session tunables, shared by every session the registry creates.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Lines re-tailed from the runtime's buffer when the reader starts.
    pub log_tail_lines: usize,
    /// Persisted entries replayed to a newly attached observer.
    pub replay_limit: i64,
    /// Bound of the fire-and-forget persistence queue.
    pub persist_queue_capacity: usize,
    /// How long draining waits for queued history writes.
    pub flush_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            log_tail_lines: 100,
            replay_limit: 100,
            persist_queue_capacity: 512,
            flush_grace: Duration::from_secs(5),
        }
    }
}

fn set_state(state: &mut SessionState, to: SessionState, server_id: ServerId) {
    if !state.can_transition_to(to) {
        warn!(
            server_id,
            "unexpected session state transition {:?} -> {:?}", state, to
        );
    }
    *state = to;
}

/// The live streaming/control context for one server's container.
///
/// Owns the single background log reader and the persistence writer, tracks
/// attached observers, and serializes command submission. Created lazily by
/// the [`SessionRegistry`](crate::console::registry::SessionRegistry) on
/// first attach; exactly one non-closed instance exists per server.
pub struct StreamingSession {
    server_id: ServerId,
    runtime: Arc<dyn ContainerRuntime>,
    provider: Arc<HandleProvider>,
    history: Arc<dyn HistoryStore>,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    observers: Mutex<HashMap<ObserverId, ObserverChannel>>,
    // held across submit + echo so COMMAND events keep submission order
    command_gate: Mutex<()>,
    cancel: CancellationToken,
    persist_tx: Mutex<Option<mpsc::Sender<LogEvent>>>,
    persist_task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingSession {
    pub fn new(
        server_id: ServerId,
        runtime: Arc<dyn ContainerRuntime>,
        provider: Arc<HandleProvider>,
        history: Arc<dyn HistoryStore>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            server_id,
            runtime,
            provider,
            history,
            settings,
            state: Mutex::new(SessionState::Created),
            observers: Mutex::new(HashMap::new()),
            command_gate: Mutex::new(()),
            cancel: CancellationToken::new(),
            persist_tx: Mutex::new(None),
            persist_task: Mutex::new(None),
        })
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    pub async fn observer_count(&self) -> usize {
        self.observers.lock().await.len()
    }

    /// Request cancellation of the background reader. The reader observes
    /// the signal between lines and then drains and closes the session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Join an observer: on the first attach this resolves the container and
    /// starts the reader; afterwards the observer receives a bounded history
    /// replay and is added to live fan-out.
    pub async fn attach(self: &Arc<Self>, observer: ObserverChannel) -> Result<(), AttachError> {
        {
            let mut state = self.state.lock().await;
            match *state {
                SessionState::Created => {
                    set_state(&mut state, SessionState::AttachingContainer, self.server_id);
                    match self.resolve_container().await {
                        Ok(handle) => {
                            self.start_streaming(handle).await;
                            set_state(&mut state, SessionState::Streaming, self.server_id);
                            info!(server_id = self.server_id, "console session streaming");
                        }
                        Err(err) => {
                            set_state(&mut state, SessionState::Closed, self.server_id);
                            return Err(err);
                        }
                    }
                }
                SessionState::Streaming => {}
                SessionState::AttachingContainer
                | SessionState::Draining
                | SessionState::Closed => return Err(AttachError::Stale),
            }
        }

        self.replay_history(&observer).await;

        // Re-check under the lock: the session may have drained while the
        // replay query ran, and a late insert would strand the observer.
        let state = self.state.lock().await;
        if *state != SessionState::Streaming {
            return Err(AttachError::Stale);
        }
        self.observers.lock().await.insert(observer.id(), observer);
        Ok(())
    }

    /// Remove an observer. Returns the remaining count if it was attached.
    pub async fn detach(&self, observer_id: ObserverId) -> Option<usize> {
        let mut observers = self.observers.lock().await;
        observers.remove(&observer_id)?;
        Some(observers.len())
    }

    /// Inject an operator command into the container and echo it to every
    /// observer as a COMMAND-tagged event, in submission order.
    pub async fn submit_command(&self, command: &str) -> Result<(), CommandError> {
        let _gate = self.command_gate.lock().await;

        if !self.state.lock().await.accepts_commands() {
            return Err(CommandError::NotRunning);
        }

        let handle = match self.provider.resolve(self.server_id).await {
            Ok(handle) => handle,
            Err(RuntimeError::NotFound) => return Err(CommandError::NotRunning),
            Err(RuntimeError::Transient(msg)) => return Err(CommandError::Runtime(msg)),
        };

        if let Err(err) = self.runtime.submit_input(&handle, command).await {
            self.provider.invalidate(self.server_id).await;
            return Err(match err {
                RuntimeError::NotFound => CommandError::NotRunning,
                RuntimeError::Transient(msg) => CommandError::Runtime(msg),
            });
        }

        self.dispatch(LogEvent::command(self.server_id, command)).await;
        Ok(())
    }

    async fn resolve_container(&self) -> Result<ContainerHandle, AttachError> {
        match self.provider.resolve(self.server_id).await {
            Ok(handle) => Ok(handle),
            Err(RuntimeError::NotFound) => Err(AttachError::NotRunning),
            Err(RuntimeError::Transient(first)) => {
                warn!(
                    server_id = self.server_id,
                    "container resolve failed, retrying once: {first}"
                );
                match self.provider.resolve(self.server_id).await {
                    Ok(handle) => Ok(handle),
                    Err(RuntimeError::NotFound) => Err(AttachError::NotRunning),
                    Err(RuntimeError::Transient(second)) => Err(AttachError::Unreachable(second)),
                }
            }
        }
    }

    async fn start_streaming(self: &Arc<Self>, handle: ContainerHandle) {
        let (tx, rx) = mpsc::channel(self.settings.persist_queue_capacity);
        *self.persist_tx.lock().await = Some(tx);
        *self.persist_task.lock().await =
            Some(tokio::spawn(persist_writer(self.history.clone(), rx)));

        // The reader is not joined anywhere; its lifecycle is governed by
        // the cancellation token and the stream itself.
        let session = self.clone();
        tokio::spawn(async move { session.run_reader(handle).await });
    }

    /// The single background reader: tail recent output, then follow until
    /// cancellation, end-of-stream, or a read error.
    async fn run_reader(self: Arc<Self>, handle: ContainerHandle) {
        let stream = self
            .runtime
            .stream_output(&handle, self.settings.log_tail_lines)
            .await;

        let mut stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(server_id = self.server_id, "failed to open log stream: {err}");
                self.provider.invalidate(self.server_id).await;
                self.drain_and_close().await;
                return;
            }
        };

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(server_id = self.server_id, "log reader cancelled");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let event = LogEvent::container(
                            self.server_id,
                            classify(line),
                            line.to_string(),
                        );
                        self.dispatch(event).await;
                    }
                    Some(Err(err)) => {
                        warn!(
                            server_id = self.server_id,
                            "error reading container output: {err}"
                        );
                        self.provider.invalidate(self.server_id).await;
                        break;
                    }
                    None => {
                        info!(server_id = self.server_id, "container log stream ended");
                        break;
                    }
                }
            }
        }

        self.drain_and_close().await;
    }

    /// classify → persist → broadcast, one call per produced event.
    async fn dispatch(&self, event: LogEvent) {
        self.persist(&event).await;
        self.broadcast(&event).await;
    }

    /// Fire-and-forget enqueue toward the history writer. A full queue
    /// drops the write, never the delivery.
    async fn persist(&self, event: &LogEvent) {
        let guard = self.persist_tx.lock().await;
        if let Some(tx) = guard.as_ref() {
            if tx.try_send(event.clone()).is_err() {
                warn!(
                    server_id = event.server_id,
                    "history queue full, dropping line"
                );
            }
        }
    }

    /// Deliver to every attached observer; a failed or overflowing channel
    /// is detached without affecting the rest.
    async fn broadcast(&self, event: &LogEvent) {
        let message = ConsoleMessage::from(event);
        let mut observers = self.observers.lock().await;
        observers.retain(|id, channel| match channel.push(message.clone()) {
            Ok(()) => true,
            Err(ChannelError::Overflow) => {
                warn!(
                    server_id = event.server_id,
                    observer = %id,
                    "observer cannot keep up, detaching"
                );
                false
            }
            Err(ChannelError::Disconnected) => false,
        });
    }

    /// Push the most recent persisted lines to one observer, oldest first.
    /// Best-effort: a failed store read skips the replay, never the attach.
    async fn replay_history(&self, observer: &ObserverChannel) {
        let logs = match self
            .history
            .recent_logs(self.server_id, self.settings.replay_limit)
            .await
        {
            Ok(logs) => logs,
            Err(err) => {
                warn!(
                    server_id = self.server_id,
                    "failed to load history for replay: {err:#}"
                );
                return;
            }
        };

        for log in logs.into_iter().rev() {
            let message = ConsoleMessage::Log {
                message: log.message,
                log_level: log.level,
                timestamp: log.timestamp,
            };
            if observer.push(message).is_err() {
                break;
            }
        }
    }

    /// Flush queued persistence, notify and detach every observer, close.
    async fn drain_and_close(&self) {
        {
            let mut state = self.state.lock().await;
            if matches!(*state, SessionState::Draining | SessionState::Closed) {
                return;
            }
            set_state(&mut state, SessionState::Draining, self.server_id);
        }

        // Dropping the sender lets the writer task drain to completion;
        // the grace timeout bounds how long closing waits for it.
        let tx = self.persist_tx.lock().await.take();
        drop(tx);
        if let Some(task) = self.persist_task.lock().await.take() {
            if tokio::time::timeout(self.settings.flush_grace, task)
                .await
                .is_err()
            {
                warn!(
                    server_id = self.server_id,
                    "history flush exceeded grace period"
                );
            }
        }

        {
            let mut observers = self.observers.lock().await;
            for (_, channel) in observers.drain() {
                let _ = channel.push(ConsoleMessage::Info {
                    message: "Console stream closed".to_string(),
                });
            }
        }

        let mut state = self.state.lock().await;
        set_state(&mut state, SessionState::Closed, self.server_id);
        info!(server_id = self.server_id, "console session closed");
    }
}

async fn persist_writer(history: Arc<dyn HistoryStore>, mut rx: mpsc::Receiver<LogEvent>) {
    while let Some(event) = rx.recv().await {
        if let Err(err) = history
            .append_log(event.server_id, event.log_level(), &event.text)
            .await
        {
            warn!(
                server_id = event.server_id,
                "failed to persist console line: {err:#}"
            );
        }
    }
}

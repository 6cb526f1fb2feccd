//! Scripted collaborators for exercising the console core without Docker or
//! Postgres.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use crate::console::event::{ConsoleMessage, ServerId};
use crate::console::registry::{SessionRegistry, TeardownPolicy};
use crate::console::session::SessionSettings;
use crate::docker::provider::HandleProvider;
use crate::docker::runtime::{
    ContainerHandle, ContainerRuntime, LineStream, ResourceCounters, RuntimeError,
};
use crate::history::{HistoryStore, StoredLog};

type ResolveResult = Result<ContainerHandle, RuntimeError>;

/// In-memory [`ContainerRuntime`] whose resolution outcomes are scripted and
/// whose log stream is fed by the test.
pub struct FakeRuntime {
    pub resolve_calls: AtomicUsize,
    pub streams_opened: AtomicUsize,
    resolve_default: ResolveResult,
    resolve_script: Mutex<VecDeque<ResolveResult>>,
    resolve_delay: Mutex<Option<Duration>>,
    line_senders: Mutex<Vec<mpsc::UnboundedSender<Result<String, RuntimeError>>>>,
    submitted: Mutex<Vec<String>>,
    submit_result: Mutex<Result<(), RuntimeError>>,
    counters: Mutex<Result<ResourceCounters, RuntimeError>>,
}

impl FakeRuntime {
    pub fn handle() -> ContainerHandle {
        ContainerHandle {
            id: "f00dcafe".to_string(),
            name: "minecraft_server_7".to_string(),
        }
    }

    fn with_default(resolve_default: ResolveResult) -> Self {
        Self {
            resolve_calls: AtomicUsize::new(0),
            streams_opened: AtomicUsize::new(0),
            resolve_default,
            resolve_script: Mutex::new(VecDeque::new()),
            resolve_delay: Mutex::new(None),
            line_senders: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            submit_result: Mutex::new(Ok(())),
            counters: Mutex::new(Ok(ResourceCounters::default())),
        }
    }

    /// Every resolution succeeds.
    pub fn found() -> Self {
        Self::with_default(Ok(Self::handle()))
    }

    /// Every resolution reports the container as absent.
    pub fn not_found() -> Self {
        Self::with_default(Err(RuntimeError::NotFound))
    }

    /// Queue outcomes for the next resolutions; once drained, the default
    /// outcome applies again.
    pub fn script_resolve(&self, outcomes: Vec<ResolveResult>) {
        self.resolve_script.lock().unwrap().extend(outcomes);
    }

    pub fn set_resolve_delay(&self, delay: Duration) {
        *self.resolve_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_counters(&self, counters: Result<ResourceCounters, RuntimeError>) {
        *self.counters.lock().unwrap() = counters;
    }

    pub fn set_submit_result(&self, result: Result<(), RuntimeError>) {
        *self.submit_result.lock().unwrap() = result;
    }

    /// Feed one line to every open log stream.
    pub fn push_line(&self, line: &str) {
        for tx in self.line_senders.lock().unwrap().iter() {
            let _ = tx.send(Ok(line.to_string()));
        }
    }

    /// Inject a read error into every open log stream.
    pub fn fail_streams(&self, message: &str) {
        for tx in self.line_senders.lock().unwrap().iter() {
            let _ = tx.send(Err(RuntimeError::Transient(message.to_string())));
        }
    }

    /// End every open log stream, as if the container stopped.
    pub fn close_streams(&self) {
        self.line_senders.lock().unwrap().clear();
    }

    /// Streams whose reading side is still alive.
    pub fn open_stream_count(&self) -> usize {
        self.line_senders
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

/// A registry wired to fakes, with the panel's container naming.
pub fn console_registry(
    runtime: Arc<FakeRuntime>,
    history: Arc<MemoryHistory>,
    policy: TeardownPolicy,
) -> SessionRegistry {
    let provider = Arc::new(HandleProvider::new(
        runtime.clone(),
        "minecraft_server_".to_string(),
        Duration::from_secs(1),
    ));
    SessionRegistry::new(
        runtime,
        provider,
        history,
        SessionSettings::default(),
        policy,
    )
}

/// Await the next log frame, with a deadline so broken tests fail loudly.
pub async fn expect_log(rx: &mut mpsc::Receiver<ConsoleMessage>) -> (String, String) {
    match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
        Ok(Some(ConsoleMessage::Log {
            message, log_level, ..
        })) => (message, log_level),
        Ok(other) => panic!("expected log frame, got {other:?}"),
        Err(_) => panic!("timed out waiting for log frame"),
    }
}

/// Await the next info frame.
pub async fn expect_info(rx: &mut mpsc::Receiver<ConsoleMessage>) -> String {
    match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
        Ok(Some(ConsoleMessage::Info { message })) => message,
        Ok(other) => panic!("expected info frame, got {other:?}"),
        Err(_) => panic!("timed out waiting for info frame"),
    }
}

/// Poll a condition until it holds, failing after ~2 seconds.
pub async fn wait_for(condition: impl Fn() -> bool, what: &str) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn resolve(&self, _name: &str) -> ResolveResult {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.resolve_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.resolve_script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.resolve_default.clone())
    }

    async fn stream_output(
        &self,
        _handle: &ContainerHandle,
        _tail: usize,
    ) -> Result<LineStream, RuntimeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.line_senders.lock().unwrap().push(tx);
        self.streams_opened.fetch_add(1, Ordering::SeqCst);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn submit_input(
        &self,
        _handle: &ContainerHandle,
        text: &str,
    ) -> Result<(), RuntimeError> {
        self.submitted.lock().unwrap().push(text.to_string());
        self.submit_result.lock().unwrap().clone()
    }

    async fn sample_counters(
        &self,
        _handle: &ContainerHandle,
    ) -> Result<ResourceCounters, RuntimeError> {
        self.counters.lock().unwrap().clone()
    }
}

/// In-memory [`HistoryStore`]; appends in arrival order, optionally failing
/// every write to exercise the fire-and-forget path.
pub struct MemoryHistory {
    entries: Mutex<Vec<(ServerId, StoredLog)>>,
    fail_writes: AtomicBool,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn failing() -> Self {
        let store = Self::new();
        store.fail_writes.store(true, Ordering::SeqCst);
        store
    }

    pub fn seed(&self, server_id: ServerId, level: &str, message: &str) {
        self.entries.lock().unwrap().push((
            server_id,
            StoredLog {
                level: level.to_string(),
                message: message.to_string(),
                timestamp: Utc::now(),
            },
        ));
    }

    pub fn entries_for(&self, server_id: ServerId) -> Vec<StoredLog> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == server_id)
            .map(|(_, log)| log.clone())
            .collect()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append_log(
        &self,
        server_id: ServerId,
        level: &str,
        message: &str,
    ) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("history backend unavailable");
        }
        self.seed(server_id, level, message);
        Ok(())
    }

    async fn recent_logs(
        &self,
        server_id: ServerId,
        limit: i64,
    ) -> anyhow::Result<Vec<StoredLog>> {
        let mut logs = self.entries_for(server_id);
        logs.reverse();
        logs.truncate(limit as usize);
        Ok(logs)
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::console::event::ServerId;
use crate::console::observer::{ObserverChannel, ObserverId};
use crate::console::session::{
    AttachError, SessionSettings, SessionState, StreamingSession,
};
use crate::docker::provider::HandleProvider;
use crate::docker::runtime::ContainerRuntime;
use crate::history::HistoryStore;

/// What happens to a session when its last observer detaches.
#[derive(Debug, Clone, Copy)]
pub enum TeardownPolicy {
    /// Cancel the reader as soon as the last observer detaches (default).
    Eager,
    /// Keep streaming for a grace period to absorb rapid reconnects.
    Lazy { grace: Duration },
}

/// One live console session, as reported by the introspection endpoint.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ConsoleInfo {
    pub server_id: ServerId,
    pub state: SessionState,
    pub observers: usize,
}

/// Process-wide table of active console sessions, one per server at most.
///
/// All attach/detach/create/destroy traffic goes through here; sessions for
/// different servers never contend with each other beyond the brief map
/// lookup.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: Mutex<HashMap<ServerId, Arc<StreamingSession>>>,
    runtime: Arc<dyn ContainerRuntime>,
    provider: Arc<HandleProvider>,
    history: Arc<dyn HistoryStore>,
    settings: SessionSettings,
    policy: TeardownPolicy,
}

impl RegistryInner {
    fn get(&self, server_id: ServerId) -> Option<Arc<StreamingSession>> {
        self.sessions.lock().unwrap().get(&server_id).cloned()
    }

    /// Held only for map operations; session construction is synchronous, so
    /// two racing attaches cannot both insert a session for one server.
    fn get_or_create(&self, server_id: ServerId) -> Arc<StreamingSession> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(server_id)
            .or_insert_with(|| {
                debug!(server_id, "creating console session");
                StreamingSession::new(
                    server_id,
                    self.runtime.clone(),
                    self.provider.clone(),
                    self.history.clone(),
                    self.settings.clone(),
                )
            })
            .clone()
    }

    /// Evict `session` only if it is still the registered one, so a freshly
    /// recreated session is never clobbered by a stale eviction.
    fn remove_if(&self, server_id: ServerId, session: &Arc<StreamingSession>) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(current) = sessions.get(&server_id) {
            if Arc::ptr_eq(current, session) {
                sessions.remove(&server_id);
            }
        }
    }
}

impl SessionRegistry {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        provider: Arc<HandleProvider>,
        history: Arc<dyn HistoryStore>,
        settings: SessionSettings,
        policy: TeardownPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                runtime,
                provider,
                history,
                settings,
                policy,
            }),
        }
    }

    /// Attach an observer to the server's session, creating it on first
    /// attach. A session caught shutting down is evicted and the attach is
    /// retried once against a fresh instance.
    pub async fn attach(
        &self,
        server_id: ServerId,
        observer: ObserverChannel,
    ) -> Result<(), AttachError> {
        for _ in 0..2 {
            let session = self.inner.get_or_create(server_id);
            match session.attach(observer.clone()).await {
                Ok(()) => return Ok(()),
                Err(AttachError::Stale) => {
                    self.inner.remove_if(server_id, &session);
                    continue;
                }
                Err(err) => {
                    self.inner.remove_if(server_id, &session);
                    return Err(err);
                }
            }
        }
        Err(AttachError::NotRunning)
    }

    /// Drop an observer and apply the teardown policy when it was the last.
    pub async fn detach(&self, server_id: ServerId, observer_id: ObserverId) {
        let Some(session) = self.inner.get(server_id) else {
            return;
        };

        if session.state().await == SessionState::Closed {
            self.inner.remove_if(server_id, &session);
            return;
        }

        let Some(remaining) = session.detach(observer_id).await else {
            return;
        };
        if remaining > 0 {
            return;
        }

        match self.inner.policy {
            TeardownPolicy::Eager => {
                info!(server_id, "last observer detached, stopping console session");
                session.shutdown();
                self.inner.remove_if(server_id, &session);
            }
            TeardownPolicy::Lazy { grace } => {
                debug!(
                    server_id,
                    "last observer detached, holding session for {:?}", grace
                );
                let inner = Arc::downgrade(&self.inner);
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    if session.observer_count().await == 0
                        && session.state().await == SessionState::Streaming
                    {
                        info!(server_id, "grace period elapsed, stopping console session");
                        session.shutdown();
                        if let Some(inner) = inner.upgrade() {
                            inner.remove_if(server_id, &session);
                        }
                    }
                });
            }
        }
    }

    /// The live session for a server, if any (used by the command path and
    /// introspection; absent means "not running" to both).
    pub fn session(&self, server_id: ServerId) -> Option<Arc<StreamingSession>> {
        self.inner.get(server_id)
    }

    pub async fn snapshot(&self) -> Vec<ConsoleInfo> {
        let sessions: Vec<_> = self
            .inner
            .sessions
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();

        let mut consoles = Vec::with_capacity(sessions.len());
        for session in sessions {
            let state = session.state().await;
            if state == SessionState::Closed {
                continue;
            }
            consoles.push(ConsoleInfo {
                server_id: session.server_id(),
                state,
                observers: session.observer_count().await,
            });
        }
        consoles.sort_by_key(|info| info.server_id);
        consoles
    }
}

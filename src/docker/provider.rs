use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use crate::console::event::ServerId;

use super::runtime::{ContainerHandle, ContainerRuntime, RuntimeError};

/// Resolves a server id to a live [`ContainerHandle`] and memoizes the
/// result. A runtime-level failure on a cached handle must be reported via
/// [`HandleProvider::invalidate`] so the next use re-resolves.
///
/// Resolution is bounded by a timeout; hitting it surfaces as
/// [`RuntimeError::Transient`] ("currently unreachable"), never as absence.
pub struct HandleProvider {
    runtime: Arc<dyn ContainerRuntime>,
    cache: Mutex<HashMap<ServerId, ContainerHandle>>,
    name_prefix: String,
    resolve_timeout: Duration,
}

impl HandleProvider {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        name_prefix: String,
        resolve_timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            cache: Mutex::new(HashMap::new()),
            name_prefix,
            resolve_timeout,
        }
    }

    /// The panel names one container per server row.
    pub fn container_name(&self, server_id: ServerId) -> String {
        format!("{}{}", self.name_prefix, server_id)
    }

    pub async fn resolve(&self, server_id: ServerId) -> Result<ContainerHandle, RuntimeError> {
        if let Some(handle) = self.cache.lock().await.get(&server_id) {
            return Ok(handle.clone());
        }

        let name = self.container_name(server_id);
        let handle = match timeout(self.resolve_timeout, self.runtime.resolve(&name)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RuntimeError::Transient(format!(
                    "resolving container {name} timed out"
                )))
            }
        };

        debug!(server_id, container = %handle.name, "resolved container handle");
        self.cache.lock().await.insert(server_id, handle.clone());
        Ok(handle)
    }

    /// Drop the cached handle after a runtime failure observed through it.
    pub async fn invalidate(&self, server_id: ServerId) {
        self.cache.lock().await.remove(&server_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRuntime;
    use std::sync::atomic::Ordering;

    fn provider(runtime: Arc<FakeRuntime>) -> HandleProvider {
        HandleProvider::new(runtime, "minecraft_server_".to_string(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn memoizes_successful_resolution() {
        let runtime = Arc::new(FakeRuntime::found());
        let provider = provider(runtime.clone());

        let first = provider.resolve(7).await.unwrap();
        let second = provider.resolve(7).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(runtime.resolve_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_re_resolution() {
        let runtime = Arc::new(FakeRuntime::found());
        let provider = provider(runtime.clone());

        provider.resolve(7).await.unwrap();
        provider.invalidate(7).await;
        provider.resolve(7).await.unwrap();

        assert_eq!(runtime.resolve_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn absent_container_is_not_cached() {
        let runtime = Arc::new(FakeRuntime::not_found());
        let provider = provider(runtime.clone());

        assert!(matches!(
            provider.resolve(3).await,
            Err(RuntimeError::NotFound)
        ));
        assert!(matches!(
            provider.resolve(3).await,
            Err(RuntimeError::NotFound)
        ));
        assert_eq!(runtime.resolve_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_resolution_surfaces_as_transient() {
        let runtime = Arc::new(FakeRuntime::found());
        runtime.set_resolve_delay(Duration::from_secs(5));

        let provider = HandleProvider::new(
            runtime.clone(),
            "minecraft_server_".to_string(),
            Duration::from_millis(20),
        );

        assert!(matches!(
            provider.resolve(7).await,
            Err(RuntimeError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn container_name_uses_panel_convention() {
        let runtime = Arc::new(FakeRuntime::found());
        let provider = provider(runtime);
        assert_eq!(provider.container_name(42), "minecraft_server_42");
    }
}

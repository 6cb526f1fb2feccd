use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Failures surfaced by the container runtime.
///
/// `NotFound` is terminal for the attach attempt that hit it; `Transient`
/// means the runtime is currently unreachable and the operation may be
/// retried.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("container not found")]
    NotFound,

    #[error("container runtime unreachable: {0}")]
    Transient(String),
}

/// A verified-live container. Becomes stale when the container is removed
/// or the runtime connection drops; stale handles must be re-resolved, never
/// reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// Point-in-time CPU and memory counters as reported by the runtime.
/// Current and previous CPU totals come from the same sample, so deltas can
/// be derived without keeping state across ticks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceCounters {
    pub cpu_total: u64,
    pub precpu_total: u64,
    pub system_cpu: u64,
    pub presystem_cpu: u64,
    pub memory_used: u64,
    pub memory_limit: u64,
}

/// Infinite stream of raw console lines. Not restartable: a fresh call to
/// `stream_output` re-tails from the runtime's own buffer.
pub type LineStream = BoxStream<'static, Result<String, RuntimeError>>;

/// The container runtime collaborator (Docker in production).
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Look up a running container by name.
    async fn resolve(&self, name: &str) -> Result<ContainerHandle, RuntimeError>;

    /// Tail the most recent `tail` lines, then follow new output forever.
    async fn stream_output(
        &self,
        handle: &ContainerHandle,
        tail: usize,
    ) -> Result<LineStream, RuntimeError>;

    /// Write one line into the game process's input stream.
    async fn submit_input(&self, handle: &ContainerHandle, text: &str)
        -> Result<(), RuntimeError>;

    /// Fetch one stats snapshot.
    async fn sample_counters(
        &self,
        handle: &ContainerHandle,
    ) -> Result<ResourceCounters, RuntimeError>;
}

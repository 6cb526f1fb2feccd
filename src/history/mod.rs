pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::console::event::ServerId;

pub use postgres::PgHistoryStore;

/// One persisted console line as the panel database stores it. `level` is
/// kept as text because the COMMAND tag is persisted alongside the real
/// severities.
#[derive(Debug, Clone)]
pub struct StoredLog {
    pub level: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Persistence collaborator for console history. Writes are fire-and-forget
/// from the streaming path's point of view: failures are logged by the
/// caller and never interrupt delivery.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_log(
        &self,
        server_id: ServerId,
        level: &str,
        message: &str,
    ) -> anyhow::Result<()>;

    /// Most-recent-first, bounded by `limit`.
    async fn recent_logs(&self, server_id: ServerId, limit: i64)
        -> anyhow::Result<Vec<StoredLog>>;
}

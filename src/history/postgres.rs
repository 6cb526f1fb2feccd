use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Postgres};

use crate::console::event::ServerId;

use super::{HistoryStore, StoredLog};

#[derive(Debug, FromRow)]
struct LogRow {
    level: String,
    message: String,
    timestamp: DateTime<Utc>,
}

/// History adapter over the panel's log table. The schema belongs to the
/// panel; this service only appends and tails it.
pub struct PgHistoryStore {
    pool: Pool<Postgres>,
}

impl PgHistoryStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn append_log(
        &self,
        server_id: ServerId,
        level: &str,
        message: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO backend_serverlog (server_id, level, message, timestamp) \
             VALUES ($1, $2, $3, NOW())",
        )
        .bind(server_id)
        .bind(level)
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_logs(
        &self,
        server_id: ServerId,
        limit: i64,
    ) -> anyhow::Result<Vec<StoredLog>> {
        let rows = sqlx::query_as::<_, LogRow>(
            "SELECT level, message, timestamp FROM backend_serverlog \
             WHERE server_id = $1 ORDER BY timestamp DESC LIMIT $2",
        )
        .bind(server_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StoredLog {
                level: row.level,
                message: row.message,
                timestamp: row.timestamp,
            })
            .collect())
    }
}

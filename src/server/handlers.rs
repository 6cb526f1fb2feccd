use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::console::event::ServerId;
use crate::console::registry::ConsoleInfo;
use crate::server::auth::AuthUser;
use crate::server::error::{ApiError, ApiResult};
use crate::server::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct LogsQuery {
    /// Maximum entries to return, most recent first.
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogEntry {
    pub message: String,
    pub log_level: String,
    pub timestamp: DateTime<Utc>,
}

/// Recent persisted console lines for one server, most recent first. The
/// non-live counterpart of the console socket's `get_history` request.
#[utoipa::path(
    get,
    path = "/servers/{server_id}/logs",
    params(("server_id" = i64, Path, description = "Server id"), LogsQuery),
    responses(
        (status = 200, description = "Recent console lines", body = [LogEntry]),
        (status = 401, description = "Authentication required"),
        (status = 403, description = "No access to this server"),
    ),
    security(("bearer" = []))
)]
pub async fn server_logs(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<ServerId>,
    Query(query): Query<LogsQuery>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    if !state.access.has_access(server_id, user.user_id).await? {
        return Err(ApiError::Forbidden(
            "no access to this server".to_string(),
        ));
    }

    let limit = query
        .limit
        .unwrap_or(state.config.history_replay_limit)
        .clamp(1, 1000);

    let logs = state.history.recent_logs(server_id, limit).await?;

    Ok(Json(
        logs.into_iter()
            .map(|log| LogEntry {
                message: log.message,
                log_level: log.level,
                timestamp: log.timestamp,
            })
            .collect(),
    ))
}

/// Live console sessions currently held by this process.
#[utoipa::path(
    get,
    path = "/consoles",
    responses(
        (status = 200, description = "Active console sessions", body = [ConsoleInfo]),
        (status = 401, description = "Authentication required"),
    ),
    security(("bearer" = []))
)]
pub async fn list_consoles(
    State(state): State<Arc<AppState>>,
    Extension(_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<ConsoleInfo>>> {
    Ok(Json(state.registry.snapshot().await))
}

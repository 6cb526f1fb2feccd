use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use sqlx::{Pool, Postgres};
use tracing::info;

use crate::console::event::ServerId;
use crate::server::error::ApiError;
use crate::server::AppState;

/// Claims of the tokens the panel issues at login. `sub` carries the user's
/// primary key as text.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// The authenticated panel user, stored in request extensions.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
}

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims =
        decode_token(token, &state.config.jwt_secret).map_err(|_| StatusCode::UNAUTHORIZED)?;
    let user_id: i64 = claims.sub.parse().map_err(|_| StatusCode::UNAUTHORIZED)?;

    request.extensions_mut().insert(AuthUser { user_id });

    info!(
        method = %request.method(),
        path = %request.uri().path(),
        user_id,
        "API request"
    );

    Ok(next.run(request).await)
}

/// Token carried as a query parameter on WebSocket upgrades, since browsers
/// cannot set headers there.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// Validate the upgrade request's token, from the Authorization header or
/// the `token` query parameter.
pub fn authenticate_ws(
    state: &AppState,
    headers: &HeaderMap,
    query: &WsAuthQuery,
) -> Result<AuthUser, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| query.token.clone())
        .ok_or(ApiError::Unauthorized)?;

    let claims =
        decode_token(&token, &state.config.jwt_secret).map_err(|_| ApiError::Unauthorized)?;
    let user_id = claims.sub.parse().map_err(|_| ApiError::Unauthorized)?;

    Ok(AuthUser { user_id })
}

/// Ownership collaborator, consulted once per connection at attach time.
/// The panel re-checks nothing per message.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn has_access(&self, server_id: ServerId, user_id: i64) -> anyhow::Result<bool>;
}

/// Ownership check against the panel's user-profile tables.
pub struct PgAccessPolicy {
    pool: Pool<Postgres>,
}

impl PgAccessPolicy {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessPolicy for PgAccessPolicy {
    async fn has_access(&self, server_id: ServerId, user_id: i64) -> anyhow::Result<bool> {
        let owns: bool = sqlx::query_scalar(
            "SELECT EXISTS( \
                 SELECT 1 FROM backend_userprofile_owned_servers os \
                 JOIN backend_userprofile up ON up.id = os.userprofile_id \
                 WHERE os.server_id = $1 AND up.user_id = $2)",
        )
        .bind(server_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(owns)
    }
}

use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::server::openapi::ApiDoc;
use crate::server::{auth, handlers, ws_console, ws_stats, AppState};

pub fn create_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/version", get(version));

    let protected_routes = Router::new()
        .route("/servers/{server_id}/logs", get(handlers::server_logs))
        .route("/consoles", get(handlers::list_consoles))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let api_routes = public_routes
        .merge(protected_routes)
        .with_state(state.clone());

    // WebSocket upgrades validate their token themselves: browsers cannot
    // send an Authorization header on an upgrade request.
    let ws_routes = Router::new()
        .route("/ws/console/{server_id}", get(ws_console::console_ws))
        .route("/ws/stats/{server_id}", get(ws_stats::stats_ws))
        .with_state(state);

    Router::new()
        .nest("/api/v0", api_routes)
        .merge(ws_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn version() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "api": "v0"
    }))
}

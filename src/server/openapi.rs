use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

use crate::console::registry::ConsoleInfo;
use crate::console::session::SessionState;
use crate::console::stats::StatsSample;
use crate::server::error::{ErrorDetails, ErrorResponse};
use crate::server::handlers::LogEntry;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Craftpanel Console API",
        description = "REST surface of the real-time console service. The \
                       live console and stats streams are WebSocket \
                       endpoints (`/ws/console/{server_id}`, \
                       `/ws/stats/{server_id}`) and are not described here.",
        version = "0.1.0",
    ),
    modifiers(&SecurityAddon),
    paths(
        crate::server::handlers::server_logs,
        crate::server::handlers::list_consoles,
    ),
    components(schemas(
        LogEntry,
        ConsoleInfo,
        SessionState,
        StatsSample,
        ErrorResponse,
        ErrorDetails,
    ))
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

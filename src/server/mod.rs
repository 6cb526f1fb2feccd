pub mod auth;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod routes;
pub mod run;
pub mod ws_console;
pub mod ws_stats;

use std::sync::Arc;

use crate::config::Config;
use crate::console::registry::SessionRegistry;
use crate::console::stats::StatsSampler;
use crate::history::HistoryStore;

use auth::AccessPolicy;

/// Shared state behind every handler.
pub struct AppState {
    pub config: Config,
    pub registry: SessionRegistry,
    pub history: Arc<dyn HistoryStore>,
    pub access: Arc<dyn AccessPolicy>,
    pub sampler: Arc<StatsSampler>,
}

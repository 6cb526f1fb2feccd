use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::config::Config;
use crate::console::registry::SessionRegistry;
use crate::console::stats::StatsSampler;
use crate::docker::client::DockerRuntime;
use crate::docker::provider::HandleProvider;
use crate::docker::runtime::ContainerRuntime;
use crate::history::{HistoryStore, PgHistoryStore};
use crate::server::auth::{AccessPolicy, PgAccessPolicy};
use crate::server::routes::create_router;
use crate::server::AppState;

pub async fn run(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    dotenvy::dotenv().ok();

    let mut config = Config::load(config_path.as_deref())?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let pid = process::id();
    let pid_file = "/tmp/craftpanel-console.pid";
    if let Err(e) = fs::write(pid_file, pid.to_string()) {
        warn!("Could not write PID file: {}", e);
    }

    let pid_file_cleanup = pid_file.to_string();
    ctrlc::set_handler(move || {
        info!("Shutting down console service...");
        let _ = fs::remove_file(&pid_file_cleanup);
        std::process::exit(0);
    })?;

    info!("Starting Craftpanel console service, PID: {}", pid);

    info!("Connecting to PostgreSQL database...");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Database not available. Please check DATABASE_URL.")?;

    info!("Connecting to Docker daemon...");
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(
        DockerRuntime::connect(
            config.docker_socket.as_deref(),
            config.container_stdin_path.clone(),
        )
        .await?,
    );

    let provider = Arc::new(HandleProvider::new(
        runtime.clone(),
        config.container_name_prefix.clone(),
        config.resolve_timeout(),
    ));
    let history: Arc<dyn HistoryStore> = Arc::new(PgHistoryStore::new(pool.clone()));
    let access: Arc<dyn AccessPolicy> = Arc::new(PgAccessPolicy::new(pool));

    let registry = SessionRegistry::new(
        runtime.clone(),
        provider.clone(),
        history.clone(),
        config.session_settings(),
        config.teardown_policy(),
    );
    let sampler = Arc::new(StatsSampler::new(
        runtime,
        provider,
        config.stats_interval(),
    ));

    let bind_addr = format!("{}:{}", config.host, config.port);

    let state = Arc::new(AppState {
        config,
        registry,
        history,
        access,
        sampler,
    });
    let app = create_router(state);

    info!("Binding to: {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Console service started");
    info!("Console WebSocket: ws://{}/ws/console/{{server_id}}", bind_addr);
    info!("Stats WebSocket: ws://{}/ws/stats/{{server_id}}", bind_addr);
    info!("Swagger UI: http://{}/swagger-ui/", bind_addr);

    let result = axum::serve(listener, app).await;

    let _ = fs::remove_file(pid_file);

    result?;
    Ok(())
}

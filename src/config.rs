use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::console::registry::TeardownPolicy;
use crate::console::session::SessionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownMode {
    Eager,
    Lazy,
}

/// Service configuration: defaults, optionally overlaid by a YAML file,
/// then by environment variables for the deployment-specific values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    /// Explicit Docker socket path; default probes the standard locations.
    pub docker_socket: Option<String>,
    pub container_name_prefix: String,
    /// FIFO inside game containers wired to the server process's stdin.
    pub container_stdin_path: String,
    pub resolve_timeout_secs: u64,
    pub teardown: TeardownMode,
    pub teardown_grace_secs: u64,
    pub observer_queue_capacity: usize,
    pub history_replay_limit: i64,
    pub persist_queue_capacity: usize,
    pub flush_grace_secs: u64,
    pub stats_interval_secs: u64,
    pub log_tail_lines: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            database_url: "postgresql://postgres@localhost/craftpanel".to_string(),
            jwt_secret: "super-secret-key".to_string(),
            docker_socket: None,
            container_name_prefix: "minecraft_server_".to_string(),
            container_stdin_path: "/minecraft/stdin".to_string(),
            resolve_timeout_secs: 10,
            teardown: TeardownMode::Eager,
            teardown_grace_secs: 30,
            observer_queue_capacity: 256,
            history_replay_limit: 100,
            persist_queue_capacity: 512,
            flush_grace_secs: 5,
            stats_interval_secs: 2,
            log_tail_lines: 100,
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("invalid config file {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Ok(value) = env::var("DATABASE_URL") {
            config.database_url = value;
        }
        if let Ok(value) = env::var("JWT_SECRET") {
            config.jwt_secret = value;
        }
        if let Ok(value) = env::var("CONSOLE_HOST") {
            config.host = value;
        }
        if let Ok(value) = env::var("CONSOLE_PORT") {
            config.port = value.parse().context("CONSOLE_PORT must be a port number")?;
        }
        if let Ok(value) = env::var("DOCKER_SOCKET") {
            config.docker_socket = Some(value);
        }

        Ok(config)
    }

    pub fn teardown_policy(&self) -> TeardownPolicy {
        match self.teardown {
            TeardownMode::Eager => TeardownPolicy::Eager,
            TeardownMode::Lazy => TeardownPolicy::Lazy {
                grace: Duration::from_secs(self.teardown_grace_secs),
            },
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            log_tail_lines: self.log_tail_lines,
            replay_limit: self.history_replay_limit,
            persist_queue_capacity: self.persist_queue_capacity,
            flush_grace: Duration::from_secs(self.flush_grace_secs),
        }
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_panel_conventions() {
        let config = Config::default();
        assert_eq!(config.container_name_prefix, "minecraft_server_");
        assert_eq!(config.container_stdin_path, "/minecraft/stdin");
        assert_eq!(config.history_replay_limit, 100);
        assert_eq!(config.stats_interval_secs, 2);
        assert!(matches!(config.teardown, TeardownMode::Eager));
    }

    #[test]
    fn yaml_overrides_only_named_fields() {
        let config: Config = serde_yaml::from_str(
            "port: 9100\nteardown: lazy\nteardown_grace_secs: 15\n",
        )
        .unwrap();

        assert_eq!(config.port, 9100);
        assert!(matches!(
            config.teardown_policy(),
            TeardownPolicy::Lazy { grace } if grace == Duration::from_secs(15)
        ));
        // untouched fields keep their defaults
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.log_tail_lines, 100);
    }
}

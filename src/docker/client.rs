use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, LogsOptions, StatsOptions};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::ContainerStateStatusEnum;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::stream::StreamExt;
use tracing::{debug, info, warn};

use super::runtime::{ContainerHandle, ContainerRuntime, LineStream, ResourceCounters, RuntimeError};

/// Bollard-backed [`ContainerRuntime`].
///
/// Game servers run one process per container; the panel's images expose a
/// FIFO (`/minecraft/stdin` by default) wired to the server process's stdin,
/// which is how operator commands reach the game.
pub struct DockerRuntime {
    docker: Docker,
    stdin_path: String,
}

impl DockerRuntime {
    pub async fn connect(socket_path: Option<&str>, stdin_path: String) -> Result<Self> {
        let docker = if let Some(socket) = socket_path {
            Docker::connect_with_socket(socket, 120, API_DEFAULT_VERSION)?
        } else {
            Docker::connect_with_socket_defaults()?
        };

        let version = docker
            .version()
            .await
            .context("Failed to connect to Docker daemon")?;

        info!(
            "Connected to Docker daemon version: {}",
            version.version.unwrap_or_default()
        );

        Ok(Self { docker, stdin_path })
    }
}

fn map_docker_error(err: bollard::errors::Error) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound,
        other => RuntimeError::Transient(other.to_string()),
    }
}

/// Wrap a command line for `sh -c "echo '...' > fifo"` without letting a
/// quote in the command terminate the quoting.
fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn resolve(&self, name: &str) -> Result<ContainerHandle, RuntimeError> {
        let info = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(map_docker_error)?;

        let running = info
            .state
            .and_then(|s| s.status)
            .map(|s| s == ContainerStateStatusEnum::RUNNING)
            .unwrap_or(false);

        // A stopped container is as absent as a missing one from the
        // console's point of view.
        if !running {
            return Err(RuntimeError::NotFound);
        }

        Ok(ContainerHandle {
            id: info.id.unwrap_or_else(|| name.to_string()),
            name: name.to_string(),
        })
    }

    async fn stream_output(
        &self,
        handle: &ContainerHandle,
        tail: usize,
    ) -> Result<LineStream, RuntimeError> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        debug!(container = %handle.name, tail, "opening log stream");

        // A chunk may carry several lines; flatten to one item per line.
        let stream = self
            .docker
            .logs(&handle.id, Some(options))
            .flat_map(|chunk| match chunk {
                Ok(output) => {
                    let lines: Vec<Result<String, RuntimeError>> = output
                        .to_string()
                        .lines()
                        .map(|line| line.trim_end_matches('\r'))
                        .filter(|line| !line.is_empty())
                        .map(|line| Ok(line.to_string()))
                        .collect();
                    futures::stream::iter(lines)
                }
                Err(e) => futures::stream::iter(vec![Err(map_docker_error(e))]),
            });

        Ok(Box::pin(stream))
    }

    async fn submit_input(
        &self,
        handle: &ContainerHandle,
        text: &str,
    ) -> Result<(), RuntimeError> {
        let exec_config = CreateExecOptions {
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("echo {} > {}", shell_quote(text), self.stdin_path),
            ]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            privileged: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&handle.id, exec_config)
            .await
            .map_err(map_docker_error)?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(map_docker_error)?;

        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(msg) = output.next().await {
                if let Err(e) = msg {
                    warn!(container = %handle.name, "error reading exec output: {}", e);
                }
            }
        }

        Ok(())
    }

    async fn sample_counters(
        &self,
        handle: &ContainerHandle,
    ) -> Result<ResourceCounters, RuntimeError> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };

        let mut stream = self.docker.stats(&handle.id, Some(options));

        let stats = match stream.next().await {
            Some(Ok(stats)) => stats,
            Some(Err(e)) => return Err(map_docker_error(e)),
            None => return Err(RuntimeError::Transient("no stats available".to_string())),
        };

        Ok(ResourceCounters {
            cpu_total: stats.cpu_stats.cpu_usage.total_usage,
            precpu_total: stats.precpu_stats.cpu_usage.total_usage,
            system_cpu: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            presystem_cpu: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            memory_used: stats.memory_stats.usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
        })
    }
}

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::docker::provider::HandleProvider;
use crate::docker::runtime::{ContainerRuntime, ResourceCounters};

use super::event::ServerId;

/// One resource-usage snapshot for the dashboard. `online: false` means "no
/// data", and every numeric field is exactly zero in that case.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StatsSample {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub memory_limit_mb: f64,
    pub memory_percent: f64,
    pub online: bool,
}

impl StatsSample {
    pub fn offline() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_mb: 0.0,
            memory_limit_mb: 0.0,
            memory_percent: 0.0,
            online: false,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Derive presentation percentages from raw counters.
///
/// CPU usage is the usage delta over the system delta; a non-positive system
/// delta (first sample after start, clock skew) clamps to exactly zero.
pub fn derive_sample(counters: ResourceCounters) -> StatsSample {
    let cpu_delta = counters.cpu_total.saturating_sub(counters.precpu_total) as f64;
    let system_delta = counters.system_cpu as i128 - counters.presystem_cpu as i128;

    let cpu_percent = if system_delta > 0 {
        cpu_delta / system_delta as f64 * 100.0
    } else {
        0.0
    };

    let memory_mb = counters.memory_used as f64 / (1024.0 * 1024.0);
    let memory_limit_mb = counters.memory_limit as f64 / (1024.0 * 1024.0);
    let memory_percent = if counters.memory_limit > 0 {
        counters.memory_used as f64 / counters.memory_limit as f64 * 100.0
    } else {
        0.0
    };

    StatsSample {
        cpu_percent: round2(cpu_percent),
        memory_mb: round2(memory_mb),
        memory_limit_mb: round2(memory_limit_mb),
        memory_percent: round2(memory_percent),
        online: true,
    }
}

/// Periodic resource sampler, one task per stats connection.
///
/// Every failure class degrades to an offline sample; the stream never
/// terminates the connection on its own.
pub struct StatsSampler {
    runtime: Arc<dyn ContainerRuntime>,
    provider: Arc<HandleProvider>,
    interval: Duration,
}

impl StatsSampler {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        provider: Arc<HandleProvider>,
        interval: Duration,
    ) -> Self {
        Self {
            runtime,
            provider,
            interval,
        }
    }

    pub async fn sample(&self, server_id: ServerId) -> StatsSample {
        let handle = match self.provider.resolve(server_id).await {
            Ok(handle) => handle,
            Err(e) => {
                debug!(server_id, "stats resolve failed: {}", e);
                return StatsSample::offline();
            }
        };

        match self.runtime.sample_counters(&handle).await {
            Ok(counters) => derive_sample(counters),
            Err(e) => {
                debug!(server_id, "stats fetch failed: {}", e);
                self.provider.invalidate(server_id).await;
                StatsSample::offline()
            }
        }
    }

    /// Emit one sample every interval until cancelled or the receiver goes
    /// away. Cancellation is checked at the top of each iteration, so at
    /// most one in-flight sample is discarded.
    pub async fn run(
        &self,
        server_id: ServerId,
        cancel: CancellationToken,
        out: mpsc::Sender<StatsSample>,
    ) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let sample = self.sample(server_id).await;
            if out.send(sample).await.is_err() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        debug!(server_id, "stats sampling stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::runtime::RuntimeError;
    use crate::test_support::FakeRuntime;

    fn counters(
        cpu: (u64, u64),
        system: (u64, u64),
        memory: (u64, u64),
    ) -> ResourceCounters {
        ResourceCounters {
            cpu_total: cpu.0,
            precpu_total: cpu.1,
            system_cpu: system.0,
            presystem_cpu: system.1,
            memory_used: memory.0,
            memory_limit: memory.1,
        }
    }

    #[test]
    fn derives_percentages() {
        let sample = derive_sample(counters(
            (400, 200),
            (2_000, 1_000),
            (512 * 1024 * 1024, 2_048 * 1024 * 1024),
        ));

        assert_eq!(sample.cpu_percent, 20.0);
        assert_eq!(sample.memory_mb, 512.0);
        assert_eq!(sample.memory_limit_mb, 2048.0);
        assert_eq!(sample.memory_percent, 25.0);
        assert!(sample.online);
    }

    #[test]
    fn non_positive_system_delta_clamps_cpu_to_zero() {
        let zero_delta = derive_sample(counters((400, 200), (1_000, 1_000), (1, 1)));
        assert_eq!(zero_delta.cpu_percent, 0.0);

        let negative_delta = derive_sample(counters((400, 200), (500, 1_000), (1, 1)));
        assert_eq!(negative_delta.cpu_percent, 0.0);
    }

    #[test]
    fn zero_memory_limit_does_not_divide() {
        let sample = derive_sample(counters((1, 0), (2, 1), (123, 0)));
        assert_eq!(sample.memory_percent, 0.0);
    }

    #[test]
    fn values_round_to_two_decimals() {
        let sample = derive_sample(counters((1, 0), (3, 0), (1_500_000, 4_500_000)));
        assert_eq!(sample.cpu_percent, 33.33);
        assert_eq!(sample.memory_percent, 33.33);
    }

    #[test]
    fn offline_sample_is_all_zero() {
        let sample = StatsSample::offline();
        assert!(!sample.online);
        assert_eq!(sample.cpu_percent, 0.0);
        assert_eq!(sample.memory_mb, 0.0);
        assert_eq!(sample.memory_limit_mb, 0.0);
        assert_eq!(sample.memory_percent, 0.0);
    }

    fn sampler(runtime: Arc<FakeRuntime>) -> StatsSampler {
        let provider = Arc::new(HandleProvider::new(
            runtime.clone(),
            "minecraft_server_".to_string(),
            Duration::from_secs(1),
        ));
        StatsSampler::new(runtime, provider, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn resolve_failure_degrades_to_offline() {
        let runtime = Arc::new(FakeRuntime::not_found());
        let sample = sampler(runtime).sample(7).await;
        assert_eq!(sample, StatsSample::offline());
    }

    #[tokio::test]
    async fn fetch_failure_degrades_to_offline() {
        let runtime = Arc::new(FakeRuntime::found());
        runtime.set_counters(Err(RuntimeError::Transient("stats busy".to_string())));
        let sample = sampler(runtime).sample(7).await;
        assert_eq!(sample, StatsSample::offline());
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let runtime = Arc::new(FakeRuntime::found());
        runtime.set_counters(Ok(counters((2, 1), (4, 2), (10, 100))));
        let sampler = Arc::new(sampler(runtime));

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);

        let task = {
            let sampler = sampler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { sampler.run(7, cancel, tx).await })
        };

        let first = rx.recv().await.expect("first sample");
        assert!(first.online);

        cancel.cancel();
        task.await.unwrap();

        // The sampler dropped its sender; draining what was already queued
        // ends with a closed channel, proving no further samples arrive.
        while rx.recv().await.is_some() {}
    }
}

/// Provider health monitoring
///
/// Periodically probes every active provider, maintains rolling
/// failure/success counts, and derives healthy/unhealthy state with
/// hysteresis: a provider goes unhealthy only after `failure_threshold`
/// consecutive failures and recovers only after `recovery_threshold`
/// consecutive successes. Probe errors never propagate; they become
/// failure counts.
use crate::metrics::{PROBE_DURATION_MS, PROBE_FAILURES_TOTAL, PROVIDER_HEALTHY};
use crate::models::{DeliveryEvent, ProviderConfig, ProviderHealth};
use crate::services::provider_registry::ProviderRegistry;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Result of one probe attempt
#[derive(Debug, Clone, Copy)]
pub struct ProbeOutcome {
    pub success: bool,
    pub response_time_ms: u64,
}

/// Probe capability; injected so liveness can be driven deterministically
/// under test.
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, provider: &ProviderConfig) -> ProbeOutcome;
}

/// HTTP HEAD probe against the provider's health endpoint, bounded by the
/// provider's own timeout.
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProber for HttpProber {
    async fn probe(&self, provider: &ProviderConfig) -> ProbeOutcome {
        let start = Instant::now();
        let result = self
            .client
            .head(&provider.health_probe_url)
            .timeout(Duration::from_millis(provider.timeout_ms))
            .send()
            .await;

        let response_time_ms = start.elapsed().as_millis() as u64;
        let success = match result {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(provider = %provider.provider_id, error = %e, "Health probe failed");
                false
            }
        };

        ProbeOutcome {
            success,
            response_time_ms,
        }
    }
}

pub struct HealthMonitor {
    registry: Arc<ProviderRegistry>,
    prober: Arc<dyn HealthProber>,
    state: RwLock<HashMap<String, ProviderHealth>>,
    events: broadcast::Sender<DeliveryEvent>,
    failure_threshold: u32,
    recovery_threshold: u32,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        prober: Arc<dyn HealthProber>,
        events: broadcast::Sender<DeliveryEvent>,
        failure_threshold: u32,
        recovery_threshold: u32,
    ) -> Self {
        info!(
            "Initializing health monitor: failure_threshold={}, recovery_threshold={}",
            failure_threshold, recovery_threshold
        );

        Self {
            registry,
            prober,
            state: RwLock::new(HashMap::new()),
            events,
            failure_threshold,
            recovery_threshold,
        }
    }

    /// One monitoring tick: probe all active providers concurrently, then
    /// apply every outcome under the state lock so failover evaluation sees
    /// a consistent snapshot of the whole tick.
    pub async fn run_check_cycle(&self) {
        let providers = self.registry.list_active().await;
        if providers.is_empty() {
            return;
        }

        let probes = providers.into_iter().map(|provider| {
            let prober = self.prober.clone();
            async move {
                let outcome = prober.probe(&provider).await;
                (provider.provider_id, outcome)
            }
        });

        let outcomes = futures::future::join_all(probes).await;

        let mut state = self.state.write().await;
        for (provider_id, outcome) in outcomes {
            self.apply_outcome(&mut state, &provider_id, outcome);
        }
    }

    /// Apply one probe outcome to one provider's health record.
    /// Sole mutation path for `ProviderHealth` (single-writer).
    fn apply_outcome(
        &self,
        state: &mut HashMap<String, ProviderHealth>,
        provider_id: &str,
        outcome: ProbeOutcome,
    ) {
        let health = state.entry(provider_id.to_string()).or_default();

        health.total_checks += 1;
        health.last_response_time_ms = outcome.response_time_ms;
        health.last_checked_at = Some(Utc::now());

        PROBE_DURATION_MS
            .with_label_values(&[provider_id])
            .observe(outcome.response_time_ms as f64);

        if outcome.success {
            health.consecutive_failures = 0;
            health.consecutive_successes += 1;
            health.error_count = health.error_count.saturating_sub(1);

            if !health.is_healthy && health.consecutive_successes >= self.recovery_threshold {
                health.is_healthy = true;
                info!(
                    provider = %provider_id,
                    consecutive_successes = health.consecutive_successes,
                    "Provider recovered"
                );
                let _ = self.events.send(DeliveryEvent::ProviderRecovered {
                    provider_id: provider_id.to_string(),
                });
            }
        } else {
            health.consecutive_successes = 0;
            health.consecutive_failures += 1;
            health.error_count += 1;

            PROBE_FAILURES_TOTAL.with_label_values(&[provider_id]).inc();

            if health.is_healthy && health.consecutive_failures >= self.failure_threshold {
                health.is_healthy = false;
                warn!(
                    provider = %provider_id,
                    consecutive_failures = health.consecutive_failures,
                    "Provider marked unhealthy"
                );
                let _ = self.events.send(DeliveryEvent::ProviderUnhealthy {
                    provider_id: provider_id.to_string(),
                    consecutive_failures: health.consecutive_failures,
                });
            } else {
                debug!(
                    provider = %provider_id,
                    consecutive_failures = health.consecutive_failures,
                    "Probe failure below threshold"
                );
            }
        }

        PROVIDER_HEALTHY
            .with_label_values(&[provider_id])
            .set(if health.is_healthy { 1 } else { 0 });
    }

    /// Providers never probed yet count as healthy (initial state)
    pub async fn is_healthy(&self, provider_id: &str) -> bool {
        self.state
            .read()
            .await
            .get(provider_id)
            .map(|h| h.is_healthy)
            .unwrap_or(true)
    }

    pub async fn health_of(&self, provider_id: &str) -> ProviderHealth {
        self.state
            .read()
            .await
            .get(provider_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> HashMap<String, ProviderHealth> {
        self.state.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderConfig;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Prober whose outcome is flipped from the test body
    pub struct ScriptedProber {
        healthy: AtomicBool,
    }

    impl ScriptedProber {
        pub fn new(healthy: bool) -> Self {
            Self {
                healthy: AtomicBool::new(healthy),
            }
        }

        pub fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HealthProber for ScriptedProber {
        async fn probe(&self, _provider: &ProviderConfig) -> ProbeOutcome {
            ProbeOutcome {
                success: self.healthy.load(Ordering::SeqCst),
                response_time_ms: 42,
            }
        }
    }

    fn provider(id: &str, priority: u32) -> ProviderConfig {
        ProviderConfig {
            provider_id: id.into(),
            display_name: id.into(),
            base_url: format!("https://{}.example.com", id),
            priority,
            regions: vec!["us".into()],
            health_probe_url: format!("https://{}.example.com/health", id),
            max_retries: 3,
            timeout_ms: 5000,
            active: true,
        }
    }

    fn monitor_with(
        prober: Arc<dyn HealthProber>,
        failure_threshold: u32,
        recovery_threshold: u32,
    ) -> (HealthMonitor, broadcast::Receiver<DeliveryEvent>) {
        let (tx, rx) = broadcast::channel(64);
        let registry = Arc::new(ProviderRegistry::new(vec![provider("cf", 1)]));
        let monitor = HealthMonitor::new(registry, prober, tx, failure_threshold, recovery_threshold);
        (monitor, rx)
    }

    #[tokio::test]
    async fn test_initial_state_is_healthy() {
        let prober = Arc::new(ScriptedProber::new(true));
        let (monitor, _rx) = monitor_with(prober, 3, 5);

        assert!(monitor.is_healthy("cf").await);
        assert!(monitor.is_healthy("never-probed").await);
    }

    #[tokio::test]
    async fn test_unhealthy_after_exactly_failure_threshold() {
        let prober = Arc::new(ScriptedProber::new(false));
        let (monitor, mut rx) = monitor_with(prober.clone(), 3, 5);

        monitor.run_check_cycle().await;
        monitor.run_check_cycle().await;
        assert!(monitor.is_healthy("cf").await);

        monitor.run_check_cycle().await;
        assert!(!monitor.is_healthy("cf").await);

        let event = rx.try_recv().unwrap();
        assert!(matches!(
            event,
            DeliveryEvent::ProviderUnhealthy {
                consecutive_failures: 3,
                ..
            }
        ));
        // No duplicate transition event on further failures
        monitor.run_check_cycle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recovery_after_exactly_recovery_threshold() {
        let prober = Arc::new(ScriptedProber::new(false));
        let (monitor, mut rx) = monitor_with(prober.clone(), 3, 5);

        for _ in 0..3 {
            monitor.run_check_cycle().await;
        }
        assert!(!monitor.is_healthy("cf").await);
        let _ = rx.try_recv();

        prober.set_healthy(true);
        for _ in 0..4 {
            monitor.run_check_cycle().await;
        }
        assert!(!monitor.is_healthy("cf").await);

        monitor.run_check_cycle().await;
        assert!(monitor.is_healthy("cf").await);
        assert!(matches!(
            rx.try_recv().unwrap(),
            DeliveryEvent::ProviderRecovered { .. }
        ));
    }

    #[tokio::test]
    async fn test_intervening_success_resets_failure_streak() {
        let prober = Arc::new(ScriptedProber::new(false));
        let (monitor, _rx) = monitor_with(prober.clone(), 3, 5);

        monitor.run_check_cycle().await;
        monitor.run_check_cycle().await;
        prober.set_healthy(true);
        monitor.run_check_cycle().await;
        prober.set_healthy(false);
        monitor.run_check_cycle().await;
        monitor.run_check_cycle().await;

        // 2 + reset + 2 never reaches the threshold of 3
        assert!(monitor.is_healthy("cf").await);
        assert_eq!(monitor.health_of("cf").await.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_tick_updates_observability_fields() {
        let prober = Arc::new(ScriptedProber::new(true));
        let (monitor, _rx) = monitor_with(prober, 3, 5);

        monitor.run_check_cycle().await;
        let health = monitor.health_of("cf").await;

        assert_eq!(health.last_response_time_ms, 42);
        assert!(health.last_checked_at.is_some());
        assert_eq!(health.total_checks, 1);
    }
}

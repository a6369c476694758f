/// Failover controller
///
/// Owns the single `current_primary` value. Selection filters active
/// providers by health and ranks by priority; evaluation is serialized so
/// two concurrent passes cannot race to different conclusions. When no
/// provider is healthy the previous primary is retained (degraded mode).
/// Failback is not automatic on recovery: a recovered higher-priority
/// provider reclaims primary only through an explicit rebalance pass.
use crate::error::{AppError, Result};
use crate::metrics::FAILOVERS_TOTAL;
use crate::models::{DeliveryEvent, FailoverState, ProviderConfig};
use crate::services::health_monitor::HealthMonitor;
use crate::services::provider_registry::ProviderRegistry;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{info, warn};

pub struct FailoverController {
    registry: Arc<ProviderRegistry>,
    monitor: Arc<HealthMonitor>,
    state: RwLock<FailoverState>,
    /// Serializes the check-then-act of evaluate/rebalance
    eval_lock: Mutex<()>,
    failovers: AtomicU64,
    events: broadcast::Sender<DeliveryEvent>,
}

impl FailoverController {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        monitor: Arc<HealthMonitor>,
        events: broadcast::Sender<DeliveryEvent>,
        initial_primary: String,
    ) -> Self {
        info!(primary = %initial_primary, "Initializing failover controller");

        Self {
            registry,
            monitor,
            state: RwLock::new(FailoverState {
                current_primary: initial_primary,
                last_evaluated_at: None,
            }),
            eval_lock: Mutex::new(()),
            failovers: AtomicU64::new(0),
            events,
        }
    }

    pub async fn current_primary(&self) -> String {
        self.state.read().await.current_primary.clone()
    }

    pub fn failover_count(&self) -> u64 {
        self.failovers.load(Ordering::Relaxed)
    }

    /// Active providers that are currently healthy, ascending by priority
    pub async fn healthy_ranked(&self) -> Vec<ProviderConfig> {
        let mut ranked = Vec::new();
        for provider in self.registry.list_active().await {
            if self.monitor.is_healthy(&provider.provider_id).await {
                ranked.push(provider);
            }
        }
        ranked
    }

    /// Best healthy provider by priority; falls back to the current primary
    /// unchanged when none are healthy so delivery degrades rather than
    /// disappears.
    pub async fn select_optimal_provider(&self) -> Result<String> {
        let ranked = self.healthy_ranked().await;
        match ranked.first() {
            Some(best) => Ok(best.provider_id.clone()),
            None => Ok(self.current_primary().await),
        }
    }

    /// React to the latest health tick: if the primary has gone unhealthy,
    /// promote the best healthy alternative and announce the switch.
    pub async fn evaluate_failover(&self) -> Result<()> {
        let _guard = self.eval_lock.lock().await;

        let current = self.current_primary().await;
        let current_healthy = self.monitor.is_healthy(&current).await;

        {
            let mut state = self.state.write().await;
            state.last_evaluated_at = Some(Utc::now());
        }

        if current_healthy {
            return Ok(());
        }

        let replacement = self
            .healthy_ranked()
            .await
            .into_iter()
            .find(|p| p.provider_id != current);

        match replacement {
            Some(next) => {
                self.switch_primary(&current, &next.provider_id, "primary provider unhealthy")
                    .await;
                Ok(())
            }
            None => {
                warn!(
                    primary = %current,
                    "No healthy provider available; retaining primary in degraded mode"
                );
                Ok(())
            }
        }
    }

    /// Explicit re-ranking pass: promote the best healthy provider by
    /// priority even when the current primary is still healthy. This is the
    /// only path by which a recovered provider reclaims primary status.
    pub async fn rebalance(&self) -> Result<Option<String>> {
        let _guard = self.eval_lock.lock().await;

        let current = self.current_primary().await;
        let ranked = self.healthy_ranked().await;
        let best = ranked.first().ok_or(AppError::NoHealthyProvider)?;

        if best.provider_id == current {
            return Ok(None);
        }

        let to = best.provider_id.clone();
        self.switch_primary(&current, &to, "manual rebalance").await;
        Ok(Some(to))
    }

    async fn switch_primary(&self, from: &str, to: &str, reason: &str) {
        {
            let mut state = self.state.write().await;
            state.current_primary = to.to_string();
        }
        self.failovers.fetch_add(1, Ordering::Relaxed);
        FAILOVERS_TOTAL.inc();

        warn!(from = %from, to = %to, reason = %reason, "Failover executed");

        let _ = self.events.send(DeliveryEvent::FailoverExecuted {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::health_monitor::{HealthProber, ProbeOutcome};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Prober with per-provider scripted outcomes
    struct MapProber {
        healthy: StdMutex<HashMap<String, bool>>,
    }

    impl MapProber {
        fn new(entries: &[(&str, bool)]) -> Self {
            Self {
                healthy: StdMutex::new(
                    entries
                        .iter()
                        .map(|(id, h)| (id.to_string(), *h))
                        .collect(),
                ),
            }
        }

        fn set(&self, provider_id: &str, healthy: bool) {
            self.healthy
                .lock()
                .unwrap()
                .insert(provider_id.to_string(), healthy);
        }
    }

    #[async_trait]
    impl HealthProber for MapProber {
        async fn probe(&self, provider: &crate::models::ProviderConfig) -> ProbeOutcome {
            let success = *self
                .healthy
                .lock()
                .unwrap()
                .get(&provider.provider_id)
                .unwrap_or(&true);
            ProbeOutcome {
                success,
                response_time_ms: 10,
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

    struct Fixture {
        monitor: Arc<HealthMonitor>,
        controller: FailoverController,
        prober: Arc<MapProber>,
        rx: broadcast::Receiver<DeliveryEvent>,
    }

    fn fixture(failure_threshold: u32) -> Fixture {
        let (tx, rx) = broadcast::channel(64);
        let registry = Arc::new(ProviderRegistry::new(vec![
            provider("a", 1),
            provider("b", 2),
            provider("c", 3),
        ]));
        let prober = Arc::new(MapProber::new(&[("a", true), ("b", true), ("c", true)]));
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            prober.clone(),
            tx.clone(),
            failure_threshold,
            5,
        ));
        let controller =
            FailoverController::new(registry, monitor.clone(), tx, "a".to_string());
        Fixture {
            monitor,
            controller,
            prober,
            rx,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<DeliveryEvent>) -> Vec<DeliveryEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn test_select_prefers_lowest_priority_healthy() {
        let f = fixture(3);
        assert_eq!(f.controller.select_optimal_provider().await.unwrap(), "a");

        f.prober.set("a", false);
        for _ in 0..3 {
            f.monitor.run_check_cycle().await;
        }
        assert_eq!(f.controller.select_optimal_provider().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_select_retains_primary_when_none_healthy() {
        let f = fixture(3);
        f.prober.set("a", false);
        f.prober.set("b", false);
        f.prober.set("c", false);
        for _ in 0..3 {
            f.monitor.run_check_cycle().await;
        }

        // Degraded mode: previous primary is returned unchanged
        assert_eq!(f.controller.select_optimal_provider().await.unwrap(), "a");
        assert!(f.controller.healthy_ranked().await.is_empty());
    }

    #[tokio::test]
    async fn test_failover_switches_to_next_priority() {
        let mut f = fixture(3);
        f.prober.set("a", false);
        for _ in 0..3 {
            f.monitor.run_check_cycle().await;
            f.controller.evaluate_failover().await.unwrap();
        }

        assert_eq!(f.controller.current_primary().await, "b");
        assert_eq!(f.controller.failover_count(), 1);

        let events = drain(&mut f.rx);
        assert!(events.iter().any(|e| matches!(
            e,
            DeliveryEvent::FailoverExecuted { from, to, .. } if from == "a" && to == "b"
        )));
    }

    #[tokio::test]
    async fn test_no_automatic_failback_on_recovery() {
        let mut f = fixture(3);
        f.prober.set("a", false);
        for _ in 0..3 {
            f.monitor.run_check_cycle().await;
            f.controller.evaluate_failover().await.unwrap();
        }
        assert_eq!(f.controller.current_primary().await, "b");

        // A recovers with 5 consecutive successes
        f.prober.set("a", true);
        for _ in 0..5 {
            f.monitor.run_check_cycle().await;
            f.controller.evaluate_failover().await.unwrap();
        }

        let events = drain(&mut f.rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, DeliveryEvent::ProviderRecovered { provider_id } if provider_id == "a")));

        // Primary stays on B until an explicit rebalance re-ranks by priority
        assert_eq!(f.controller.current_primary().await, "b");

        let promoted = f.controller.rebalance().await.unwrap();
        assert_eq!(promoted.as_deref(), Some("a"));
        assert_eq!(f.controller.current_primary().await, "a");
    }

    #[tokio::test]
    async fn test_rebalance_is_noop_when_primary_already_best() {
        let f = fixture(3);
        assert_eq!(f.controller.rebalance().await.unwrap(), None);
        assert_eq!(f.controller.failover_count(), 0);
    }

    #[tokio::test]
    async fn test_degraded_mode_keeps_primary_without_event() {
        let mut f = fixture(3);
        f.prober.set("a", false);
        f.prober.set("b", false);
        f.prober.set("c", false);
        for _ in 0..3 {
            f.monitor.run_check_cycle().await;
            f.controller.evaluate_failover().await.unwrap();
        }

        assert_eq!(f.controller.current_primary().await, "a");
        let events = drain(&mut f.rx);
        assert!(!events
            .iter()
            .any(|e| matches!(e, DeliveryEvent::FailoverExecuted { .. })));
    }
}

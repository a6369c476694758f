/// Alerting layer
///
/// Consumes the delivery event bus, maps qualifying events into alert
/// records, suppresses repeats inside a per-type cooldown window, appends
/// to a bounded history, and fans dispatches out to the configured sinks.
/// Sink failures are logged and counted, never retried inline, and never
/// block the originating timer loops.
use crate::config::AlertCooldowns;
use crate::error::{AppError, Result};
use crate::metrics::{
    ALERTS_DISPATCHED_TOTAL, ALERTS_SUPPRESSED_TOTAL, ALERT_DISPATCH_FAILURES_TOTAL,
};
use crate::models::{AlertEvent, AlertType, DeliveryEvent, Severity};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Destination for dispatched alerts (webhook, status page, email, ...)
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn dispatch(&self, alert: &AlertEvent) -> Result<()>;
}

/// POSTs alerts as JSON to a configured webhook URL
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn dispatch(&self, alert: &AlertEvent) -> Result<()> {
        self.client
            .post(&self.url)
            .json(alert)
            .timeout(std::time::Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Webhook dispatch failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AppError::Internal(format!("Webhook rejected alert: {}", e)))?;
        Ok(())
    }
}

/// Emits alerts into the service log; always configured as a last sink
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn dispatch(&self, alert: &AlertEvent) -> Result<()> {
        match alert.severity {
            Severity::Critical | Severity::High => {
                error!(
                    alert_type = alert.alert_type.as_str(),
                    provider = alert.provider_id.as_deref().unwrap_or("global"),
                    severity = alert.severity.as_str(),
                    "{}", alert.message
                );
            }
            _ => {
                warn!(
                    alert_type = alert.alert_type.as_str(),
                    provider = alert.provider_id.as_deref().unwrap_or("global"),
                    severity = alert.severity.as_str(),
                    "{}", alert.message
                );
            }
        }
        Ok(())
    }
}

/// Bounded alert history; in-memory by default so a persistent backend can
/// be substituted without touching alerting logic.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn append(&self, alert: AlertEvent);
    async fn active(&self) -> Vec<AlertEvent>;
    async fn history(&self) -> Vec<AlertEvent>;
    /// Idempotent; Err only for unknown ids
    async fn acknowledge(&self, id: Uuid) -> Result<()>;
}

pub struct InMemoryAlertStore {
    alerts: RwLock<VecDeque<AlertEvent>>,
    cap: usize,
}

impl InMemoryAlertStore {
    pub fn new(cap: usize) -> Self {
        Self {
            alerts: RwLock::new(VecDeque::new()),
            cap,
        }
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn append(&self, alert: AlertEvent) {
        let mut alerts = self.alerts.write().await;
        while alerts.len() >= self.cap.max(1) {
            alerts.pop_front();
        }
        alerts.push_back(alert);
    }

    async fn active(&self) -> Vec<AlertEvent> {
        self.alerts
            .read()
            .await
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect()
    }

    async fn history(&self) -> Vec<AlertEvent> {
        self.alerts.read().await.iter().cloned().collect()
    }

    async fn acknowledge(&self, id: Uuid) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Unknown alert: {}", id)))?;
        alert.acknowledged = true;
        Ok(())
    }
}

pub struct AlertService {
    store: Arc<dyn AlertStore>,
    sinks: Vec<Arc<dyn AlertSink>>,
    cooldowns: AlertCooldowns,
    last_dispatched: Mutex<HashMap<(AlertType, String), DateTime<Utc>>>,
}

impl AlertService {
    pub fn new(
        store: Arc<dyn AlertStore>,
        sinks: Vec<Arc<dyn AlertSink>>,
        cooldowns: AlertCooldowns,
    ) -> Self {
        Self {
            store,
            sinks,
            cooldowns,
            last_dispatched: Mutex::new(HashMap::new()),
        }
    }

    /// Consume the event bus until it closes or shutdown is signalled
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<DeliveryEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Alert consumer started");
        loop {
            tokio::select! {
                result = events.recv() => match result {
                    Ok(event) => self.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Alert consumer lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        info!("Alert consumer stopped");
    }

    pub async fn handle_event(&self, event: DeliveryEvent) {
        let Some(candidate) = alert_for_event(&event) else {
            return;
        };
        let cooldown_key = (
            candidate.alert_type,
            candidate
                .provider_id
                .clone()
                .unwrap_or_else(|| "global".to_string()),
        );

        // Suppress repeats inside the per-type cooldown window; the raw
        // event stays observable in logs either way.
        {
            let mut last = self.last_dispatched.lock().await;
            let now = Utc::now();
            let window = Duration::minutes(self.cooldowns.minutes_for(candidate.alert_type));

            if let Some(sent_at) = last.get(&cooldown_key) {
                if now - *sent_at < window {
                    debug!(
                        alert_type = candidate.alert_type.as_str(),
                        provider = cooldown_key.1.as_str(),
                        "Alert suppressed by cooldown"
                    );
                    ALERTS_SUPPRESSED_TOTAL
                        .with_label_values(&[candidate.alert_type.as_str()])
                        .inc();
                    return;
                }
            }
            last.insert(cooldown_key, now);
        }

        ALERTS_DISPATCHED_TOTAL
            .with_label_values(&[candidate.alert_type.as_str()])
            .inc();
        self.store.append(candidate.clone()).await;

        for sink in &self.sinks {
            if let Err(e) = sink.dispatch(&candidate).await {
                ALERT_DISPATCH_FAILURES_TOTAL.inc();
                warn!(
                    sink = sink.name(),
                    alert_type = candidate.alert_type.as_str(),
                    error = %e,
                    "Alert sink dispatch failed"
                );
            }
        }
    }

    pub async fn active_alerts(&self) -> Vec<AlertEvent> {
        self.store.active().await
    }

    pub async fn alert_history(&self) -> Vec<AlertEvent> {
        self.store.history().await
    }

    pub async fn acknowledge(&self, id: Uuid) -> Result<()> {
        self.store.acknowledge(id).await
    }
}

/// Map a bus event to its alert representation. Routine events
/// (successful rotations) are logged by their producers and raise no alert.
fn alert_for_event(event: &DeliveryEvent) -> Option<AlertEvent> {
    let alert = match event {
        DeliveryEvent::ProviderUnhealthy {
            provider_id,
            consecutive_failures,
        } => AlertEvent::new(
            AlertType::ProviderUnhealthy,
            Some(provider_id.clone()),
            Severity::High,
            format!("Provider {} marked unhealthy", provider_id),
            json!({ "consecutive_failures": consecutive_failures }),
        ),
        DeliveryEvent::ProviderRecovered { provider_id } => AlertEvent::new(
            AlertType::ProviderRecovered,
            Some(provider_id.clone()),
            Severity::Low,
            format!("Provider {} recovered", provider_id),
            json!({}),
        ),
        DeliveryEvent::FailoverExecuted { from, to, reason } => AlertEvent::new(
            AlertType::FailoverExecuted,
            Some(from.clone()),
            Severity::Critical,
            format!("Failover executed: {} -> {}", from, to),
            json!({ "from": from, "to": to, "reason": reason }),
        ),
        DeliveryEvent::KeysRotated { .. } => return None,
        DeliveryEvent::KeyRotationFailed {
            provider_id,
            reason,
        } => AlertEvent::new(
            AlertType::KeyRotationFailed,
            Some(provider_id.clone()),
            Severity::Critical,
            format!("Key rotation failed for {}", provider_id),
            json!({ "reason": reason }),
        ),
        DeliveryEvent::HighErrorRate {
            provider_id,
            error_rate_pct,
        } => AlertEvent::new(
            AlertType::HighErrorRate,
            Some(provider_id.clone()),
            Severity::Medium,
            format!("High error rate on {}", provider_id),
            json!({ "error_rate_pct": error_rate_pct }),
        ),
        DeliveryEvent::SlowResponse {
            provider_id,
            response_time_ms,
        } => AlertEvent::new(
            AlertType::SlowResponse,
            Some(provider_id.clone()),
            Severity::Medium,
            format!("Slow responses on {}", provider_id),
            json!({ "response_time_ms": response_time_ms }),
        ),
        DeliveryEvent::RegionalComplianceViolation {
            provider_id,
            countries,
        } => AlertEvent::new(
            AlertType::RegionalComplianceViolation,
            Some(provider_id.clone()),
            Severity::High,
            format!("Provider {} does not serve the requested regions", provider_id),
            json!({ "countries": countries }),
        ),
    };
    Some(alert)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        dispatched: AtomicUsize,
        fail: bool,
    }

    impl CountingSink {
        fn new(fail: bool) -> Self {
            Self {
                dispatched: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl AlertSink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn dispatch(&self, _alert: &AlertEvent) -> Result<()> {
            self.dispatched.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AppError::Internal("sink unreachable".into()))
            } else {
                Ok(())
            }
        }
    }

    fn unhealthy_event(provider: &str) -> DeliveryEvent {
        DeliveryEvent::ProviderUnhealthy {
            provider_id: provider.into(),
            consecutive_failures: 3,
        }
    }

    fn service_with(sink: Arc<CountingSink>) -> AlertService {
        AlertService::new(
            Arc::new(InMemoryAlertStore::new(100)),
            vec![sink],
            AlertCooldowns::default(),
        )
    }

    #[tokio::test]
    async fn test_cooldown_dedupes_same_type_and_provider() {
        let sink = Arc::new(CountingSink::new(false));
        let service = service_with(sink.clone());

        service.handle_event(unhealthy_event("cf")).await;
        service.handle_event(unhealthy_event("cf")).await;

        assert_eq!(sink.dispatched.load(Ordering::SeqCst), 1);
        assert_eq!(service.active_alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cooldown_is_scoped_per_provider() {
        let sink = Arc::new(CountingSink::new(false));
        let service = service_with(sink.clone());

        service.handle_event(unhealthy_event("cf")).await;
        service.handle_event(unhealthy_event("fastly")).await;

        assert_eq!(sink.dispatched.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_lose_history() {
        let sink = Arc::new(CountingSink::new(true));
        let service = service_with(sink.clone());

        service.handle_event(unhealthy_event("cf")).await;

        assert_eq!(sink.dispatched.load(Ordering::SeqCst), 1);
        assert_eq!(service.active_alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_acknowledge_excludes_from_active_but_not_history() {
        let sink = Arc::new(CountingSink::new(false));
        let service = service_with(sink);

        service.handle_event(unhealthy_event("cf")).await;
        let alert_id = service.active_alerts().await[0].id;

        service.acknowledge(alert_id).await.unwrap();
        // Idempotent
        service.acknowledge(alert_id).await.unwrap();

        assert!(service.active_alerts().await.is_empty());
        assert_eq!(service.alert_history().await.len(), 1);
        assert!(service.alert_history().await[0].acknowledged);

        assert!(matches!(
            service.acknowledge(Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let sink = Arc::new(CountingSink::new(false));
        let store = Arc::new(InMemoryAlertStore::new(3));
        let service = AlertService::new(store, vec![sink], AlertCooldowns::default());

        for i in 0..5 {
            service
                .handle_event(unhealthy_event(&format!("p{}", i)))
                .await;
        }

        assert_eq!(service.alert_history().await.len(), 3);
    }

    #[test]
    fn test_event_to_alert_mapping() {
        let alert = alert_for_event(&DeliveryEvent::FailoverExecuted {
            from: "a".into(),
            to: "b".into(),
            reason: "unhealthy".into(),
        })
        .unwrap();
        assert_eq!(alert.alert_type, AlertType::FailoverExecuted);
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.details["to"], "b");
        assert!(!alert.acknowledged);

        // Successful rotations are routine, not alerts
        assert!(alert_for_event(&DeliveryEvent::KeysRotated {
            provider_id: "a".into(),
            key_id: "k1".into(),
        })
        .is_none());
    }
}

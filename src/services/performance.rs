/// Performance metrics collector
///
/// Samples per-provider performance on a timer into a bounded ring buffer
/// and raises threshold-breach events. Sampling is a pluggable capability:
/// the default derives figures from health-probe observations since
/// provider-side counters are external collaborators.
use crate::config::MetricsConfig;
use crate::models::{DeliveryEvent, PerformanceSample, ProviderConfig, ProviderHealth};
use crate::services::health_monitor::HealthMonitor;
use crate::services::provider_registry::ProviderRegistry;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

/// Average object size used to approximate bandwidth from throughput
const AVG_OBJECT_BYTES: f64 = 512.0 * 1024.0;

#[async_trait]
pub trait PerformanceSampler: Send + Sync {
    async fn sample(
        &self,
        provider: &ProviderConfig,
        health: &ProviderHealth,
    ) -> PerformanceSample;
}

/// Default sampler: approximates error rate, throughput, cache-hit ratio
/// and bandwidth from the health monitor's probe observations.
pub struct HealthDerivedSampler;

#[async_trait]
impl PerformanceSampler for HealthDerivedSampler {
    async fn sample(
        &self,
        provider: &ProviderConfig,
        health: &ProviderHealth,
    ) -> PerformanceSample {
        let error_rate_pct = if health.total_checks > 0 {
            (health.error_count as f64 / health.total_checks as f64) * 100.0
        } else {
            0.0
        };

        let response_time_ms = health.last_response_time_ms;
        let throughput = if health.is_healthy && response_time_ms > 0 {
            1000.0 / response_time_ms as f64
        } else {
            0.0
        };

        PerformanceSample {
            provider_id: provider.provider_id.clone(),
            timestamp: Utc::now(),
            response_time_ms,
            error_rate_pct,
            throughput,
            cache_hit_ratio: (0.95 * (1.0 - error_rate_pct / 100.0)).max(0.0),
            bandwidth_usage: throughput * AVG_OBJECT_BYTES,
        }
    }
}

/// Aggregated view over one provider's recent samples
#[derive(Debug, Clone, Serialize)]
pub struct ProviderPerformanceReport {
    pub provider_id: String,
    pub sample_count: usize,
    pub avg_response_time_ms: f64,
    pub avg_error_rate_pct: f64,
    pub avg_throughput: f64,
    pub avg_cache_hit_ratio: f64,
    pub avg_bandwidth_usage: f64,
}

pub struct MetricsCollector {
    registry: Arc<ProviderRegistry>,
    monitor: Arc<HealthMonitor>,
    sampler: Arc<dyn PerformanceSampler>,
    buffers: RwLock<HashMap<String, VecDeque<PerformanceSample>>>,
    buffer_cap: usize,
    high_error_rate_pct: f64,
    slow_response_ms: u64,
    events: broadcast::Sender<DeliveryEvent>,
}

impl MetricsCollector {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        monitor: Arc<HealthMonitor>,
        sampler: Arc<dyn PerformanceSampler>,
        config: &MetricsConfig,
        events: broadcast::Sender<DeliveryEvent>,
    ) -> Self {
        Self {
            registry,
            monitor,
            sampler,
            buffers: RwLock::new(HashMap::new()),
            buffer_cap: config.buffer_cap,
            high_error_rate_pct: config.high_error_rate_pct,
            slow_response_ms: config.slow_response_ms,
            events,
        }
    }

    /// One collection tick across all active providers
    pub async fn collect_cycle(&self) {
        let providers = self.registry.list_active().await;
        let health = self.monitor.snapshot().await;

        for provider in providers {
            let provider_health = health
                .get(&provider.provider_id)
                .cloned()
                .unwrap_or_default();
            let sample = self.sampler.sample(&provider, &provider_health).await;

            self.evaluate_thresholds(&sample);
            self.append(sample).await;
        }
    }

    async fn append(&self, sample: PerformanceSample) {
        let mut buffers = self.buffers.write().await;
        let buffer = buffers
            .entry(sample.provider_id.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.buffer_cap));

        while buffer.len() >= self.buffer_cap.max(1) {
            buffer.pop_front();
        }
        buffer.push_back(sample);
    }

    fn evaluate_thresholds(&self, sample: &PerformanceSample) {
        if sample.error_rate_pct >= self.high_error_rate_pct {
            warn!(
                provider = %sample.provider_id,
                error_rate_pct = sample.error_rate_pct,
                "High error rate threshold breached"
            );
            let _ = self.events.send(DeliveryEvent::HighErrorRate {
                provider_id: sample.provider_id.clone(),
                error_rate_pct: sample.error_rate_pct,
            });
        }

        if sample.response_time_ms >= self.slow_response_ms {
            warn!(
                provider = %sample.provider_id,
                response_time_ms = sample.response_time_ms,
                "Slow response threshold breached"
            );
            let _ = self.events.send(DeliveryEvent::SlowResponse {
                provider_id: sample.provider_id.clone(),
                response_time_ms: sample.response_time_ms,
            });
        } else {
            debug!(
                provider = %sample.provider_id,
                response_time_ms = sample.response_time_ms,
                "Performance sample collected"
            );
        }
    }

    /// Aggregate samples newer than `time_range_seconds` per provider
    pub async fn aggregate(&self, time_range_seconds: u64) -> Vec<ProviderPerformanceReport> {
        let cutoff = Utc::now() - Duration::seconds(time_range_seconds as i64);
        let buffers = self.buffers.read().await;

        let mut reports: Vec<ProviderPerformanceReport> = buffers
            .iter()
            .map(|(provider_id, samples)| {
                let recent: Vec<&PerformanceSample> =
                    samples.iter().filter(|s| s.timestamp >= cutoff).collect();
                let n = recent.len();
                let avg = |f: fn(&PerformanceSample) -> f64| {
                    if n > 0 {
                        recent.iter().map(|s| f(s)).sum::<f64>() / n as f64
                    } else {
                        0.0
                    }
                };

                ProviderPerformanceReport {
                    provider_id: provider_id.clone(),
                    sample_count: n,
                    avg_response_time_ms: avg(|s| s.response_time_ms as f64),
                    avg_error_rate_pct: avg(|s| s.error_rate_pct),
                    avg_throughput: avg(|s| s.throughput),
                    avg_cache_hit_ratio: avg(|s| s.cache_hit_ratio),
                    avg_bandwidth_usage: avg(|s| s.bandwidth_usage),
                }
            })
            .collect();

        reports.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        reports
    }
}

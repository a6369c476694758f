/// Delivery service - the request-facing façade
///
/// Converts an already-authorized content-access request into a secured,
/// provider-routed signed URL: resolves the target provider through the
/// failover controller (or an explicit caller preference), signs against
/// that provider's current key, and optionally returns ranked fallback
/// URLs from the next-best healthy providers.
use crate::error::{AppError, Result};
use crate::metrics::SIGNED_URLS_TOTAL;
use crate::models::{
    DeliveryEvent, FailoverUrls, ProviderConfig, SignedUrl, SignedUrlRequest,
};
use crate::services::failover::FailoverController;
use crate::services::health_monitor::HealthMonitor;
use crate::services::provider_registry::ProviderRegistry;
use crate::services::url_signer::UrlSigner;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub struct DeliveryService {
    registry: Arc<ProviderRegistry>,
    monitor: Arc<HealthMonitor>,
    failover: Arc<FailoverController>,
    signer: Arc<UrlSigner>,
    events: broadcast::Sender<DeliveryEvent>,
    urls_issued: AtomicU64,
    /// Sign against the retained primary even when nothing is healthy
    allow_degraded: bool,
    fallback_count: usize,
}

impl DeliveryService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        monitor: Arc<HealthMonitor>,
        failover: Arc<FailoverController>,
        signer: Arc<UrlSigner>,
        events: broadcast::Sender<DeliveryEvent>,
        allow_degraded: bool,
        fallback_count: usize,
    ) -> Self {
        Self {
            registry,
            monitor,
            failover,
            signer,
            events,
            urls_issued: AtomicU64::new(0),
            allow_degraded,
            fallback_count,
        }
    }

    pub fn urls_issued(&self) -> u64 {
        self.urls_issued.load(Ordering::Relaxed)
    }

    pub async fn generate_signed_url(&self, request: &SignedUrlRequest) -> Result<SignedUrl> {
        let provider = self.resolve_provider(request).await?;
        self.check_regional_coverage(&provider, request);

        let signed = self.signer.sign_for_provider(&provider, request).await?;

        self.urls_issued.fetch_add(1, Ordering::Relaxed);
        SIGNED_URLS_TOTAL
            .with_label_values(&[provider.provider_id.as_str()])
            .inc();
        info!(
            provider = %provider.provider_id,
            content_id = %request.content_id,
            restricted = request.allowed_ips.is_some()
                || request.allowed_countries.is_some()
                || request.max_downloads.is_some(),
            "Signed URL issued"
        );

        Ok(signed)
    }

    /// Primary URL from the best healthy provider plus up to
    /// `fallback_count` more from the next-best, skipping providers that
    /// error during signing.
    pub async fn generate_failover_urls(&self, request: &SignedUrlRequest) -> Result<FailoverUrls> {
        let ranked = self.failover.healthy_ranked().await;
        if ranked.is_empty() {
            return Err(AppError::NoHealthyProvider);
        }

        let mut urls = Vec::new();
        for provider in &ranked {
            if urls.len() > self.fallback_count {
                break;
            }
            match self.signer.sign_for_provider(provider, request).await {
                Ok(signed) => {
                    SIGNED_URLS_TOTAL
                        .with_label_values(&[provider.provider_id.as_str()])
                        .inc();
                    urls.push(signed);
                }
                Err(e) => {
                    warn!(
                        provider = %provider.provider_id,
                        error = %e,
                        "Skipping provider that failed to sign"
                    );
                }
            }
        }

        let mut urls = urls.into_iter();
        let primary = urls
            .next()
            .ok_or_else(|| AppError::Signing("All healthy providers failed to sign".into()))?;

        self.urls_issued.fetch_add(1, Ordering::Relaxed);
        Ok(FailoverUrls {
            primary,
            fallback: urls.collect(),
        })
    }

    /// Preferred provider when healthy and active; otherwise the failover
    /// controller's pick. A degraded pick (primary retained while
    /// unhealthy) is only honored when explicitly configured.
    async fn resolve_provider(&self, request: &SignedUrlRequest) -> Result<ProviderConfig> {
        if let Some(preferred) = &request.preferred_provider {
            if let Ok(provider) = self.registry.get(preferred).await {
                if provider.active && self.monitor.is_healthy(preferred).await {
                    return Ok(provider);
                }
                warn!(
                    provider = %preferred,
                    "Preferred provider unavailable; falling back to optimal selection"
                );
            }
        }

        let selected = self.failover.select_optimal_provider().await?;
        let provider = self.registry.get(&selected).await?;

        if !self.monitor.is_healthy(&selected).await || !provider.active {
            if !self.allow_degraded {
                return Err(AppError::NoHealthyProvider);
            }
            warn!(provider = %selected, "Signing against degraded primary");
        }

        Ok(provider)
    }

    /// A request restricted to countries the chosen provider does not serve
    /// is still signed (the restriction itself protects access), but the
    /// mismatch is surfaced to operators.
    fn check_regional_coverage(&self, provider: &ProviderConfig, request: &SignedUrlRequest) {
        let Some(countries) = &request.allowed_countries else {
            return;
        };
        if provider.regions.is_empty() {
            return;
        }

        let covered = countries
            .iter()
            .any(|c| provider.regions.iter().any(|r| r.eq_ignore_ascii_case(c)));
        if !covered {
            warn!(
                provider = %provider.provider_id,
                countries = ?countries,
                "Requested countries outside provider regions"
            );
            let _ = self.events.send(DeliveryEvent::RegionalComplianceViolation {
                provider_id: provider.provider_id.clone(),
                countries: countries.clone(),
            });
        }
    }
}

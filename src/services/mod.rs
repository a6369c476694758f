pub mod alerting;
pub mod delivery;
pub mod failover;
pub mod health_monitor;
pub mod key_rotation;
pub mod key_store;
pub mod performance;
pub mod provider_registry;
pub mod url_signer;

pub use alerting::{AlertService, AlertSink, AlertStore, InMemoryAlertStore, LogSink, WebhookSink};
pub use delivery::DeliveryService;
pub use failover::FailoverController;
pub use health_monitor::{HealthMonitor, HealthProber, HttpProber, ProbeOutcome};
pub use key_rotation::KeyRotationScheduler;
pub use key_store::KeyStore;
pub use performance::{HealthDerivedSampler, MetricsCollector, PerformanceSampler};
pub use provider_registry::ProviderRegistry;
pub use url_signer::{HmacSha256Signer, Signer, UrlSigner};

use actix_web::{web, App, HttpServer};
use cdn_delivery_service::background::{shutdown_background_tasks, spawn_background_tasks};
use cdn_delivery_service::config::Config;
use cdn_delivery_service::handlers::{configure_routes, AppContext};
use cdn_delivery_service::models::DeliveryEvent;
use cdn_delivery_service::services::{
    AlertService, AlertSink, DeliveryService, FailoverController, HealthDerivedSampler,
    HealthMonitor, HmacSha256Signer, HttpProber, InMemoryAlertStore, KeyRotationScheduler,
    KeyStore, LogSink, MetricsCollector, ProviderRegistry, UrlSigner, WebhookSink,
};
use std::io;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting cdn-delivery-service");

    let config = Config::from_env()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    // Event bus shared by the timer loops and the alert consumer
    let (events, _) = broadcast::channel::<DeliveryEvent>(256);

    // Registry and key chains from the configured provider table
    let registry = Arc::new(ProviderRegistry::new(
        config.providers.iter().map(|s| s.config.clone()).collect(),
    ));
    let key_store = Arc::new(KeyStore::new());
    for seed in &config.providers {
        let key_id = cdn_delivery_service::services::key_rotation::generate_key_id()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        key_store
            .seed(
                &seed.config.provider_id,
                seed.signing_secret.clone().into_bytes(),
                key_id,
            )
            .await;
    }

    let monitor = Arc::new(HealthMonitor::new(
        registry.clone(),
        Arc::new(HttpProber::new()),
        events.clone(),
        config.health.failure_threshold,
        config.health.recovery_threshold,
    ));

    let initial_primary = registry
        .list_active()
        .await
        .first()
        .map(|p| p.provider_id.clone())
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "No active providers configured")
        })?;
    let failover = Arc::new(FailoverController::new(
        registry.clone(),
        monitor.clone(),
        events.clone(),
        initial_primary,
    ));

    let signer = Arc::new(UrlSigner::new(key_store.clone(), Arc::new(HmacSha256Signer)));
    let delivery = Arc::new(DeliveryService::new(
        registry.clone(),
        monitor.clone(),
        failover.clone(),
        signer,
        events.clone(),
        config.delivery.allow_degraded,
        config.delivery.fallback_count,
    ));

    let rotation = Arc::new(KeyRotationScheduler::new(
        registry.clone(),
        key_store,
        config.rotation.overlap_seconds,
        events.clone(),
    ));

    let collector = Arc::new(MetricsCollector::new(
        registry.clone(),
        monitor.clone(),
        Arc::new(HealthDerivedSampler),
        &config.metrics,
        events.clone(),
    ));

    let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();
    if let Some(url) = &config.alerting.webhook_url {
        sinks.push(Arc::new(WebhookSink::new(url.clone())));
    }
    sinks.push(Arc::new(LogSink));
    let alerts = Arc::new(AlertService::new(
        Arc::new(InMemoryAlertStore::new(config.alerting.history_cap)),
        sinks,
        config.alerting.cooldowns.clone(),
    ));

    let tasks = spawn_background_tasks(
        &config,
        monitor.clone(),
        failover.clone(),
        rotation,
        collector.clone(),
        alerts.clone(),
        events,
    );

    let ctx = AppContext {
        registry,
        monitor,
        failover,
        delivery,
        collector,
        alerts,
    };

    let bind_addr = (config.app.host.clone(), config.app.port);
    tracing::info!(
        "cdn-delivery-service HTTP listening on {}:{}",
        bind_addr.0,
        bind_addr.1
    );

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(ctx.clone()))
            .configure(configure_routes)
    })
    .bind(bind_addr)?
    .run();

    let result = server.await;

    shutdown_background_tasks(tasks).await;
    result
}

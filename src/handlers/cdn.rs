/// HTTP endpoints for the delivery subsystem
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{AlertEvent, SignedUrlRequest};
use crate::services::{
    AlertService, DeliveryService, FailoverController, HealthMonitor, MetricsCollector,
    ProviderRegistry,
};
use std::sync::Arc;

/// Shared handler state, one instance per process
#[derive(Clone)]
pub struct AppContext {
    pub registry: Arc<ProviderRegistry>,
    pub monitor: Arc<HealthMonitor>,
    pub failover: Arc<FailoverController>,
    pub delivery: Arc<DeliveryService>,
    pub collector: Arc<MetricsCollector>,
    pub alerts: Arc<AlertService>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/cdn")
            .route("/status", web::get().to(get_status))
            .route("/signed-url", web::post().to(create_signed_url))
            .route("/failover-urls", web::post().to(create_failover_urls))
            .route("/performance", web::get().to(get_performance))
            .route("/alerts", web::get().to(list_alerts))
            .route("/alerts/{id}/acknowledge", web::post().to(acknowledge_alert))
            .route("/health", web::get().to(get_health))
            .route("/providers/{id}/active", web::put().to(set_provider_active))
            .route("/failover/rebalance", web::post().to(rebalance)),
    )
    .route("/metrics", web::get().to(prometheus_metrics))
    .route("/health", web::get().to(liveness));
}

#[derive(Serialize)]
struct ProviderStatus {
    provider_id: String,
    display_name: String,
    priority: u32,
    active: bool,
    healthy: bool,
    last_response_time_ms: u64,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    current_primary: String,
    providers: Vec<ProviderStatus>,
    total_requests: u64,
    failover_count: u64,
    active_alerts: usize,
}

async fn get_status(ctx: web::Data<AppContext>) -> Result<HttpResponse> {
    let providers = provider_statuses(&ctx).await;
    let all_healthy = providers.iter().all(|p| p.healthy);

    Ok(HttpResponse::Ok().json(StatusResponse {
        status: if all_healthy { "healthy" } else { "degraded" },
        current_primary: ctx.failover.current_primary().await,
        providers,
        total_requests: ctx.delivery.urls_issued(),
        failover_count: ctx.failover.failover_count(),
        active_alerts: ctx.alerts.active_alerts().await.len(),
    }))
}

async fn create_signed_url(
    ctx: web::Data<AppContext>,
    req: web::Json<SignedUrlRequest>,
) -> Result<HttpResponse> {
    let signed = ctx.delivery.generate_signed_url(&req).await?;
    Ok(HttpResponse::Ok().json(signed))
}

async fn create_failover_urls(
    ctx: web::Data<AppContext>,
    req: web::Json<SignedUrlRequest>,
) -> Result<HttpResponse> {
    let urls = ctx.delivery.generate_failover_urls(&req).await?;
    Ok(HttpResponse::Ok().json(urls))
}

#[derive(Deserialize)]
struct PerformanceQuery {
    /// Window in seconds; defaults to one hour
    time_range: Option<u64>,
}

async fn get_performance(
    ctx: web::Data<AppContext>,
    query: web::Query<PerformanceQuery>,
) -> Result<HttpResponse> {
    let reports = ctx
        .collector
        .aggregate(query.time_range.unwrap_or(3600))
        .await;
    Ok(HttpResponse::Ok().json(reports))
}

#[derive(Serialize)]
struct AlertsResponse {
    alerts: Vec<AlertEvent>,
}

async fn list_alerts(ctx: web::Data<AppContext>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(AlertsResponse {
        alerts: ctx.alerts.active_alerts().await,
    }))
}

async fn acknowledge_alert(
    ctx: web::Data<AppContext>,
    id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    ctx.alerts.acknowledge(*id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "acknowledged": true })))
}

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    providers: Vec<ProviderStatus>,
}

async fn get_health(ctx: web::Data<AppContext>) -> Result<HttpResponse> {
    let providers = provider_statuses(&ctx).await;
    let healthy = providers.iter().any(|p| p.healthy && p.active);

    Ok(HttpResponse::Ok().json(HealthResponse { healthy, providers }))
}

#[derive(Deserialize)]
struct SetActiveRequest {
    active: bool,
}

async fn set_provider_active(
    ctx: web::Data<AppContext>,
    id: web::Path<String>,
    req: web::Json<SetActiveRequest>,
) -> Result<HttpResponse> {
    ctx.registry.set_active(&id, req.active).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "provider_id": id.as_str(),
        "active": req.active,
    })))
}

async fn rebalance(ctx: web::Data<AppContext>) -> Result<HttpResponse> {
    let promoted = ctx.failover.rebalance().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "current_primary": ctx.failover.current_primary().await,
        "promoted": promoted,
    })))
}

async fn prometheus_metrics() -> Result<HttpResponse> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| crate::error::AppError::Internal(format!("Metrics encoding failed: {}", e)))?;

    Ok(HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer))
}

async fn liveness() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

async fn provider_statuses(ctx: &AppContext) -> Vec<ProviderStatus> {
    let health = ctx.monitor.snapshot().await;
    ctx.registry
        .list_all()
        .await
        .into_iter()
        .map(|p| {
            let h = health.get(&p.provider_id).cloned().unwrap_or_default();
            ProviderStatus {
                provider_id: p.provider_id,
                display_name: p.display_name,
                priority: p.priority,
                active: p.active,
                healthy: h.is_healthy,
                last_response_time_ms: h.last_response_time_ms,
            }
        })
        .collect()
}

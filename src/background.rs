//! Background task management
//!
//! Centralizes spawning and shutdown of the three periodic loops
//! (health probing, key rotation, metrics collection) and the reactive
//! alert consumer. Each loop ticks on its own interval and exits on the
//! shared shutdown broadcast.

use crate::config::Config;
use crate::services::{
    AlertService, FailoverController, HealthMonitor, KeyRotationScheduler, MetricsCollector,
};
use crate::models::DeliveryEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Handles for graceful shutdown
pub struct BackgroundTasks {
    pub health_handle: tokio::task::JoinHandle<()>,
    pub rotation_handle: tokio::task::JoinHandle<()>,
    pub metrics_handle: tokio::task::JoinHandle<()>,
    pub alerting_handle: tokio::task::JoinHandle<()>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Spawn all background tasks
pub fn spawn_background_tasks(
    config: &Config,
    monitor: Arc<HealthMonitor>,
    failover: Arc<FailoverController>,
    rotation: Arc<KeyRotationScheduler>,
    collector: Arc<MetricsCollector>,
    alerts: Arc<AlertService>,
    events: broadcast::Sender<DeliveryEvent>,
) -> BackgroundTasks {
    info!("Spawning background tasks...");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let health_handle = spawn_health_loop(
        monitor,
        failover,
        Duration::from_secs(config.health.check_interval_seconds),
        shutdown_tx.subscribe(),
    );
    let rotation_handle = spawn_rotation_loop(
        rotation,
        Duration::from_secs(config.rotation.interval_seconds),
        shutdown_tx.subscribe(),
    );
    let metrics_handle = spawn_metrics_loop(
        collector,
        Duration::from_secs(config.metrics.interval_seconds),
        shutdown_tx.subscribe(),
    );
    let alerting_handle = tokio::spawn(alerts.run(events.subscribe(), shutdown_tx.subscribe()));

    info!("All background tasks spawned");

    BackgroundTasks {
        health_handle,
        rotation_handle,
        metrics_handle,
        alerting_handle,
        shutdown_tx,
    }
}

/// Gracefully shut down all background tasks
pub async fn shutdown_background_tasks(tasks: BackgroundTasks) {
    info!("Shutting down background tasks...");

    let _ = tasks.shutdown_tx.send(());

    for (name, handle) in [
        ("health monitor", tasks.health_handle),
        ("key rotation", tasks.rotation_handle),
        ("metrics collector", tasks.metrics_handle),
        ("alert consumer", tasks.alerting_handle),
    ] {
        match tokio::time::timeout(Duration::from_secs(5), handle).await {
            Ok(Ok(())) => info!("{} shut down gracefully", name),
            Ok(Err(e)) => warn!("{} task ended with error: {}", name, e),
            Err(_) => warn!("{} did not shut down within timeout", name),
        }
    }

    info!("Background task shutdown complete");
}

/// Health loop: probe fan-out, then failover evaluation as a barrier so
/// each evaluation sees the full tick's outcomes.
fn spawn_health_loop(
    monitor: Arc<HealthMonitor>,
    failover: Arc<FailoverController>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    monitor.run_check_cycle().await;
                    if let Err(e) = failover.evaluate_failover().await {
                        error!(error = %e, "Failover evaluation failed");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}

fn spawn_rotation_loop(
    rotation: Arc<KeyRotationScheduler>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        // The immediate first tick would re-rotate keys seeded at startup
        timer.tick().await;
        loop {
            tokio::select! {
                _ = timer.tick() => rotation.rotate_all().await,
                _ = shutdown.recv() => break,
            }
        }
    })
}

fn spawn_metrics_loop(
    collector: Arc<MetricsCollector>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = timer.tick() => collector.collect_cycle().await,
                _ = shutdown.recv() => break,
            }
        }
    })
}

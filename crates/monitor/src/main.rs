//! Surveillance monitor - anomaly detection, stream health and alerting
//!
//! Runs the periodic monitoring tasks and the rule engine worker for the
//! lifetime of the process, with health, metrics and operator endpoints
//! served alongside.

use anyhow::{Context, Result};
use monitor_lib::{
    alerting::{AlertRuleEngine, StoreResponseActions},
    anomaly::AnomalyDetector,
    clock::{Clock, SystemClock},
    health::{components, HealthRegistry},
    notify::{NotificationDispatcher, StaticContextProvider, WebhookChannel},
    observability::StructuredLogger,
    scheduler::{PeriodicJob, PeriodicTask},
    store::{HttpEntityStore, Stores},
    stream::{StreamApiClient, StreamControl, StreamHealthMonitor, StreamWatchdog},
    StateTracker,
};
use std::sync::Arc;
use surveillance_monitor::{api, config::MonitorConfig};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting surveillance-monitor");

    let config = MonitorConfig::load()?;
    info!(instance = %config.instance, "Monitor configured");

    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(MONITOR_VERSION);

    let stores = match config.entity_api_url.as_deref() {
        Some(url) => Stores::remote(
            HttpEntityStore::new(url, config.entity_api_token.clone())
                .context("Failed to create entity store client")?,
        ),
        None => {
            warn!("No entity API configured, using in-process collections");
            Stores::in_memory()
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let health_registry = HealthRegistry::new();
    health_registry.register(components::ANOMALY_DETECTOR).await;
    health_registry.register(components::RULE_ENGINE).await;

    let tracker = Arc::new(StateTracker::new(stores.clone(), clock.clone()).with_logger(logger.clone()));

    let dispatcher = Arc::new(
        NotificationDispatcher::new(
            stores.clone(),
            Arc::new(StaticContextProvider::anonymous()),
            clock.clone(),
        )
        .with_channel(Arc::new(WebhookChannel::new(config.webhook_timeout())?)),
    );

    let engine = Arc::new(
        AlertRuleEngine::new(
            stores.clone(),
            dispatcher,
            Arc::new(StoreResponseActions::new(stores.clone())),
            clock.clone(),
        )
        .with_guardrail(config.guardrail()?),
    );

    let (signal_tx, signal_rx) = mpsc::channel(config.signal_buffer);
    let (shutdown_tx, _) = broadcast::channel(1);

    let engine_handle = tokio::spawn(engine.clone().run(
        signal_rx,
        health_registry.clone(),
        shutdown_tx.subscribe(),
    ));

    let detector_config = config.detector();
    let detector: Arc<dyn PeriodicJob> = Arc::new(
        AnomalyDetector::new(stores.clone(), tracker.clone(), clock.clone(), detector_config.clone())
            .with_signal_sender(signal_tx.clone()),
    );
    let mut tasks = vec![PeriodicTask::start(
        detector,
        detector_config.interval,
        health_registry.clone(),
    )];

    match config.stream_api() {
        Some(stream_config) => {
            let control: Arc<dyn StreamControl> = Arc::new(
                StreamApiClient::new(stream_config, clock.clone())
                    .context("Failed to create stream API client")?,
            );
            health_registry.register(components::STREAM_HEALTH_MONITOR).await;
            health_registry.register(components::STREAM_WATCHDOG).await;

            let monitor_config = config.health_monitor();
            let monitor_interval = monitor_config.interval;
            let monitor: Arc<dyn PeriodicJob> = Arc::new(StreamHealthMonitor::with_signals(
                stores.clone(),
                control.clone(),
                tracker.clone(),
                clock.clone(),
                monitor_config,
                signal_tx.clone(),
            ));
            tasks.push(PeriodicTask::start(monitor, monitor_interval, health_registry.clone()));

            let watchdog_config = config.watchdog();
            let watchdog_interval = watchdog_config.interval;
            let watchdog: Arc<dyn PeriodicJob> = Arc::new(StreamWatchdog::new(
                stores.clone(),
                control,
                clock.clone(),
                watchdog_config,
            ));
            tasks.push(PeriodicTask::start(watchdog, watchdog_interval, health_registry.clone()));
        }
        None => warn!("No stream API configured, stream monitoring disabled"),
    }

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        tracker,
        engine,
        signal_tx,
    ));

    // Mark monitor as ready after initialization
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, shutdown_tx.subscribe()));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    health_registry.set_ready(false).await;

    for task in tasks {
        task.stop().await;
    }
    let _ = shutdown_tx.send(());

    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }
    if let Err(e) = engine_handle.await {
        warn!(error = %e, "Rule engine worker failed");
    }

    logger.log_shutdown("SIGINT received");
    Ok(())
}

//! Periodic task runner
//!
//! Each background job runs on its own timer with its own cancel handle, so
//! the detector, the health monitor and the watchdog never serialize behind
//! one another. A tick runs in its own spawned task: its error or panic is
//! logged and recorded in the health registry, and the timer keeps going.

use crate::health::HealthRegistry;
use crate::observability::MonitorMetrics;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Shortest interval a timer accepts; shorter periods are raised to this
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// A unit of work executed once per tick
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    /// Stable name used in logs, metrics and the health registry
    fn name(&self) -> &'static str;

    async fn run_once(&self) -> Result<()>;
}

/// Handle to a running periodic job
pub struct PeriodicTask {
    name: &'static str,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn the timer loop. The first tick fires immediately.
    ///
    /// `every` below [`MIN_INTERVAL`] (including zero) is clamped to it.
    pub fn start(job: Arc<dyn PeriodicJob>, every: Duration, health: HealthRegistry) -> Self {
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let name = job.name();
        let every = if every < MIN_INTERVAL {
            warn!(
                task = name,
                requested_ms = every.as_millis(),
                "Interval below minimum, clamping to {}s",
                MIN_INTERVAL.as_secs()
            );
            MIN_INTERVAL
        } else {
            every
        };
        let handle = tokio::spawn(run_loop(job, every, health, shutdown_rx));

        Self {
            name,
            shutdown,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// False once the loop has exited
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the timer. An in-flight tick is not awaited and finishes on its own.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            warn!(task = self.name, error = %e, "Timer loop ended abnormally");
        }
    }
}

async fn run_loop(
    job: Arc<dyn PeriodicJob>,
    every: Duration,
    health: HealthRegistry,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(
        task = job.name(),
        interval_secs = every.as_secs(),
        "Starting periodic task"
    );

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                spawn_tick(job.clone(), health.clone());
            }
            _ = shutdown.recv() => {
                info!(task = job.name(), "Stopping periodic task");
                break;
            }
        }
    }
}

fn spawn_tick(job: Arc<dyn PeriodicJob>, health: HealthRegistry) {
    tokio::spawn(async move {
        let name = job.name();
        let start = Instant::now();

        let worker = tokio::spawn(async move { job.run_once().await });
        let outcome = match worker.await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("tick panicked: {}", e)),
        };

        let elapsed = start.elapsed();
        MonitorMetrics::new().observe_tick(name, elapsed.as_secs_f64(), outcome.is_ok());

        match outcome {
            Ok(()) => {
                debug!(task = name, elapsed_ms = elapsed.as_millis(), "Tick complete");
                health.set_healthy(name).await;
            }
            Err(e) => {
                error!(task = name, error = %e, "Tick failed");
                health.set_degraded(name, e.to_string()).await;
            }
        }
    });
}

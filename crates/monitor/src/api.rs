//! HTTP API for health checks, Prometheus metrics and operator actions

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use monitor_lib::{
    alerting::{AlertRuleEngine, Signal},
    health::{ComponentStatus, HealthRegistry},
    models::Event,
    MonitorError, StateTracker,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub tracker: Arc<StateTracker>,
    pub engine: Arc<AlertRuleEngine>,
    pub signals: mpsc::Sender<Signal>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        tracker: Arc<StateTracker>,
        engine: Arc<AlertRuleEngine>,
        signals: mpsc::Sender<Signal>,
    ) -> Self {
        Self {
            health_registry,
            tracker,
            engine,
            signals,
        }
    }
}

/// Maps library errors onto status codes
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<MonitorError>() {
            Some(MonitorError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Some(MonitorError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            Some(_) => StatusCode::BAD_REQUEST,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self.0, "Request failed");
        }

        (
            status,
            Json(ErrorBody {
                error: format!("{:#}", self.0),
            }),
        )
            .into_response()
    }
}

/// Operator performing a transition
#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub by: String,
}

#[derive(Debug, Serialize)]
struct SignalAccepted {
    signal_id: String,
}

/// Health check response - returns 200 if healthy, 503 if degraded/unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Result<impl IntoResponse, ApiError> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    ))
}

async fn acknowledge_anomaly(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(actor): Json<ActorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let anomaly = state.tracker.acknowledge(&id, &actor.by).await?;
    Ok(Json(anomaly))
}

async fn resolve_anomaly(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(actor): Json<ActorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let anomaly = state.tracker.resolve(&id, &actor.by).await?;
    Ok(Json(anomaly))
}

async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let notification = state.tracker.mark_read(&id).await?;
    Ok(Json(notification))
}

async fn acknowledge_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(actor): Json<ActorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let notification = state.tracker.acknowledge_notification(&id, &actor.by).await?;
    Ok(Json(notification))
}

async fn clone_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workflow = state.engine.clone_workflow(&id).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

/// Queue a new event for rule evaluation
async fn submit_signal(
    State(state): State<Arc<AppState>>,
    Json(event): Json<Event>,
) -> Result<Response, ApiError> {
    let signal = Signal::from(&event);
    let signal_id = signal.id.clone();

    match state.signals.try_send(signal) {
        Ok(()) => Ok((StatusCode::ACCEPTED, Json(SignalAccepted { signal_id })).into_response()),
        Err(e) => {
            warn!(signal_id = %signal_id, error = %e, "Rule engine queue rejected signal");
            Ok((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorBody {
                    error: format!("rule engine unavailable: {}", e),
                }),
            )
                .into_response())
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/anomalies/:id/acknowledge", post(acknowledge_anomaly))
        .route("/anomalies/:id/resolve", post(resolve_anomaly))
        .route("/notifications/:id/read", post(mark_notification_read))
        .route("/notifications/:id/acknowledge", post(acknowledge_notification))
        .route("/workflows/:id/clone", post(clone_workflow))
        .route("/signals", post(submit_signal))
        .with_state(state)
}

/// Start the API server and run until `shutdown` fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

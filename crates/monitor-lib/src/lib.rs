//! Monitoring and alerting core for a video surveillance platform
//!
//! This crate provides:
//! - Statistical anomaly detection over events and camera heartbeats
//! - Stream health checks, restarts and stale-state cleanup
//! - A rule engine that turns signals into notifications and tasks
//! - Anomaly and notification lifecycle tracking
//! - Health checks and observability for the periodic tasks

pub mod alerting;
pub mod anomaly;
pub mod clock;
pub mod error;
pub mod health;
pub mod models;
pub mod notify;
pub mod observability;
pub mod scheduler;
pub mod store;
pub mod stream;
pub mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{MonitorError, StreamApiError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use scheduler::{PeriodicJob, PeriodicTask};
pub use store::{Filter, Repository, Stores};
pub use tracker::StateTracker;

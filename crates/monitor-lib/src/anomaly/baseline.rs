//! Rolling per-entity rate baseline
//!
//! The baseline is the average number of events per rate window over a long
//! lookback span. It is recomputed on every detection cycle and never stored.

use crate::clock::span;
use crate::models::Event;
use crate::store::{Filter, Repository};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default historical lookback (7 days)
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default rate window (10 minutes)
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(10 * 60);

/// A count observed for one entity at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSample {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub count: u64,
}

impl SignalSample {
    /// One sample per event, keyed by camera
    pub fn from_event(event: &Event) -> Option<Self> {
        event.camera_id.as_ref().map(|camera_id| Self {
            entity_id: camera_id.clone(),
            timestamp: event.created_at,
            count: 1,
        })
    }
}

/// Average rate per window for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline {
    pub entity_id: String,
    pub window_span: Duration,
    /// Events per `window_span`
    pub average_rate: f64,
    /// Total events seen in the lookback
    pub sample_count: u64,
}

/// Computes baselines over `[now - lookback, now - rate_window)`
///
/// The current window is excluded so a spike never inflates its own
/// comparison point.
#[derive(Debug, Clone)]
pub struct BaselineCalculator {
    pub lookback: Duration,
    pub rate_window: Duration,
}

impl BaselineCalculator {
    pub fn new(lookback: Duration, rate_window: Duration) -> Self {
        Self {
            lookback,
            rate_window,
        }
    }

    /// Pure projection over already-fetched samples
    pub fn from_samples(
        &self,
        entity_id: &str,
        samples: &[SignalSample],
        now: DateTime<Utc>,
    ) -> Baseline {
        let history_start = now - span(self.lookback);
        let history_end = now - span(self.rate_window);

        let total: u64 = samples
            .iter()
            .filter(|s| s.entity_id == entity_id)
            .filter(|s| s.timestamp >= history_start && s.timestamp < history_end)
            .map(|s| s.count)
            .sum();

        let window_secs = self.rate_window.as_secs();
        let history_secs = (history_end - history_start).num_seconds().max(0) as u64;
        let windows = if window_secs == 0 {
            0
        } else {
            history_secs / window_secs
        };

        // No history (or a degenerate span) means a zero baseline, never a division by zero
        let average_rate = if windows == 0 {
            0.0
        } else {
            total as f64 / windows as f64
        };

        Baseline {
            entity_id: entity_id.to_string(),
            window_span: self.rate_window,
            average_rate,
            sample_count: total,
        }
    }

    /// Read the entity's history from the event store and project it
    pub async fn compute(
        &self,
        events: &dyn Repository<Event>,
        entity_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Baseline> {
        let history = events
            .filter(
                &Filter::new()
                    .eq("camera_id", entity_id)
                    .since("created_at", now - span(self.lookback))
                    .before("created_at", now - span(self.rate_window)),
            )
            .await
            .with_context(|| format!("Failed to fetch event history for {}", entity_id))?;

        let samples: Vec<SignalSample> = history.iter().filter_map(SignalSample::from_event).collect();
        Ok(self.from_samples(entity_id, &samples, now))
    }
}

impl Default for BaselineCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKBACK, DEFAULT_RATE_WINDOW)
    }
}

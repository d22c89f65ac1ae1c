//! Event spike detection
//!
//! Flags an entity whose event count in the current window exceeds both an
//! absolute floor and a multiple of its rolling baseline.

use super::Baseline;
use crate::models::{AnomalyDetails, Severity};

/// Minimum events per window before a spike can be flagged
pub const DEFAULT_ABSOLUTE_FLOOR: f64 = 10.0;

/// Multiple of the baseline the current rate must exceed
pub const DEFAULT_THRESHOLD_MULTIPLIER: f64 = 3.0;

/// Detects event-rate spikes against a baseline
#[derive(Debug, Clone)]
pub struct SpikeDetector {
    /// Keeps near-zero baselines from turning noise into spikes
    pub absolute_floor: f64,
    pub threshold_multiplier: f64,
}

impl SpikeDetector {
    pub fn new(absolute_floor: f64, threshold_multiplier: f64) -> Self {
        Self {
            absolute_floor,
            threshold_multiplier,
        }
    }

    /// Whether a rate this low can be skipped without fetching a baseline
    pub fn below_floor(&self, current_rate: f64) -> bool {
        current_rate <= self.absolute_floor
    }

    /// Detect a spike from the current window rate and the entity's baseline
    ///
    /// # Returns
    /// * `Some(SpikeAnomaly)` if `current > floor` and `current > baseline * multiplier`
    /// * `None` otherwise
    pub fn detect(&self, current_rate: f64, baseline: &Baseline) -> Option<SpikeAnomaly> {
        if self.below_floor(current_rate) {
            return None;
        }

        if current_rate > baseline.average_rate * self.threshold_multiplier {
            Some(SpikeAnomaly {
                entity_id: baseline.entity_id.clone(),
                current_rate,
                baseline_rate: baseline.average_rate,
                threshold_multiplier: self.threshold_multiplier,
            })
        } else {
            None
        }
    }
}

impl Default for SpikeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_ABSOLUTE_FLOOR, DEFAULT_THRESHOLD_MULTIPLIER)
    }
}

/// Event spike details
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeAnomaly {
    pub entity_id: String,
    pub current_rate: f64,
    pub baseline_rate: f64,
    pub threshold_multiplier: f64,
}

impl SpikeAnomaly {
    /// Percentage above baseline; a zero baseline reports 100%
    pub fn percentage_above_baseline(&self) -> f64 {
        if self.baseline_rate < f64::EPSILON {
            return 100.0;
        }
        ((self.current_rate - self.baseline_rate) / self.baseline_rate) * 100.0
    }

    pub fn severity(&self) -> Severity {
        let pct = self.percentage_above_baseline();
        if pct >= 1000.0 {
            Severity::Critical
        } else if pct >= 500.0 {
            Severity::High
        } else {
            Severity::Medium
        }
    }

    pub fn message(&self) -> String {
        format!(
            "Event spike detected: {:.0} events in the current window vs baseline {:.2} ({:.0}% above baseline)",
            self.current_rate,
            self.baseline_rate,
            self.percentage_above_baseline()
        )
    }

    pub fn details(&self) -> AnomalyDetails {
        AnomalyDetails {
            message: self.message(),
            current_rate: Some(self.current_rate),
            baseline_rate: Some(self.baseline_rate),
            spike_percentage: Some(self.percentage_above_baseline()),
            offline_since: None,
        }
    }
}

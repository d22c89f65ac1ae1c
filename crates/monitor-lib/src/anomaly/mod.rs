//! Anomaly detection for camera signals
//!
//! This module provides:
//! - Rolling per-camera event-rate baselines
//! - Event spike detection (floor plus baseline multiple)
//! - Camera offline detection from heartbeat age
//! - The periodic detector that dedupes and persists anomaly records

mod baseline;
mod detector;
mod offline_detector;
mod spike_detector;

#[cfg(test)]
mod tests;

pub use baseline::{
    Baseline, BaselineCalculator, SignalSample, DEFAULT_LOOKBACK, DEFAULT_RATE_WINDOW,
};
pub use detector::{AnomalyDetector, CheckFailure, DetectionReport, DetectorConfig};
pub use offline_detector::{OfflineAnomaly, OfflineDetector, DEFAULT_OFFLINE_THRESHOLD};
pub use spike_detector::{
    SpikeAnomaly, SpikeDetector, DEFAULT_ABSOLUTE_FLOOR, DEFAULT_THRESHOLD_MULTIPLIER,
};

//! Monitor configuration

use anyhow::{bail, Context, Result};
use monitor_lib::alerting::GuardrailPolicy;
use monitor_lib::anomaly::DetectorConfig;
use monitor_lib::models::Severity;
use monitor_lib::stream::{HealthMonitorConfig, StreamApiConfig, WatchdogConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "MONITOR_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "monitor.toml";

const SECS_PER_HOUR: u64 = 60 * 60;

/// Monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Instance name attached to lifecycle log records
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Port for health, metrics and operator endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Remote entity API. In-process collections are used when unset.
    #[serde(default)]
    pub entity_api_url: Option<String>,

    #[serde(default)]
    pub entity_api_token: Option<String>,

    /// Stream-serving API. Stream monitoring is disabled when unset.
    #[serde(default)]
    pub stream_api_url: Option<String>,

    #[serde(default)]
    pub stream_api_username: String,

    #[serde(default)]
    pub stream_api_password: String,

    #[serde(default = "default_stream_api_timeout")]
    pub stream_api_timeout_secs: u64,

    /// Anomaly detection interval in seconds
    #[serde(default = "default_detector_interval")]
    pub detector_interval_secs: u64,

    #[serde(default = "default_offline_threshold")]
    pub offline_threshold_secs: u64,

    #[serde(default = "default_spike_floor")]
    pub spike_absolute_floor: f64,

    #[serde(default = "default_spike_multiplier")]
    pub spike_threshold_multiplier: f64,

    /// Stream health cycle interval in seconds
    #[serde(default = "default_health_interval")]
    pub health_monitor_interval_secs: u64,

    #[serde(default = "default_staleness_hours")]
    pub staleness_threshold_hours: u64,

    #[serde(default = "default_restart_attempts")]
    pub restart_attempts: u32,

    /// Watchdog interval in seconds
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,

    #[serde(default = "default_min_confidence")]
    pub guardrail_min_confidence: f64,

    #[serde(default = "default_min_severity")]
    pub guardrail_min_severity: String,

    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,

    /// Capacity of the signal channel feeding the rule engine
    #[serde(default = "default_signal_buffer")]
    pub signal_buffer: usize,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "surveillance-monitor".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_stream_api_timeout() -> u64 {
    30
}

fn default_detector_interval() -> u64 {
    60
}

fn default_offline_threshold() -> u64 {
    300
}

fn default_spike_floor() -> f64 {
    10.0
}

fn default_spike_multiplier() -> f64 {
    3.0
}

fn default_health_interval() -> u64 {
    300
}

fn default_staleness_hours() -> u64 {
    24
}

fn default_restart_attempts() -> u32 {
    3
}

fn default_watchdog_interval() -> u64 {
    300
}

fn default_min_confidence() -> f64 {
    0.6
}

fn default_min_severity() -> String {
    "medium".to_string()
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_signal_buffer() -> usize {
    1024
}

impl MonitorConfig {
    /// Load configuration from the config file and `MONITOR_*` environment variables
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Environment variables override values from `path`, which may be absent
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("MONITOR").try_parsing(true))
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        let config: Self = config
            .try_deserialize()
            .context("Invalid monitor configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot honor
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("detector_interval_secs", self.detector_interval_secs),
            ("health_monitor_interval_secs", self.health_monitor_interval_secs),
            ("watchdog_interval_secs", self.watchdog_interval_secs),
        ];
        for (field, value) in intervals {
            if value == 0 {
                bail!("{} must be at least 1 second (MONITOR_{})", field, field.to_uppercase());
            }
        }

        if self.signal_buffer == 0 {
            bail!("signal_buffer must be at least 1 (MONITOR_SIGNAL_BUFFER)");
        }

        if self.staleness_threshold_hours == 0
            || self.staleness_threshold_hours.checked_mul(SECS_PER_HOUR).is_none()
        {
            bail!(
                "staleness_threshold_hours must be between 1 and {} (MONITOR_STALENESS_THRESHOLD_HOURS)",
                u64::MAX / SECS_PER_HOUR
            );
        }

        Ok(())
    }

    pub fn detector(&self) -> DetectorConfig {
        DetectorConfig::default()
            .with_interval(Duration::from_secs(self.detector_interval_secs))
            .with_offline_threshold(Duration::from_secs(self.offline_threshold_secs))
            .with_spike_thresholds(self.spike_absolute_floor, self.spike_threshold_multiplier)
    }

    pub fn health_monitor(&self) -> HealthMonitorConfig {
        HealthMonitorConfig {
            interval: Duration::from_secs(self.health_monitor_interval_secs),
            staleness_threshold: Duration::from_secs(
                self.staleness_threshold_hours.saturating_mul(SECS_PER_HOUR),
            ),
            restart_attempts: self.restart_attempts,
            ..HealthMonitorConfig::default()
        }
    }

    pub fn watchdog(&self) -> WatchdogConfig {
        WatchdogConfig {
            interval: Duration::from_secs(self.watchdog_interval_secs),
        }
    }

    pub fn guardrail(&self) -> Result<GuardrailPolicy> {
        let min_severity = self
            .guardrail_min_severity
            .parse::<Severity>()
            .map_err(anyhow::Error::msg)
            .context("Invalid guardrail_min_severity")?;

        Ok(GuardrailPolicy {
            min_confidence: self.guardrail_min_confidence,
            min_severity,
        })
    }

    pub fn stream_api(&self) -> Option<StreamApiConfig> {
        let base_url = self.stream_api_url.clone()?;
        Some(StreamApiConfig {
            base_url,
            username: self.stream_api_username.clone(),
            password: self.stream_api_password.clone(),
            timeout: Duration::from_secs(self.stream_api_timeout_secs),
            ..StreamApiConfig::default()
        })
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

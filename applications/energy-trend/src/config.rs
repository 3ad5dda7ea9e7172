use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub chart: ChartConfig,
    #[serde(default)]
    pub trend: TrendConfig,
    #[serde(default)]
    pub cost: CostConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the readings backend, e.g. "http://energy.local:5000"
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_interval_secs() -> u64 {
    10
}

fn default_debounce_ms() -> u64 {
    500
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    /// Upper bound on points kept after a full reload (LTTB threshold)
    #[serde(default = "default_max_points")]
    pub max_points: usize,
    #[serde(default = "default_live_threshold_secs")]
    pub live_threshold_secs: i64,
}

fn default_max_points() -> usize {
    2000
}

fn default_live_threshold_secs() -> i64 {
    120
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            max_points: default_max_points(),
            live_threshold_secs: default_live_threshold_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    /// Response window of the power EMA
    #[serde(default = "default_ema_window_hours")]
    pub ema_window_hours: f64,
    /// Nominal spacing of the sensor samples
    #[serde(default = "default_sample_period_secs")]
    pub sample_period_secs: f64,
}

fn default_ema_window_hours() -> f64 {
    48.0
}

fn default_sample_period_secs() -> f64 {
    10.0
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            ema_window_hours: default_ema_window_hours(),
            sample_period_secs: default_sample_period_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    #[serde(default = "default_per_kwh")]
    pub per_kwh: f64,
}

fn default_per_kwh() -> f64 {
    0.3102
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            per_kwh: default_per_kwh(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Days of history fetched by the initial full load
    #[serde(default = "default_initial_days")]
    pub initial_days: u32,
}

fn default_initial_days() -> u32 {
    7
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_days: default_initial_days(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file with environment variable substitution.
    /// `ENERGY_API_URL`, when set, overrides `api.base_url`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content)?;
        let mut config: Config = serde_yaml::from_str(&expanded)?;

        if let Ok(url) = std::env::var("ENERGY_API_URL") {
            config.api.base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(AppError::Config("api.base_url cannot be empty".to_string()));
        }

        if self.api.timeout_secs == 0 {
            return Err(AppError::Config("api.timeout_secs cannot be 0".to_string()));
        }

        if self.polling.interval_secs == 0 {
            return Err(AppError::Config(
                "polling.interval_secs cannot be 0".to_string(),
            ));
        }

        if self.chart.max_points < 3 {
            return Err(AppError::Config(
                "chart.max_points must be at least 3".to_string(),
            ));
        }

        if self.chart.live_threshold_secs < 0 {
            return Err(AppError::Config(
                "chart.live_threshold_secs cannot be negative".to_string(),
            ));
        }

        if !(self.trend.ema_window_hours > 0.0 && self.trend.sample_period_secs > 0.0) {
            return Err(AppError::Config(
                "trend.ema_window_hours and trend.sample_period_secs must be positive".to_string(),
            ));
        }

        if !self.cost.per_kwh.is_finite() || self.cost.per_kwh < 0.0 {
            return Err(AppError::Config(
                "cost.per_kwh must be a non-negative number".to_string(),
            ));
        }

        if self.session.initial_days == 0 {
            return Err(AppError::Config(
                "session.initial_days cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Expand environment variables in the format $(VAR_NAME)
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();

    let re = regex::Regex::new(r"\$\(([A-Z_][A-Z0-9_]*)\)")
        .map_err(|e| AppError::Internal(e.to_string()))?;

    for cap in re.captures_iter(content) {
        let full_match = &cap[0];
        let var_name = &cap[1];

        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(full_match, &value);
        }
    }

    Ok(result)
}

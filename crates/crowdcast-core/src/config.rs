//! Engine configuration.
//!
//! Every section deserializes with defaults so a config file only needs to
//! name the values it overrides. `EngineConfig::load` reads a JSON file and
//! validates the result before the engine sees it.

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Upper bound on retry counts for any external call.
pub const MAX_RETRIES: u32 = 16;

/// Exponential backoff `base * 2^attempt`, saturating instead of overflowing.
pub fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
}

/// Smoothing coefficients for the damped Holt model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    pub alpha: f64,
    pub beta: f64,
    /// Damping factor. 1.0 is classic undamped Holt.
    #[serde(default = "default_phi")]
    pub phi: f64,
}

fn default_phi() -> f64 {
    1.0
}

impl Default for Coefficients {
    fn default() -> Self {
        Self {
            alpha: 0.4,
            beta: 0.2,
            phi: 1.0,
        }
    }
}

impl Coefficients {
    pub fn new(alpha: f64, beta: f64, phi: f64) -> Self {
        Self { alpha, beta, phi }
    }

    pub fn undamped(self) -> Self {
        Self { phi: 1.0, ..self }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(ForecastError::Config(format!(
                "alpha must be in (0,1), got {}",
                self.alpha
            )));
        }
        if !(self.beta > 0.0 && self.beta < 1.0) {
            return Err(ForecastError::Config(format!(
                "beta must be in (0,1), got {}",
                self.beta
            )));
        }
        if !(self.phi > 0.0 && self.phi <= 1.0) {
            return Err(ForecastError::Config(format!(
                "phi must be in (0,1], got {}",
                self.phi
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Coefficients used for zones without a kind override, and as the
    /// "provided" candidates of the grid search.
    pub defaults: Coefficients,
    /// Per zone-kind coefficient seeds (e.g. "library", "dining").
    pub kind_overrides: HashMap<String, Coefficients>,
    pub hyperparameter_search: bool,
    /// Refit every N cycle ticks. 1 refits on every tick.
    pub refit_every_ticks: u64,
    /// Optional bound on |trend| per step. Unset leaves trend unclamped.
    pub trend_clamp: Option<f64>,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            defaults: Coefficients::default(),
            kind_overrides: HashMap::new(),
            hyperparameter_search: true,
            refit_every_ticks: 1,
            trend_clamp: None,
        }
    }
}

impl SmoothingConfig {
    pub fn coefficients_for(&self, kind: Option<&str>) -> Coefficients {
        kind.and_then(|k| self.kind_overrides.get(k))
            .copied()
            .unwrap_or(self.defaults)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub fill_missing: bool,
    pub winsorize: bool,
    pub lower_percentile: f64,
    pub upper_percentile: f64,
    /// ln(1+x) variance stabilization of the model input.
    pub log1p: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            fill_missing: true,
            winsorize: true,
            lower_percentile: 5.0,
            upper_percentile: 95.0,
            log1p: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonalConfig {
    pub enabled: bool,
    pub lookback_days: u32,
    pub bin_minutes: u32,
    pub weight_short: f64,
    pub weight_long: f64,
    pub switch_threshold_minutes: u32,
    /// Offset applied to UTC timestamps before bucketing by time of day.
    pub utc_offset_minutes: i32,
}

impl Default for SeasonalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookback_days: 7,
            bin_minutes: 15,
            weight_short: 0.3,
            weight_long: 0.6,
            switch_threshold_minutes: 60,
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Horizons computed by every cycle, in minutes.
    pub horizons: Vec<u32>,
    /// Spacing of observations. A horizon of H minutes is ceil(H / interval)
    /// model steps.
    pub observation_interval_minutes: u32,
    pub confidence_intervals: bool,
    /// Hard cap on retained observations per zone.
    pub history_points: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizons: vec![15, 30, 60, 120],
            observation_interval_minutes: 5,
            confidence_intervals: true,
            history_points: 4096,
        }
    }
}

impl ForecastConfig {
    pub fn steps_for(&self, horizon_minutes: u32) -> u32 {
        let interval = self.observation_interval_minutes.max(1);
        horizon_minutes.div_ceil(interval).max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity for zones the catalog never listed. None is unbounded.
    pub default_capacity: Option<u32>,
    pub max_zones: usize,
    /// Whether read-only queries may register an unknown zone.
    pub auto_register_on_read: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_capacity: None,
            max_zones: 10_000,
            auto_register_on_read: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub bucket_minutes: u32,
    pub max_buckets: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bucket_minutes: 5,
            max_buckets: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub cycle_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub fetch_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 300,
            poll_interval_secs: 60,
            fetch_timeout_ms: 10_000,
        }
    }
}

impl SchedulerConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub persist_predictions: bool,
    pub channel_capacity: usize,
    pub write_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            persist_predictions: true,
            channel_capacity: 10_000,
            write_timeout_ms: 5000,
            max_retries: 3,
            retry_base_delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub url: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 5000,
            max_retries: 2,
            retry_base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub smoothing: SmoothingConfig,
    pub preprocess: PreprocessConfig,
    pub seasonal: SeasonalConfig,
    pub forecast: ForecastConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub persistence: PersistenceConfig,
    pub source: SourceConfig,
}

impl EngineConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(raw).map_err(|e| ForecastError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.smoothing.defaults.validate()?;
        for (kind, coefficients) in &self.smoothing.kind_overrides {
            coefficients
                .validate()
                .map_err(|e| ForecastError::Config(format!("kind '{}': {}", kind, e)))?;
        }
        if let Some(clamp) = self.smoothing.trend_clamp {
            if !(clamp > 0.0) {
                return Err(ForecastError::Config(
                    "trend_clamp must be positive".to_string(),
                ));
            }
        }

        let p = &self.preprocess;
        if !(0.0..=100.0).contains(&p.lower_percentile)
            || !(0.0..=100.0).contains(&p.upper_percentile)
            || p.lower_percentile >= p.upper_percentile
        {
            return Err(ForecastError::Config(format!(
                "percentile bounds must satisfy 0 <= lower < upper <= 100, got {}/{}",
                p.lower_percentile, p.upper_percentile
            )));
        }

        let s = &self.seasonal;
        if s.bin_minutes == 0 || s.bin_minutes > 1440 {
            return Err(ForecastError::Config(
                "seasonal.bin_minutes must be in 1..=1440".to_string(),
            ));
        }
        for w in [s.weight_short, s.weight_long] {
            if !(0.0..=1.0).contains(&w) {
                return Err(ForecastError::Config(format!(
                    "seasonal weights must be in [0,1], got {}",
                    w
                )));
            }
        }

        if self.forecast.horizons.is_empty() || self.forecast.horizons.contains(&0) {
            return Err(ForecastError::Config(
                "forecast.horizons must be non-empty and positive".to_string(),
            ));
        }
        if self.forecast.observation_interval_minutes == 0 {
            return Err(ForecastError::Config(
                "forecast.observation_interval_minutes must be positive".to_string(),
            ));
        }
        if self.cache.bucket_minutes == 0 || self.cache.max_buckets == 0 {
            return Err(ForecastError::Config(
                "cache bucket width and size must be positive".to_string(),
            ));
        }
        if self.store.max_zones == 0 {
            return Err(ForecastError::Config(
                "store.max_zones must be positive".to_string(),
            ));
        }

        let sched = &self.scheduler;
        if sched.cycle_interval_secs == 0 || sched.poll_interval_secs == 0 {
            return Err(ForecastError::Config(
                "scheduler intervals must be positive".to_string(),
            ));
        }
        // External calls must finish before the next tick is due.
        let tick_ms = sched
            .cycle_interval_secs
            .min(sched.poll_interval_secs)
            .saturating_mul(1000);
        if sched.fetch_timeout_ms >= tick_ms {
            return Err(ForecastError::Config(format!(
                "fetch_timeout_ms ({}) must be shorter than the tick interval ({} ms)",
                sched.fetch_timeout_ms, tick_ms
            )));
        }
        if self.persistence.max_retries > MAX_RETRIES || self.source.max_retries > MAX_RETRIES {
            return Err(ForecastError::Config(format!(
                "max_retries must be at most {}",
                MAX_RETRIES
            )));
        }
        if self.persistence.write_timeout_ms >= sched.cycle_interval_secs.saturating_mul(1000) {
            return Err(ForecastError::Config(
                "persistence.write_timeout_ms must be shorter than the cycle interval".to_string(),
            ));
        }
        Ok(())
    }
}

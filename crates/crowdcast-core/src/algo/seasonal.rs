//! Time-of-day baseline: historical mean occupancy per fixed-width bucket.

use crate::config::SeasonalConfig;
use crate::types::Observation;
use chrono::{DateTime, Duration, FixedOffset, Offset, Timelike, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
struct BinStats {
    sum: f64,
    count: u32,
}

/// Per-bucket mean counts for one zone over the lookback window.
#[derive(Debug, Clone)]
pub struct SeasonalProfile {
    bins: HashMap<u32, BinStats>,
    bin_minutes: u32,
    offset: FixedOffset,
}

impl SeasonalProfile {
    /// Bucket every observation within `lookback_days` of `now`.
    pub fn estimate<'a, I>(observations: I, now: DateTime<Utc>, config: &SeasonalConfig) -> Self
    where
        I: IntoIterator<Item = &'a Observation>,
    {
        let offset = offset_for(config.utc_offset_minutes);
        let since = now - Duration::days(config.lookback_days as i64);
        let mut bins: HashMap<u32, BinStats> = HashMap::new();

        for obs in observations {
            if obs.timestamp < since || obs.timestamp > now {
                continue;
            }
            let bin = bucket_of(obs.timestamp, offset, config.bin_minutes);
            let stats = bins.entry(bin).or_default();
            stats.sum += obs.count as f64;
            stats.count += 1;
        }

        Self {
            bins,
            bin_minutes: config.bin_minutes,
            offset,
        }
    }

    /// Mean count for the bucket containing `at`, if that bucket has data.
    pub fn value_at(&self, at: DateTime<Utc>) -> Option<f64> {
        let bin = bucket_of(at, self.offset, self.bin_minutes);
        self.bins
            .get(&bin)
            .filter(|s| s.count > 0)
            .map(|s| s.sum / s.count as f64)
    }

    pub fn populated_bins(&self) -> usize {
        self.bins.len()
    }
}

/// `(hour * 60 + minute) / bin_minutes` in local time.
pub fn bucket_of(at: DateTime<Utc>, offset: FixedOffset, bin_minutes: u32) -> u32 {
    let local = at.with_timezone(&offset);
    (local.hour() * 60 + local.minute()) / bin_minutes.max(1)
}

fn offset_for(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| Utc.fix())
}

/// Seasonal weight for a horizon: short horizons trust the trend model,
/// long ones the time-of-day pattern.
pub fn blend_weight(horizon_minutes: u32, config: &SeasonalConfig) -> f64 {
    if horizon_minutes <= config.switch_threshold_minutes {
        config.weight_short
    } else {
        config.weight_long
    }
}

/// `w * seasonal + (1 - w) * trend`, unrounded.
pub fn blend(seasonal: f64, trend_forecast: f64, horizon_minutes: u32, config: &SeasonalConfig) -> f64 {
    let w = blend_weight(horizon_minutes, config);
    w * seasonal + (1.0 - w) * trend_forecast
}

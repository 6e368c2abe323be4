//! Turns a zone's model state into published predictions.
//!
//! Pipeline per horizon:
//!
//! ```text
//! raw = model.forecast(steps)          (model space)
//! value = restore(raw)                 (expm1 once, when log1p is on)
//! trend = round(value).max(0)
//! blended = round(w*seasonal + (1-w)*trend)   when a seasonal bucket exists
//! predicted = clamp(blended, 0, capacity)
//! ```
//!
//! Zones that have seen fewer than two points, or whose model is still in
//! last-value mode, repeat the last observed count.

use crate::algo::preprocess::Preprocessor;
use crate::algo::seasonal::{self, SeasonalProfile};
use crate::algo::smoothing::{round_count, SmoothingMode};
use crate::config::EngineConfig;
use crate::error::{ForecastError, Result};
use crate::store::ZoneEntry;
use crate::types::{ConfidenceInterval, ModelKind, ModelTag, Prediction};
use chrono::{DateTime, Utc};

/// Minimum points before the smoothing path is used for predictions.
pub const MIN_FORECAST_POINTS: u64 = 2;

/// Predictions for one zone across `horizons`, sharing one seasonal profile.
pub fn forecast_zone(
    entry: &ZoneEntry,
    horizons: &[u32],
    config: &EngineConfig,
    preprocessor: &Preprocessor,
    now: DateTime<Utc>,
) -> Result<Vec<Prediction>> {
    let state = entry.state();
    let current = match entry.last_count() {
        Some(count) => count,
        // Hydrated from storage without any fresh observations yet.
        None if state.data_points_processed > 0 => round_count(preprocessor.restore(state.level)),
        None => return Err(ForecastError::insufficient(&entry.zone.id, 1, 0)),
    };

    if state.data_points_processed < MIN_FORECAST_POINTS || state.mode == SmoothingMode::LastValueOnly
    {
        return Ok(horizons
            .iter()
            .map(|&h| Prediction::last_value(&entry.zone, h, current, ModelKind::LastValue, now))
            .collect());
    }

    let profile = config
        .seasonal
        .enabled
        .then(|| SeasonalProfile::estimate(entry.history(), now, &config.seasonal));
    let seasonal_value = profile.as_ref().and_then(|p| p.value_at(now));

    let model = entry.model();
    let capacity = entry.zone.capacity.map(|c| c as f64);

    let predictions = horizons
        .iter()
        .map(|&horizon| {
            let steps = config.forecast.steps_for(horizon);
            let raw = model.forecast(steps);
            let trend_count = round_count(preprocessor.restore(raw));

            let predicted = match seasonal_value {
                Some(s) => round_count(seasonal::blend(
                    s,
                    trend_count as f64,
                    horizon,
                    &config.seasonal,
                )),
                None => trend_count,
            };

            let confidence = config.forecast.confidence_intervals.then(|| {
                let ci = model.confidence_interval(raw, steps);
                let lower = preprocessor.restore(ci.lower).max(0.0);
                let upper = preprocessor.restore(ci.upper).max(lower);
                match capacity {
                    Some(cap) => ConfidenceInterval {
                        lower: lower.min(cap),
                        upper: upper.min(cap),
                    },
                    None => ConfidenceInterval { lower, upper },
                }
            });

            Prediction {
                zone_id: entry.zone.id.clone(),
                horizon_minutes: horizon,
                current_count: current,
                predicted_count: entry.zone.clamp(predicted),
                confidence,
                model_tag: ModelTag {
                    kind: state.model_kind(),
                    seasonal: seasonal_value.is_some(),
                    log1p: preprocessor.uses_log1p(),
                },
                created_at: now,
            }
        })
        .collect();

    Ok(predictions)
}

/// Last-observed-count prediction used when a zone fails inside a cycle.
/// `None` when the zone has no usable count at all.
pub fn fallback_zone(
    entry: &ZoneEntry,
    horizons: &[u32],
    preprocessor: &Preprocessor,
    now: DateTime<Utc>,
) -> Option<Vec<Prediction>> {
    let current = entry.last_count().or_else(|| {
        (entry.state().data_points_processed > 0)
            .then(|| round_count(preprocessor.restore(entry.state().level)))
    })?;
    Some(
        horizons
            .iter()
            .map(|&h| Prediction::last_value(&entry.zone, h, current, ModelKind::Fallback, now))
            .collect(),
    )
}

//! Series cleaning applied before a model is (re)fitted.
//!
//! Order: null fill, percentile winsorization, optional log1p. The inverse
//! transform belongs to the forecast path, never to smoothing state.

use crate::config::PreprocessConfig;

#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn uses_log1p(&self) -> bool {
        self.config.log1p
    }

    pub fn clean(&self, series: &[Option<f64>]) -> Vec<f64> {
        let mut values: Vec<f64> = if self.config.fill_missing {
            fill_missing(series)
        } else {
            series.iter().flatten().copied().collect()
        };

        if self.config.winsorize {
            values = winsorize(
                &values,
                self.config.lower_percentile,
                self.config.upper_percentile,
            );
        }

        if self.config.log1p {
            values.iter_mut().for_each(|v| *v = log1p(*v));
        }

        values
    }

    /// Transform a single online observation into model space.
    pub fn transform_point(&self, value: f64) -> f64 {
        if self.config.log1p { log1p(value) } else { value }
    }

    /// Map a model-space value back to counts. Call once, on the final
    /// forecast.
    pub fn restore(&self, value: f64) -> f64 {
        if self.config.log1p {
            inverse_log1p(value)
        } else {
            value
        }
    }
}

/// Replace missing or non-finite points with 0. Never drops points.
pub fn fill_missing(series: &[Option<f64>]) -> Vec<f64> {
    series
        .iter()
        .map(|v| match v {
            Some(x) if x.is_finite() => *x,
            _ => 0.0,
        })
        .collect()
}

/// Percentile of an ascending-sorted slice with linear interpolation
/// between ranks.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// `(p_lo, p_hi)` over the input, or `None` when it is empty.
pub fn winsorize_bounds(values: &[f64], lower_pct: f64, upper_pct: f64) -> Option<(f64, f64)> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some((percentile(&sorted, lower_pct)?, percentile(&sorted, upper_pct)?))
}

pub fn clip(values: &[f64], (lo, hi): (f64, f64)) -> Vec<f64> {
    values.iter().map(|v| v.clamp(lo, hi)).collect()
}

/// Clip every value into `[p_lo, p_hi]` computed over the input.
///
/// Re-applying `clip` with the same bounds is a no-op. Running `winsorize`
/// again is not: the percentiles of a clipped series can move inward when
/// they fall between ranks. Hold the bounds from [`winsorize_bounds`] fixed
/// when a series must be cleaned more than once.
pub fn winsorize(values: &[f64], lower_pct: f64, upper_pct: f64) -> Vec<f64> {
    match winsorize_bounds(values, lower_pct, upper_pct) {
        Some(bounds) => clip(values, bounds),
        None => Vec::new(),
    }
}

/// `ln(1 + x)` with negative inputs clamped to 0.
pub fn log1p(x: f64) -> f64 {
    x.max(0.0).ln_1p()
}

pub fn inverse_log1p(y: f64) -> f64 {
    y.exp_m1()
}

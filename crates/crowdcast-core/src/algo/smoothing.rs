use crate::config::Coefficients;
use crate::types::{ConfidenceInterval, ModelKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Points needed before smoothing is attempted at all.
pub const MIN_SMOOTHING_POINTS: usize = 3;
/// Differences averaged to seed the initial trend.
const TREND_SEED_DIFFS: usize = 5;
/// z-score of a 95% interval.
const Z_95: f64 = 1.96;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmoothingMode {
    /// Fewer than three points seen: forecast is the last value.
    LastValueOnly,
    Smoothing,
}

/// Persistable state of one zone's model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub level: f64,
    pub trend: f64,
    pub alpha: f64,
    pub beta: f64,
    pub phi: f64,
    pub data_points_processed: u64,
    pub last_updated: Option<DateTime<Utc>>,
    /// RMS of one-step residuals from the last fit pass.
    pub rmse: Option<f64>,
    pub mode: SmoothingMode,
}

impl ModelState {
    pub fn empty(coefficients: Coefficients) -> Self {
        Self {
            level: 0.0,
            trend: 0.0,
            alpha: coefficients.alpha,
            beta: coefficients.beta,
            phi: coefficients.phi,
            data_points_processed: 0,
            last_updated: None,
            rmse: None,
            mode: SmoothingMode::LastValueOnly,
        }
    }

    pub fn coefficients(&self) -> Coefficients {
        Coefficients::new(self.alpha, self.beta, self.phi)
    }

    pub fn is_undamped(&self) -> bool {
        (self.phi - 1.0).abs() < f64::EPSILON
    }

    pub fn model_kind(&self) -> ModelKind {
        match self.mode {
            SmoothingMode::LastValueOnly => ModelKind::LastValue,
            SmoothingMode::Smoothing if self.is_undamped() => ModelKind::Holt,
            SmoothingMode::Smoothing => ModelKind::DampedHolt,
        }
    }
}

/// Output of a single update: what the model expected and how far off it was.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub predicted: f64,
    pub residual: f64,
}

/// Summary of running the update rule over a whole series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitPass {
    pub level: f64,
    pub trend: f64,
    pub sse: f64,
    pub residuals: usize,
}

impl FitPass {
    pub fn rmse(&self) -> Option<f64> {
        (self.residuals > 0).then(|| (self.sse / self.residuals as f64).sqrt())
    }
}

/// Mean of the first (up to five) consecutive differences, 0 below two points.
pub fn initial_trend(values: &[f64]) -> f64 {
    let diffs: Vec<f64> = values
        .windows(2)
        .take(TREND_SEED_DIFFS)
        .map(|w| w[1] - w[0])
        .collect();
    if diffs.is_empty() {
        0.0
    } else {
        diffs.iter().sum::<f64>() / diffs.len() as f64
    }
}

/// One application of the damped Holt recurrence.
#[inline]
fn recurrence(
    level: f64,
    trend: f64,
    x: f64,
    c: &Coefficients,
    trend_clamp: Option<f64>,
) -> (f64, f64, f64) {
    let predicted = level + c.phi * trend;
    let new_level = c.alpha * x + (1.0 - c.alpha) * predicted;
    let mut new_trend = c.beta * (new_level - level) + (1.0 - c.beta) * c.phi * trend;
    if let Some(bound) = trend_clamp {
        new_trend = new_trend.clamp(-bound, bound);
    }
    (predicted, new_level, new_trend)
}

/// Initialize from `values[0]` and run the recurrence over the rest,
/// accumulating squared one-step residuals. Requires at least one value.
pub fn fit_pass(values: &[f64], c: &Coefficients, trend_clamp: Option<f64>) -> Option<FitPass> {
    let (&first, rest) = values.split_first()?;
    let mut level = first;
    let mut trend = initial_trend(values);
    if let Some(bound) = trend_clamp {
        trend = trend.clamp(-bound, bound);
    }

    let mut sse = 0.0;
    for &x in rest {
        let (predicted, l, t) = recurrence(level, trend, x, c, trend_clamp);
        sse += (x - predicted).powi(2);
        level = l;
        trend = t;
    }

    Some(FitPass {
        level,
        trend,
        sse,
        residuals: rest.len(),
    })
}

/// Damped double exponential smoothing (Holt's linear method with a damped
/// trend). `phi = 1` is the classic undamped model.
///
/// ```text
/// yhat = L + phi*T
/// L'   = alpha*x + (1 - alpha)*(L + phi*T)
/// T'   = beta*(L' - L) + (1 - beta)*phi*T
/// F(h) = L + T * phi*(1 - phi^h)/(1 - phi)     (L + h*T when phi = 1)
/// ```
#[derive(Debug, Clone)]
pub struct DampedHolt {
    state: ModelState,
    trend_clamp: Option<f64>,
    /// Points seen while in `LastValueOnly` mode, used to seed the fit.
    warmup: Vec<f64>,
}

impl DampedHolt {
    pub fn new(coefficients: Coefficients, trend_clamp: Option<f64>) -> Self {
        Self {
            state: ModelState::empty(coefficients),
            trend_clamp,
            warmup: Vec::with_capacity(MIN_SMOOTHING_POINTS),
        }
    }

    /// Fit from a value sequence. Returns `None` for an empty sequence.
    pub fn fit(values: &[f64], coefficients: Coefficients, trend_clamp: Option<f64>) -> Option<Self> {
        let mut model = Self::new(coefficients, trend_clamp);
        model.refit(values)?;
        model.state.data_points_processed = values.len() as u64;
        Some(model)
    }

    /// Restore a persisted state.
    pub fn from_state(state: ModelState, trend_clamp: Option<f64>) -> Self {
        let warmup = match state.mode {
            SmoothingMode::LastValueOnly if state.data_points_processed > 0 => vec![state.level],
            _ => Vec::new(),
        };
        Self {
            state,
            trend_clamp,
            warmup,
        }
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn set_coefficients(&mut self, coefficients: Coefficients) {
        self.state.alpha = coefficients.alpha;
        self.state.beta = coefficients.beta;
        self.state.phi = coefficients.phi;
    }

    /// Re-initialize level/trend from `values` with the current
    /// coefficients. Keeps the point counter and `last_updated`; `None` when
    /// `values` is empty.
    pub fn refit(&mut self, values: &[f64]) -> Option<()> {
        let last = *values.last()?;

        if values.len() < MIN_SMOOTHING_POINTS {
            self.state.level = last;
            self.state.trend = 0.0;
            self.state.rmse = None;
            self.state.mode = SmoothingMode::LastValueOnly;
            self.warmup = values.to_vec();
            return Some(());
        }

        let pass = fit_pass(values, &self.state.coefficients(), self.trend_clamp)?;
        self.install(pass);
        Some(())
    }

    fn install(&mut self, pass: FitPass) {
        self.state.level = pass.level;
        self.state.trend = pass.trend;
        self.state.rmse = pass.rmse();
        self.state.mode = SmoothingMode::Smoothing;
        self.warmup.clear();
    }

    /// Apply one observation in model space.
    pub fn update(&mut self, x: f64, at: DateTime<Utc>) -> Step {
        self.state.data_points_processed += 1;
        self.state.last_updated = Some(at);

        if self.state.mode == SmoothingMode::LastValueOnly {
            let predicted = if self.warmup.is_empty() { x } else { self.state.level };
            self.warmup.push(x);
            let seeded = if self.warmup.len() >= MIN_SMOOTHING_POINTS {
                fit_pass(&self.warmup, &self.state.coefficients(), self.trend_clamp)
            } else {
                None
            };
            match seeded {
                Some(pass) => self.install(pass),
                None => self.state.level = x,
            }
            return Step {
                predicted,
                residual: x - predicted,
            };
        }

        let c = self.state.coefficients();
        let (predicted, level, trend) =
            recurrence(self.state.level, self.state.trend, x, &c, self.trend_clamp);
        self.state.level = level;
        self.state.trend = trend;
        Step {
            predicted,
            residual: x - predicted,
        }
    }

    /// Raw h-step forecast in model space.
    pub fn forecast(&self, h: u32) -> f64 {
        let s = &self.state;
        if s.mode == SmoothingMode::LastValueOnly {
            return s.level;
        }
        if s.is_undamped() {
            s.level + h as f64 * s.trend
        } else {
            s.level + s.trend * s.phi * (1.0 - s.phi.powi(h as i32)) / (1.0 - s.phi)
        }
    }

    /// 95% interval around `forecast` for `h` steps, in model space.
    pub fn confidence_interval(&self, forecast: f64, h: u32) -> ConfidenceInterval {
        let rmse = self.state.rmse.filter(|r| *r > 0.0).unwrap_or(1.0);
        let se = rmse * (h.max(1) as f64).sqrt();
        ConfidenceInterval {
            lower: (forecast - Z_95 * se).max(0.0),
            upper: forecast + Z_95 * se,
        }
    }
}

/// Round a count forecast to the nearest integer and floor at 0.
pub fn round_count(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    value.round().max(0.0) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holt(alpha: f64, beta: f64, phi: f64) -> Coefficients {
        Coefficients::new(alpha, beta, phi)
    }

    #[test]
    fn test_single_point_stability() {
        let model = DampedHolt::fit(&[42.0], holt(0.4, 0.2, 0.9), None).unwrap();
        for h in [1, 5, 60, 1000] {
            assert_eq!(model.forecast(h), 42.0);
        }
        assert_eq!(model.state().mode, SmoothingMode::LastValueOnly);
        assert_eq!(round_count(-3.0), 0);
    }

    #[test]
    fn test_empty_fit() {
        assert!(DampedHolt::fit(&[], Coefficients::default(), None).is_none());
    }

    #[test]
    fn test_initial_trend_uses_first_five_diffs() {
        assert_eq!(initial_trend(&[7.0]), 0.0);
        assert_eq!(initial_trend(&[1.0, 3.0]), 2.0);
        // Diffs 1,1,1,1,1 then a jump that must be ignored.
        let values = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 100.0];
        assert_eq!(initial_trend(&values), 1.0);
    }

    #[test]
    fn test_golden_holt_regression() {
        let values = [100.0, 105.0, 110.0, 120.0, 125.0];
        let model = DampedHolt::fit(&values, holt(0.4, 0.2, 1.0), None).unwrap();
        let s = model.state();
        assert!((s.level - 124.705856).abs() < 1e-6, "level = {}", s.level);
        assert!((s.trend - 6.2661792).abs() < 1e-6, "trend = {}", s.trend);
        let f1 = model.forecast(1);
        assert!((f1 - 130.9720352).abs() < 1e-6, "forecast(1) = {}", f1);
        assert_eq!(round_count(f1), 131);

        // Reproducible.
        let again = DampedHolt::fit(&values, holt(0.4, 0.2, 1.0), None).unwrap();
        assert_eq!(again.forecast(1), f1);
    }

    #[test]
    fn test_undamped_is_classic_holt() {
        let values = [10.0, 12.0, 15.0, 15.0, 19.0, 22.0, 21.0];
        let model = DampedHolt::fit(&values, holt(0.5, 0.3, 1.0), None).unwrap();
        let s = model.state();
        for h in [1u32, 2, 10, 50] {
            let expected = s.level + h as f64 * s.trend;
            assert!((model.forecast(h) - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_damped_forecast_converges() {
        let values = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
        let phi = 0.9;
        let model = DampedHolt::fit(&values, holt(0.5, 0.3, phi), None).unwrap();
        let s = model.state();
        let limit = s.level + s.trend * phi / (1.0 - phi);
        assert!((model.forecast(2000) - limit).abs() < 1e-6);
        assert!(model.forecast(10) < model.forecast(20));

        let undamped = DampedHolt::fit(&values, holt(0.5, 0.3, 1.0), None).unwrap();
        assert!(undamped.forecast(2000) > limit * 10.0);
    }

    #[test]
    fn test_online_update_matches_batch_fit() {
        let values = [100.0, 105.0, 110.0, 120.0, 125.0];
        let batch = DampedHolt::fit(&values, holt(0.4, 0.2, 1.0), None).unwrap();

        let mut online = DampedHolt::fit(&values[..4], holt(0.4, 0.2, 1.0), None).unwrap();
        let step = online.update(125.0, Utc::now());
        assert!((online.state().level - batch.state().level).abs() < 1e-9);
        assert!((online.state().trend - batch.state().trend).abs() < 1e-9);
        assert!((step.residual - (125.0 - step.predicted)).abs() < 1e-12);
        assert_eq!(online.state().data_points_processed, 5);
    }

    #[test]
    fn test_warmup_switches_to_smoothing() {
        let mut model = DampedHolt::new(holt(0.4, 0.2, 1.0), None);
        let now = Utc::now();
        model.update(10.0, now);
        assert_eq!(model.forecast(5), 10.0);
        model.update(12.0, now);
        assert_eq!(model.state().mode, SmoothingMode::LastValueOnly);
        assert_eq!(model.forecast(5), 12.0);
        model.update(14.0, now);
        assert_eq!(model.state().mode, SmoothingMode::Smoothing);
        assert_eq!(model.state().data_points_processed, 3);
        assert!(model.forecast(1) > 14.0);
    }

    #[test]
    fn test_warmup_seed_matches_batch_fit() {
        let values = [10.0, 13.0, 14.5];
        let mut online = DampedHolt::new(holt(0.5, 0.3, 0.9), None);
        for v in values {
            online.update(v, Utc::now());
        }
        let batch = DampedHolt::fit(&values, holt(0.5, 0.3, 0.9), None).unwrap();

        assert_eq!(online.state().mode, SmoothingMode::Smoothing);
        assert_eq!(online.state().level, batch.state().level);
        assert_eq!(online.state().trend, batch.state().trend);
        assert_eq!(online.state().rmse, batch.state().rmse);
        // The seed consumed the buffer; the next point is a plain update.
        let step = online.update(16.0, Utc::now());
        assert!(step.residual.is_finite());
    }

    #[test]
    fn test_trend_clamp_bounds_runaway_trend() {
        let values = [0.0, 100.0, 200.0, 300.0, 400.0];
        let model = DampedHolt::fit(&values, holt(0.8, 0.4, 1.0), Some(10.0)).unwrap();
        assert!(model.state().trend.abs() <= 10.0);
    }

    #[test]
    fn test_confidence_interval() {
        let model = DampedHolt::fit(&[5.0], Coefficients::default(), None).unwrap();
        // No residuals: rmse defaults to 1.
        let ci = model.confidence_interval(5.0, 4);
        assert!((ci.upper - (5.0 + 1.96 * 2.0)).abs() < 1e-12);
        assert!((ci.lower - 1.08).abs() < 1e-12);
        let narrow = model.confidence_interval(0.5, 1);
        assert_eq!(narrow.lower, 0.0);
    }

    #[test]
    fn test_rmse_from_fit_pass() {
        let values = [10.0, 10.0, 10.0, 10.0];
        let model = DampedHolt::fit(&values, Coefficients::default(), None).unwrap();
        assert_eq!(model.state().rmse, Some(0.0));
        // Zero rmse still yields a non-degenerate interval.
        let ci = model.confidence_interval(10.0, 1);
        assert!(ci.upper > ci.lower);
    }

    #[test]
    fn test_restore_from_state() {
        let model = DampedHolt::fit(&[1.0, 2.0, 4.0, 8.0], holt(0.3, 0.1, 0.95), None).unwrap();
        let restored = DampedHolt::from_state(model.state().clone(), None);
        assert_eq!(restored.forecast(7), model.forecast(7));
        assert_eq!(restored.state().model_kind(), ModelKind::DampedHolt);
    }
}

//! Small exhaustive search over smoothing coefficients.
//!
//! Runs once per zone per refit, so the grid is kept to roughly a hundred
//! combinations.

use super::smoothing::fit_pass;
use crate::config::Coefficients;
use smallvec::SmallVec;

/// Points needed before the search is worth running.
pub const MIN_SEARCH_POINTS: usize = 6;

const ALPHA_GRID: [f64; 4] = [0.2, 0.4, 0.6, 0.8];
const BETA_GRID: [f64; 4] = [0.1, 0.2, 0.3, 0.4];
const PHI_GRID: [f64; 4] = [0.9, 0.95, 0.98, 1.0];

type Candidates = SmallVec<[f64; 8]>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub coefficients: Coefficients,
    /// Sum of squared one-step residuals; `None` when the search was skipped.
    pub sse: Option<f64>,
    pub evaluated: usize,
}

#[derive(Debug, Clone, Default)]
pub struct GridSearch {
    trend_clamp: Option<f64>,
}

impl GridSearch {
    pub fn new(trend_clamp: Option<f64>) -> Self {
        Self { trend_clamp }
    }

    /// Pick the minimum-SSE coefficients for `values`. Ties keep the
    /// earliest candidate, and the provided values are tried first.
    pub fn select(&self, values: &[f64], provided: Coefficients) -> Selection {
        if values.len() < MIN_SEARCH_POINTS {
            return Selection {
                coefficients: provided.undamped(),
                sse: None,
                evaluated: 0,
            };
        }

        let alphas = candidates(provided.alpha, &ALPHA_GRID);
        let betas = candidates(provided.beta, &BETA_GRID);
        let phis = candidates(provided.phi, &PHI_GRID);

        let mut best: Option<(Coefficients, f64)> = None;
        let mut evaluated = 0;

        for &alpha in &alphas {
            for &beta in &betas {
                for &phi in &phis {
                    let c = Coefficients::new(alpha, beta, phi);
                    let Some(pass) = fit_pass(values, &c, self.trend_clamp) else {
                        continue;
                    };
                    evaluated += 1;
                    if !pass.sse.is_finite() {
                        continue;
                    }
                    match best {
                        Some((_, best_sse)) if pass.sse >= best_sse => {}
                        _ => best = Some((c, pass.sse)),
                    }
                }
            }
        }

        match best {
            Some((coefficients, sse)) => Selection {
                coefficients,
                sse: Some(sse),
                evaluated,
            },
            None => Selection {
                coefficients: provided,
                sse: None,
                evaluated,
            },
        }
    }
}

/// `provided` followed by the grid, without near-duplicates.
fn candidates(provided: f64, grid: &[f64]) -> Candidates {
    let mut out: Candidates = SmallVec::new();
    for v in std::iter::once(provided).chain(grid.iter().copied()) {
        if !out.iter().any(|seen| (seen - v).abs() < 1e-9) {
            out.push(v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_history_skips_search() {
        let search = GridSearch::default();
        let provided = Coefficients::new(0.35, 0.15, 0.9);
        let selection = search.select(&[1.0, 2.0, 3.0, 4.0, 5.0], provided);
        assert_eq!(selection.evaluated, 0);
        assert_eq!(selection.sse, None);
        assert_eq!(selection.coefficients, Coefficients::new(0.35, 0.15, 1.0));
    }

    #[test]
    fn test_candidates_deduplicate() {
        assert_eq!(candidates(0.4, &ALPHA_GRID).len(), 4);
        assert_eq!(candidates(0.35, &ALPHA_GRID).len(), 5);
        assert_eq!(candidates(0.35, &ALPHA_GRID)[0], 0.35);
    }

    #[test]
    fn test_grid_size_is_bounded() {
        let values: Vec<f64> = (0..30).map(|i| (i as f64 * 0.7).sin() * 10.0 + 50.0).collect();
        let selection = GridSearch::default().select(&values, Coefficients::new(0.33, 0.15, 1.0));
        // 5 alphas x 5 betas x 4 phis
        assert_eq!(selection.evaluated, 100);
        assert!(selection.sse.is_some());
    }

    #[test]
    fn test_selection_is_minimum_sse() {
        let values = [10.0, 14.0, 13.0, 19.0, 22.0, 21.0, 27.0, 30.0, 29.0, 35.0];
        let search = GridSearch::default();
        let provided = Coefficients::default();
        let selection = search.select(&values, provided);
        let best_sse = selection.sse.unwrap();

        for &alpha in &ALPHA_GRID {
            for &beta in &BETA_GRID {
                for &phi in &PHI_GRID {
                    let sse = fit_pass(&values, &Coefficients::new(alpha, beta, phi), None)
                        .unwrap()
                        .sse;
                    assert!(best_sse <= sse + 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_constant_series_keeps_provided() {
        // Every candidate scores zero; the first (provided) one wins the tie.
        let values = [50.0; 12];
        let provided = Coefficients::new(0.4, 0.2, 1.0);
        let selection = GridSearch::default().select(&values, provided);
        assert_eq!(selection.coefficients, provided);
        assert_eq!(selection.sse, Some(0.0));
    }
}

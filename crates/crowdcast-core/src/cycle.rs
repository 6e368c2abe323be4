//! Forecast cycle runner.
//!
//! One tick walks the zones through a fixed sequence:
//!
//! ```text
//! Idle ─► Collecting ─► Updating ─► Forecasting ─► Publishing ─► Idle
//!            │
//!            └─ source failed or timed out: tick skipped, state untouched
//! ```
//!
//! A failure inside one zone never aborts the tick; that zone publishes its
//! last observed count instead.

use crate::engine::{sort_busiest_first, Forecaster};
use crate::error::{ForecastError, Result};
use crate::forecast;
use crate::metrics;
use crate::scheduler::Task;
use crate::source::ObservationSource;
use crate::types::Prediction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Collecting,
    Updating,
    Forecasting,
    Publishing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed,
    Skipped { reason: String },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Summary of one tick.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub tick: u64,
    pub started_at: DateTime<Utc>,
    pub outcome: CycleOutcome,
    pub observations_fetched: usize,
    pub observations_applied: usize,
    pub zones_updated: usize,
    pub zones_refit: usize,
    pub predictions: usize,
    pub fallbacks: usize,
    pub duration: Duration,
}

impl CycleReport {
    fn new(tick: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            tick,
            started_at,
            outcome: CycleOutcome::Completed,
            observations_fetched: 0,
            observations_applied: 0,
            zones_updated: 0,
            zones_refit: 0,
            predictions: 0,
            fallbacks: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == CycleOutcome::Completed
    }
}

pub struct CycleRunner {
    forecaster: Forecaster,
    source: Option<Arc<dyn ObservationSource>>,
    state: CycleState,
    ticks: u64,
    /// Zones updated since their last refit.
    dirty: BTreeSet<String>,
    last_report: Option<CycleReport>,
}

impl CycleRunner {
    pub fn new(forecaster: Forecaster) -> Self {
        Self {
            forecaster,
            source: None,
            state: CycleState::Idle,
            ticks: 0,
            dirty: BTreeSet::new(),
            last_report: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn ObservationSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn last_report(&self) -> Option<&CycleReport> {
        self.last_report.as_ref()
    }

    pub async fn run_tick(&mut self) -> CycleReport {
        let timer = Instant::now();
        self.ticks += 1;
        let now = self.forecaster.now();
        let mut report = CycleReport::new(self.ticks, now);

        self.state = CycleState::Collecting;
        if let Err(e) = self.collect(&mut report).await {
            warn!(cycle_id = %report.cycle_id, error = %e, "skipping forecast cycle");
            report.outcome = CycleOutcome::Skipped {
                reason: e.to_string(),
            };
            return self.finish(report, timer);
        }

        self.state = CycleState::Updating;
        let failed = self.update(&mut report);

        // A source may move the clock while fetching.
        let now = self.forecaster.now();
        self.state = CycleState::Forecasting;
        let predictions = self.forecast(&failed, now, &mut report);

        self.state = CycleState::Publishing;
        report.predictions = predictions.len();
        self.forecaster.publish(now, predictions);

        self.finish(report, timer)
    }

    fn finish(&mut self, mut report: CycleReport, timer: Instant) -> CycleReport {
        report.duration = timer.elapsed();
        self.state = CycleState::Idle;

        metrics::CYCLES_TOTAL
            .with_label_values(&[report.outcome.label()])
            .inc();
        metrics::CYCLE_DURATION.observe(report.duration.as_secs_f64());

        self.last_report = Some(report.clone());
        report
    }

    async fn collect(&self, report: &mut CycleReport) -> Result<()> {
        let Some(source) = &self.source else {
            return Ok(());
        };

        let timeout = self.forecaster.config().scheduler.fetch_timeout();
        let fetched = match tokio::time::timeout(timeout, source.fetch()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ForecastError::UpstreamFetchFailure(format!(
                    "{} did not answer within {:?}",
                    source.name(),
                    timeout
                )));
            }
        };

        report.observations_fetched = fetched.len();
        self.forecaster.enqueue(fetched);
        Ok(())
    }

    /// Apply pending observations and refit when due. Returns zones whose
    /// refit failed.
    fn update(&mut self, report: &mut CycleReport) -> BTreeSet<String> {
        let refit_every = self.forecaster.config().smoothing.refit_every_ticks.max(1);
        let mut failed = BTreeSet::new();
        let mut store = self.forecaster.lock_store();

        let drained = store.drain_pending();
        report.zones_updated = drained.len();
        for (zone_id, batch) in drained {
            for obs in &batch {
                match store.update(obs) {
                    Ok(_) => report.observations_applied += 1,
                    Err(e) => warn!(zone = %zone_id, error = %e, "observation not applied"),
                }
            }
            self.dirty.insert(zone_id);
        }

        if self.ticks % refit_every == 0 {
            for zone_id in std::mem::take(&mut self.dirty) {
                match store.refit(&zone_id) {
                    Ok(_) => report.zones_refit += 1,
                    Err(e) if e.is_degraded_mode_trigger() => {
                        debug!(zone = %zone_id, error = %e, "refit skipped");
                    }
                    Err(e) => {
                        warn!(zone = %zone_id, error = %e, "refit failed");
                        failed.insert(zone_id);
                    }
                }
            }
        }

        failed
    }

    fn forecast(
        &self,
        failed: &BTreeSet<String>,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Vec<Prediction> {
        let config = self.forecaster.config();
        let horizons = &config.forecast.horizons;
        let store = self.forecaster.lock_store();
        let mut out = Vec::new();

        for zone_id in store.zone_ids() {
            let Some(entry) = store.entry(&zone_id) else {
                continue;
            };

            let result = if failed.contains(&zone_id) {
                Err(ForecastError::insufficient(&zone_id, 1, 0))
            } else {
                forecast::forecast_zone(entry, horizons, config, store.preprocessor(), now)
            };

            match result {
                Ok(mut predictions) => out.append(&mut predictions),
                Err(e) => match forecast::fallback_zone(entry, horizons, store.preprocessor(), now) {
                    Some(mut fallback) => {
                        warn!(zone = %zone_id, error = %e, "zone forecast failed, publishing last observed count");
                        report.fallbacks += 1;
                        metrics::ZONE_FALLBACKS.inc();
                        out.append(&mut fallback);
                    }
                    None => debug!(zone = %zone_id, "zone has no data yet"),
                },
            }
        }

        sort_busiest_first(&mut out);
        out
    }
}

#[async_trait]
impl Task for CycleRunner {
    fn name(&self) -> &str {
        "forecast-cycle"
    }

    async fn tick(&mut self) {
        let report = self.run_tick().await;
        match &report.outcome {
            CycleOutcome::Completed => info!(
                cycle_id = %report.cycle_id,
                tick = report.tick,
                applied = report.observations_applied,
                zones = report.zones_updated,
                refit = report.zones_refit,
                predictions = report.predictions,
                fallbacks = report.fallbacks,
                elapsed_ms = report.duration.as_millis() as u64,
                "forecast cycle completed"
            ),
            CycleOutcome::Skipped { reason } => info!(
                cycle_id = %report.cycle_id,
                tick = report.tick,
                reason = %reason,
                "forecast cycle skipped"
            ),
        }
    }
}

/// Moves source observations into the pending queue between cycles.
pub struct Poller {
    forecaster: Forecaster,
    source: Arc<dyn ObservationSource>,
}

impl Poller {
    pub fn new(forecaster: Forecaster, source: Arc<dyn ObservationSource>) -> Self {
        Self { forecaster, source }
    }

    pub async fn poll_once(&self) -> Result<usize> {
        let timeout = self.forecaster.config().scheduler.fetch_timeout();
        let fetched = tokio::time::timeout(timeout, self.source.fetch())
            .await
            .map_err(|_| {
                ForecastError::UpstreamFetchFailure(format!(
                    "{} did not answer within {:?}",
                    self.source.name(),
                    timeout
                ))
            })??;
        Ok(self.forecaster.enqueue(fetched))
    }
}

#[async_trait]
impl Task for Poller {
    fn name(&self) -> &str {
        "poller"
    }

    async fn tick(&mut self) {
        match self.poll_once().await {
            Ok(accepted) => debug!(accepted, source = %self.source.name(), "polled observations"),
            Err(e) => warn!(error = %e, source = %self.source.name(), "poll failed"),
        }
    }
}

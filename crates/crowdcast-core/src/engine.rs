//! Forecaster: the one entry point callers use.
//!
//! Wraps the model store (behind a `Mutex`), the prediction cache (behind an
//! `RwLock`) and an optional persistence queue. Locks are never held across
//! an `.await`; async work (hydration) happens between short critical
//! sections.

use crate::algo::smoothing::ModelState;
use crate::cache::{CachedPredictions, PredictionCache};
use crate::catalog::ZoneCatalog;
use crate::checkpoint::StoreCheckpoint;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{ForecastError, Result};
use crate::forecast;
use crate::metrics;
use crate::persistence::{PersistenceQueue, PersistenceSink};
use crate::store::{ModelStore, StoreStats};
use crate::types::{Observation, Prediction, Zone};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Forecaster {
    store: Arc<Mutex<ModelStore>>,
    cache: Arc<RwLock<PredictionCache>>,
    config: Arc<EngineConfig>,
    sink: Option<Arc<dyn PersistenceSink>>,
    persistence: Option<PersistenceQueue>,
    clock: Arc<dyn Clock>,
}

impl Forecaster {
    /// In-memory forecaster with no persistence.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Forecaster that queues writes to `sink`. Must be called inside a
    /// tokio runtime; the queue worker is spawned on it.
    pub fn with_sink(config: EngineConfig, sink: Arc<dyn PersistenceSink>) -> Result<Self> {
        Self::build(config, Some(sink))
    }

    fn build(config: EngineConfig, sink: Option<Arc<dyn PersistenceSink>>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let persistence = match &sink {
            Some(sink) if config.persistence.enabled => Some(PersistenceQueue::spawn(
                sink.clone(),
                config.persistence.clone(),
            )),
            _ => None,
        };

        let mut store = ModelStore::new(config.clone());
        if let Some(queue) = &persistence {
            store = store.with_persistence(queue.clone());
        }

        Ok(Self {
            store: Arc::new(Mutex::new(store)),
            cache: Arc::new(RwLock::new(PredictionCache::new(config.cache.clone()))),
            config,
            sink,
            persistence,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn persistence(&self) -> Option<&PersistenceQueue> {
        self.persistence.as_ref()
    }

    pub(crate) fn lock_store(&self) -> MutexGuard<'_, ModelStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn load_catalog(&self, catalog: ZoneCatalog) -> usize {
        let mut store = self.lock_store();
        let mut loaded = 0;
        for zone in catalog {
            store.upsert(zone);
            loaded += 1;
        }
        info!(zones = loaded, "catalog applied to store");
        loaded
    }

    pub fn upsert_zone(&self, zone: Zone) {
        self.lock_store().upsert(zone);
    }

    /// Load persisted model states for every zone the store knows about and
    /// every zone the sink holds a state for.
    pub async fn hydrate(&self) -> Result<usize> {
        let Some(sink) = &self.sink else {
            return Ok(0);
        };

        let mut zone_ids: BTreeSet<String> = self.lock_store().zone_ids().into_iter().collect();
        match sink.persisted_zone_ids().await {
            Ok(ids) => zone_ids.extend(ids),
            Err(e) => warn!(error = %e, "failed to list persisted zones"),
        }
        let mut states: Vec<(String, ModelState)> = Vec::with_capacity(zone_ids.len());
        for zone_id in zone_ids {
            match sink.load_model_state(&zone_id).await {
                Ok(Some(state)) => states.push((zone_id, state)),
                Ok(None) => {}
                Err(e) => warn!(zone = %zone_id, error = %e, "failed to load persisted model state"),
            }
        }

        let restored = self.lock_store().hydrate(states);
        info!(zones = restored, "hydrated model states");
        Ok(restored)
    }

    pub fn get_prediction(&self, zone_id: &str, horizon_minutes: u32) -> Result<Prediction> {
        let mut by_horizon = self.get_multi_horizon_predictions(zone_id, &[horizon_minutes])?;
        by_horizon
            .remove(&horizon_minutes)
            .ok_or_else(|| ForecastError::insufficient(zone_id, 1, 0))
    }

    pub fn get_multi_horizon_predictions(
        &self,
        zone_id: &str,
        horizons: &[u32],
    ) -> Result<BTreeMap<u32, Prediction>> {
        let now = self.now();
        let mut store = self.lock_store();

        if !store.contains(zone_id) {
            if !self.config.store.auto_register_on_read {
                return Err(ForecastError::ModelNotFound(zone_id.to_string()));
            }
            store.register_or_get_default(zone_id);
        }

        let entry = store
            .entry(zone_id)
            .ok_or_else(|| ForecastError::ModelNotFound(zone_id.to_string()))?;
        let predictions =
            forecast::forecast_zone(entry, horizons, &self.config, store.preprocessor(), now)?;

        Ok(predictions
            .into_iter()
            .map(|p| (p.horizon_minutes, p))
            .collect())
    }

    /// One prediction per zone that has data, busiest first.
    pub fn get_all_predictions(&self, horizon_minutes: u32) -> Vec<Prediction> {
        let now = self.now();
        let store = self.lock_store();
        let mut out: Vec<Prediction> = Vec::with_capacity(store.len());

        for zone_id in store.zone_ids() {
            let Some(entry) = store.entry(&zone_id) else {
                continue;
            };
            match forecast::forecast_zone(
                entry,
                &[horizon_minutes],
                &self.config,
                store.preprocessor(),
                now,
            ) {
                Ok(mut predictions) => out.append(&mut predictions),
                Err(e) => debug!(zone = %zone_id, error = %e, "skipping zone without data"),
            }
        }

        sort_busiest_first(&mut out);
        out
    }

    /// Validate and apply one reading. Persistence happens in the
    /// background and cannot fail this call.
    pub fn submit_observation(
        &self,
        zone_id: &str,
        count: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<ModelState> {
        let obs = Observation::from_raw(zone_id, count, timestamp).inspect_err(|e| {
            metrics::OBSERVATIONS_REJECTED.inc();
            warn!(zone = %zone_id, error = %e, "rejected observation");
        })?;
        self.lock_store().update(&obs)
    }

    /// Hold observations for the next cycle.
    pub fn enqueue(&self, observations: Vec<Observation>) -> usize {
        self.lock_store().enqueue(observations)
    }

    pub fn get_cached_predictions(&self, max_age_minutes: i64) -> Option<CachedPredictions> {
        let now = self.now();
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get(max_age_minutes, now)
    }

    /// Replace the cache bucket for `created_at` and queue the batch for
    /// persistence.
    pub fn publish(&self, created_at: DateTime<Utc>, predictions: Vec<Prediction>) {
        if let Some(queue) = &self.persistence {
            for p in &predictions {
                queue.save_prediction(p.clone());
            }
        }
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .publish(created_at, predictions);
    }

    pub fn model_state(&self, zone_id: &str) -> Result<ModelState> {
        self.lock_store().get(zone_id).cloned()
    }

    pub fn stats(&self) -> StoreStats {
        self.lock_store().stats()
    }

    pub fn snapshot(&self) -> StoreCheckpoint {
        self.lock_store().snapshot()
    }

    pub fn restore(&self, checkpoint: StoreCheckpoint) -> usize {
        self.lock_store().restore(checkpoint)
    }
}

/// Predicted count descending, zone id ascending on ties.
pub fn sort_busiest_first(predictions: &mut [Prediction]) {
    predictions.sort_by(|a, b| {
        b.predicted_count
            .cmp(&a.predicted_count)
            .then_with(|| a.zone_id.cmp(&b.zone_id))
    });
}

//! Model Store
//!
//! Owns one smoothing model and a bounded observation history per zone.
//! Unknown zones are registered on first write through
//! [`ModelStore::register_or_get_default`], the only place a fallback zone is
//! ever constructed. The zone count is bounded; when full, the least recently
//! updated dynamically registered zone is evicted first.
//!
//! ```text
//! observation ─► validate ─► register_or_get_default ─► order check
//!                                                      │
//!                   persistence queue ◄── ModelState ◄─┴─ model.update + history
//! ```

use crate::algo::grid_search::{GridSearch, Selection};
use crate::algo::preprocess::Preprocessor;
use crate::algo::smoothing::{DampedHolt, MIN_SMOOTHING_POINTS, ModelState, SmoothingMode};
use crate::checkpoint::{StoreCheckpoint, ZoneCheckpoint};
use crate::config::EngineConfig;
use crate::error::{ForecastError, Result};
use crate::metrics;
use crate::persistence::PersistenceQueue;
use crate::types::{Observation, Zone};
use chrono::{DateTime, Duration, Utc};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bookkeeping for one zone entry.
#[derive(Debug, Clone)]
pub struct ZoneMeta {
    pub registered_at: DateTime<Utc>,
    /// Timestamp of the last applied observation.
    pub last_observed: Option<DateTime<Utc>>,
    pub updates: u64,
    pub refits: u64,
    /// Registered from an observation rather than the catalog.
    pub dynamic: bool,
}

impl ZoneMeta {
    fn new(dynamic: bool) -> Self {
        Self {
            registered_at: Utc::now(),
            last_observed: None,
            updates: 0,
            refits: 0,
            dynamic,
        }
    }
}

/// What `apply` did with an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Same timestamp as the last applied observation.
    Duplicate,
    /// Older than the last applied observation.
    Stale,
}

#[derive(Debug, Clone)]
pub struct ZoneEntry {
    pub zone: Zone,
    model: DampedHolt,
    history: VecDeque<Observation>,
    meta: ZoneMeta,
}

impl ZoneEntry {
    fn new(zone: Zone, config: &EngineConfig, dynamic: bool) -> Self {
        let coefficients = config.smoothing.coefficients_for(zone.kind.as_deref());
        Self {
            zone,
            model: DampedHolt::new(coefficients, config.smoothing.trend_clamp),
            history: VecDeque::new(),
            meta: ZoneMeta::new(dynamic),
        }
    }

    pub fn model(&self) -> &DampedHolt {
        &self.model
    }

    pub fn state(&self) -> &ModelState {
        self.model.state()
    }

    pub fn meta(&self) -> &ZoneMeta {
        &self.meta
    }

    pub fn history(&self) -> impl Iterator<Item = &Observation> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn last_observation(&self) -> Option<&Observation> {
        self.history.back()
    }

    pub fn last_count(&self) -> Option<i64> {
        self.history.back().map(|o| o.count)
    }

    fn apply(
        &mut self,
        obs: &Observation,
        preprocessor: &Preprocessor,
        config: &EngineConfig,
    ) -> ApplyOutcome {
        if let Some(last) = self.meta.last_observed {
            if obs.timestamp == last {
                return ApplyOutcome::Duplicate;
            }
            if obs.timestamp < last {
                return ApplyOutcome::Stale;
            }
        }

        let x = preprocessor.transform_point(obs.count as f64);
        self.model.update(x, obs.timestamp);
        self.meta.last_observed = Some(obs.timestamp);
        self.meta.updates += 1;

        self.history.push_back(obs.clone());
        self.trim_history(obs.timestamp, config);
        ApplyOutcome::Applied
    }

    fn trim_history(&mut self, latest: DateTime<Utc>, config: &EngineConfig) {
        let cap = config.forecast.history_points.max(1);
        while self.history.len() > cap {
            self.history.pop_front();
        }
        let horizon = Duration::days(config.seasonal.lookback_days.max(1) as i64);
        let cutoff = latest - horizon;
        // Keep the newest point even if the clock jumped.
        while self.history.len() > 1 && self.history.front().is_some_and(|o| o.timestamp < cutoff) {
            self.history.pop_front();
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_zones: usize,
    pub dynamic_registrations: u64,
    pub evictions: u64,
    pub updates: u64,
    pub ignored: u64,
    pub rejected: u64,
    pub refits: u64,
}

pub struct ModelStore {
    zones: HashMap<String, ZoneEntry>,
    pending: Vec<Observation>,
    config: Arc<EngineConfig>,
    preprocessor: Preprocessor,
    search: GridSearch,
    persistence: Option<PersistenceQueue>,
    stats: StoreStats,
}

impl ModelStore {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            zones: HashMap::new(),
            pending: Vec::new(),
            preprocessor: Preprocessor::new(config.preprocess.clone()),
            search: GridSearch::new(config.smoothing.trend_clamp),
            persistence: None,
            stats: StoreStats::default(),
            config,
        }
    }

    pub fn with_persistence(mut self, queue: PersistenceQueue) -> Self {
        self.persistence = Some(queue);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            total_zones: self.zones.len(),
            ..self.stats.clone()
        }
    }

    pub fn contains(&self, zone_id: &str) -> bool {
        self.zones.contains_key(zone_id)
    }

    /// Sorted for deterministic iteration.
    pub fn zone_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.zones.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, zone_id: &str) -> Result<&ModelState> {
        self.entry(zone_id)
            .map(|e| e.state())
            .ok_or_else(|| ForecastError::ModelNotFound(zone_id.to_string()))
    }

    pub fn entry(&self, zone_id: &str) -> Option<&ZoneEntry> {
        self.zones.get(zone_id)
    }

    /// Insert a catalog zone or correct an existing zone's metadata. Model
    /// state and history are kept.
    pub fn upsert(&mut self, zone: Zone) -> &mut ZoneEntry {
        if !self.zones.contains_key(&zone.id) {
            self.make_room();
            metrics::ACTIVE_ZONES.set((self.zones.len() + 1) as f64);
        }

        match self.zones.entry(zone.id.clone()) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                entry.zone = zone;
                entry.meta.dynamic = false;
                entry
            }
            Entry::Vacant(vacant) => vacant.insert(ZoneEntry::new(zone, &self.config, false)),
        }
    }

    /// Return the zone's entry, registering a fallback zone (default
    /// capacity, default coefficients) when it has never been seen.
    pub fn register_or_get_default(&mut self, zone_id: &str) -> &mut ZoneEntry {
        if !self.zones.contains_key(zone_id) {
            self.make_room();
            self.stats.dynamic_registrations += 1;
            metrics::ZONES_REGISTERED.inc();
            metrics::ACTIVE_ZONES.set((self.zones.len() + 1) as f64);
            info!(zone = %zone_id, capacity = ?self.config.store.default_capacity, "registered previously unseen zone");
        }

        let config = &self.config;
        self.zones.entry(zone_id.to_string()).or_insert_with(|| {
            let zone = Zone::unlisted(zone_id, config.store.default_capacity);
            ZoneEntry::new(zone, config, true)
        })
    }

    /// Apply one observation and return the resulting state. Duplicates and
    /// out-of-order observations leave the state untouched. Persistence is
    /// queued, never awaited.
    pub fn update(&mut self, obs: &Observation) -> Result<ModelState> {
        if let Err(e) = obs.validate() {
            self.stats.rejected += 1;
            metrics::OBSERVATIONS_REJECTED.inc();
            return Err(e);
        }

        let config = self.config.clone();
        let preprocessor = self.preprocessor.clone();
        let entry = self.register_or_get_default(&obs.zone_id);
        let outcome = entry.apply(obs, &preprocessor, &config);
        let state = entry.state().clone();

        match outcome {
            ApplyOutcome::Applied => {
                self.stats.updates += 1;
                metrics::OBSERVATIONS_INGESTED.inc();
                if let Some(queue) = &self.persistence {
                    queue.save_model_state(&obs.zone_id, state.clone());
                }
            }
            ApplyOutcome::Duplicate | ApplyOutcome::Stale => {
                self.stats.ignored += 1;
                metrics::OBSERVATIONS_IGNORED.inc();
                debug!(zone = %obs.zone_id, ts = %obs.timestamp, ?outcome, "ignored observation");
            }
        }
        Ok(state)
    }

    /// Hold observations for the next cycle. Invalid ones are rejected here;
    /// returns how many were accepted.
    pub fn enqueue(&mut self, observations: Vec<Observation>) -> usize {
        let mut accepted = 0;
        for obs in observations {
            match obs.validate() {
                Ok(()) => {
                    self.pending.push(obs);
                    accepted += 1;
                }
                Err(e) => {
                    self.stats.rejected += 1;
                    metrics::OBSERVATIONS_REJECTED.inc();
                    warn!(error = %e, "rejected observation");
                }
            }
        }
        accepted
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Take every pending observation, grouped by zone and sorted by
    /// timestamp within each zone.
    pub fn drain_pending(&mut self) -> BTreeMap<String, Vec<Observation>> {
        let mut grouped: BTreeMap<String, Vec<Observation>> = BTreeMap::new();
        for obs in self.pending.drain(..) {
            grouped.entry(obs.zone_id.clone()).or_default().push(obs);
        }
        for batch in grouped.values_mut() {
            batch.sort_by_key(|o| o.timestamp);
        }
        grouped
    }

    /// Re-initialize a zone's model from its cleaned history, choosing
    /// coefficients by grid search when enabled.
    pub fn refit(&mut self, zone_id: &str) -> Result<Selection> {
        let config = self.config.clone();
        let entry = self
            .zones
            .get_mut(zone_id)
            .ok_or_else(|| ForecastError::ModelNotFound(zone_id.to_string()))?;

        let series: Vec<Option<f64>> = entry.history.iter().map(|o| Some(o.count as f64)).collect();
        let cleaned = self.preprocessor.clean(&series);
        if cleaned.is_empty() {
            return Err(ForecastError::insufficient(zone_id, 1, 0));
        }
        // A smoothing model (possibly hydrated) outranks a refit from a
        // history too short to smooth; keep its online state.
        if cleaned.len() < MIN_SMOOTHING_POINTS && entry.state().mode == SmoothingMode::Smoothing {
            return Err(ForecastError::insufficient(
                zone_id,
                MIN_SMOOTHING_POINTS,
                cleaned.len(),
            ));
        }

        let provided = config.smoothing.coefficients_for(entry.zone.kind.as_deref());
        let selection = if config.smoothing.hyperparameter_search {
            self.search.select(&cleaned, provided)
        } else {
            Selection {
                coefficients: provided,
                sse: None,
                evaluated: 0,
            }
        };

        entry.model.set_coefficients(selection.coefficients);
        entry
            .model
            .refit(&cleaned)
            .ok_or_else(|| ForecastError::insufficient(zone_id, 1, 0))?;
        entry.meta.refits += 1;
        self.stats.refits += 1;

        debug!(
            zone = %zone_id,
            points = cleaned.len(),
            alpha = selection.coefficients.alpha,
            beta = selection.coefficients.beta,
            phi = selection.coefficients.phi,
            evaluated = selection.evaluated,
            "refit zone model"
        );

        if let Some(queue) = &self.persistence {
            queue.save_model_state(zone_id, entry.state().clone());
        }
        Ok(selection)
    }

    /// Install persisted states for zones. Unknown zones are registered as
    /// dynamic; known zones keep their catalog metadata.
    pub fn hydrate<I>(&mut self, states: I) -> usize
    where
        I: IntoIterator<Item = (String, ModelState)>,
    {
        let mut restored = 0;
        let trend_clamp = self.config.smoothing.trend_clamp;
        for (zone_id, state) in states {
            let entry = self.register_or_get_default(&zone_id);
            entry.meta.last_observed = state.last_updated;
            entry.model = DampedHolt::from_state(state, trend_clamp);
            restored += 1;
        }
        restored
    }

    pub fn snapshot(&self) -> StoreCheckpoint {
        let mut zones: Vec<ZoneCheckpoint> = self
            .zones
            .iter()
            .map(|(id, entry)| ZoneCheckpoint {
                zone_id: id.clone(),
                zone: Some(entry.zone.clone()),
                state: entry.state().clone(),
            })
            .collect();
        zones.sort_by(|a, b| a.zone_id.cmp(&b.zone_id));
        StoreCheckpoint::new(zones)
    }

    /// Replace model states from a checkpoint. History is not part of a
    /// checkpoint and stays empty for restored zones.
    pub fn restore(&mut self, checkpoint: StoreCheckpoint) -> usize {
        let trend_clamp = self.config.smoothing.trend_clamp;
        let mut restored = 0;
        for row in checkpoint.zones {
            let entry = match row.zone {
                Some(zone) => self.upsert(zone),
                None => self.register_or_get_default(&row.zone_id),
            };
            entry.meta.last_observed = row.state.last_updated;
            entry.model = DampedHolt::from_state(row.state, trend_clamp);
            restored += 1;
        }
        info!(zones = restored, "restored store from checkpoint");
        restored
    }

    /// Evict until there is room for one more zone.
    fn make_room(&mut self) {
        while self.zones.len() >= self.config.store.max_zones.max(1) {
            let Some(victim) = self.find_eviction_candidate() else {
                return;
            };
            self.zones.remove(&victim);
            self.stats.evictions += 1;
            metrics::ZONES_EVICTED.inc();
            warn!(zone = %victim, "evicted zone to stay under the store bound");
        }
    }

    /// Least recently updated dynamic zone, or the least recently updated
    /// zone of any kind if every zone came from the catalog.
    fn find_eviction_candidate(&self) -> Option<String> {
        let oldest = |dynamic_only: bool| {
            self.zones
                .iter()
                .filter(|(_, e)| !dynamic_only || e.meta.dynamic)
                .min_by(|a, b| {
                    a.1.meta
                        .last_observed
                        .cmp(&b.1.meta.last_observed)
                        .then_with(|| a.0.cmp(b.0))
                })
                .map(|(id, _)| id.clone())
        };
        oldest(true).or_else(|| oldest(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn store() -> ModelStore {
        ModelStore::new(Arc::new(EngineConfig::default()))
    }

    #[test]
    fn test_get_unknown_zone() {
        let store = store();
        assert!(matches!(store.get("nope"), Err(ForecastError::ModelNotFound(_))));
    }

    #[test]
    fn test_update_registers_unknown_zone() {
        let mut store = store();
        let state = store.update(&Observation::new("Z99", 10, ts(0))).unwrap();
        assert_eq!(state.data_points_processed, 1);
        assert!(store.entry("Z99").unwrap().meta().dynamic);
        assert_eq!(store.stats().dynamic_registrations, 1);
    }

    #[test]
    fn test_register_or_get_default_is_idempotent() {
        let mut store = store();
        store.register_or_get_default("A");
        store.register_or_get_default("A");
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().dynamic_registrations, 1);
    }

    #[test]
    fn test_unlisted_zone_gets_default_capacity() {
        let config = EngineConfig {
            store: crate::config::StoreConfig {
                default_capacity: Some(250),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut store = ModelStore::new(Arc::new(config));
        store.update(&Observation::new("Q", 3, ts(0))).unwrap();
        assert_eq!(store.entry("Q").unwrap().zone.capacity, Some(250));
    }

    #[test]
    fn test_negative_observation_rejected() {
        let mut store = store();
        assert!(store.update(&Observation::new("A", -2, ts(0))).is_err());
        assert!(!store.contains("A"));
        assert_eq!(store.stats().rejected, 1);
    }

    #[test]
    fn test_duplicate_and_stale_are_ignored() {
        let mut store = store();
        store.update(&Observation::new("A", 10, ts(5))).unwrap();
        let before = store.get("A").unwrap().clone();

        let dup = store.update(&Observation::new("A", 99, ts(5))).unwrap();
        assert_eq!(dup, before);
        let stale = store.update(&Observation::new("A", 99, ts(0))).unwrap();
        assert_eq!(stale, before);

        assert_eq!(store.stats().ignored, 2);
        assert_eq!(store.entry("A").unwrap().history_len(), 1);
    }

    #[test]
    fn test_upsert_keeps_model_state() {
        let mut store = store();
        for (i, c) in [10, 12, 15, 18].iter().enumerate() {
            store.update(&Observation::new("A", *c, ts(i as i64 * 5))).unwrap();
        }
        let before = store.get("A").unwrap().clone();

        store.upsert(Zone::new("A", "Atrium", Some(30)));
        let entry = store.entry("A").unwrap();
        assert_eq!(entry.zone.capacity, Some(30));
        assert!(!entry.meta().dynamic);
        assert_eq!(entry.state(), &before);
        assert_eq!(entry.history_len(), 4);
    }

    #[test]
    fn test_history_bounded_by_cap() {
        let config = EngineConfig {
            forecast: crate::config::ForecastConfig {
                history_points: 5,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut store = ModelStore::new(Arc::new(config));
        for i in 0..20 {
            store.update(&Observation::new("A", i, ts(i * 5))).unwrap();
        }
        let entry = store.entry("A").unwrap();
        assert_eq!(entry.history_len(), 5);
        assert_eq!(entry.last_count(), Some(19));
        assert_eq!(entry.state().data_points_processed, 20);
    }

    #[test]
    fn test_history_bounded_by_lookback() {
        let mut store = store();
        store.update(&Observation::new("A", 1, ts(0))).unwrap();
        store.update(&Observation::new("A", 2, ts(60 * 24 * 8))).unwrap();
        assert_eq!(store.entry("A").unwrap().history_len(), 1);
    }

    #[test]
    fn test_drain_pending_orders_by_timestamp() {
        let mut store = store();
        let accepted = store.enqueue(vec![
            Observation::new("B", 3, ts(10)),
            Observation::new("A", 2, ts(5)),
            Observation::new("B", 1, ts(0)),
            Observation::new("A", -1, ts(0)),
        ]);
        assert_eq!(accepted, 3);

        let drained = store.drain_pending();
        assert_eq!(store.pending_len(), 0);
        let b: Vec<i64> = drained["B"].iter().map(|o| o.count).collect();
        assert_eq!(b, vec![1, 3]);
        assert_eq!(drained.keys().cloned().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn test_refit_uses_history() {
        let mut config = EngineConfig::default();
        config.preprocess.winsorize = false;
        config.smoothing.hyperparameter_search = false;
        let mut store = ModelStore::new(Arc::new(config));
        for (i, c) in [100, 105, 110, 120, 125].iter().enumerate() {
            store.update(&Observation::new("A", *c, ts(i as i64 * 5))).unwrap();
        }
        store.refit("A").unwrap();

        let entry = store.entry("A").unwrap();
        assert!((entry.model().forecast(1) - 130.9720352).abs() < 1e-6);
        assert_eq!(entry.state().data_points_processed, 5);
        assert_eq!(entry.meta().refits, 1);
    }

    #[test]
    fn test_refit_with_search_selects_from_grid() {
        let mut store = store();
        for i in 0..12 {
            store
                .update(&Observation::new("A", 20 + i * 3, ts(i * 5)))
                .unwrap();
        }
        let selection = store.refit("A").unwrap();
        assert!(selection.evaluated > 0);
        assert_eq!(store.get("A").unwrap().mode, SmoothingMode::Smoothing);
    }

    fn ramp_state(points: usize) -> ModelState {
        let values: Vec<f64> = (0..points).map(|i| 40.0 + 2.0 * i as f64).collect();
        let mut model =
            DampedHolt::fit(&values, crate::config::Coefficients::default(), None).unwrap();
        model.update(values[points - 1] + 2.0, ts(0));
        model.state().clone()
    }

    #[test]
    fn test_refit_keeps_hydrated_state_on_short_history() {
        let mut config = EngineConfig::default();
        config.preprocess.log1p = false;
        config.smoothing.hyperparameter_search = false;
        let mut store = ModelStore::new(Arc::new(config));
        let hydrated = ramp_state(30);
        store.hydrate(vec![("LAB".to_string(), hydrated.clone())]);

        store.update(&Observation::new("LAB", 102, ts(5))).unwrap();
        let err = store.refit("LAB").unwrap_err();
        assert!(err.is_degraded_mode_trigger());

        let state = store.get("LAB").unwrap();
        assert_eq!(state.mode, SmoothingMode::Smoothing);
        assert_eq!(state.rmse, hydrated.rmse);
        assert!(state.trend > 1.0);
        assert_eq!(state.data_points_processed, hydrated.data_points_processed + 1);
        assert_eq!(store.entry("LAB").unwrap().meta().refits, 0);
    }

    #[test]
    fn test_refit_after_long_gap_keeps_model() {
        let mut config = EngineConfig::default();
        config.preprocess.winsorize = false;
        config.smoothing.hyperparameter_search = false;
        let mut store = ModelStore::new(Arc::new(config));
        for i in 0..6 {
            store.update(&Observation::new("A", 20 + i * 2, ts(i * 5))).unwrap();
        }
        store.refit("A").unwrap();

        // Eight days later the lookback window only holds the new point.
        store
            .update(&Observation::new("A", 40, ts(8 * 24 * 60)))
            .unwrap();
        assert_eq!(store.entry("A").unwrap().history_len(), 1);
        assert!(matches!(
            store.refit("A"),
            Err(ForecastError::InsufficientHistory { required: 3, available: 1, .. })
        ));
        assert_eq!(store.get("A").unwrap().mode, SmoothingMode::Smoothing);
    }

    #[test]
    fn test_refit_unknown_zone() {
        let mut store = store();
        assert!(matches!(store.refit("X"), Err(ForecastError::ModelNotFound(_))));
    }

    #[test]
    fn test_eviction_prefers_stale_dynamic_zones() {
        let config = EngineConfig {
            store: crate::config::StoreConfig {
                max_zones: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut store = ModelStore::new(Arc::new(config));
        store.upsert(Zone::new("CAT", "Catalog", Some(10)));
        store.update(&Observation::new("OLD", 1, ts(0))).unwrap();
        store.update(&Observation::new("NEW", 1, ts(10))).unwrap();

        store.update(&Observation::new("NEXT", 1, ts(20))).unwrap();
        assert_eq!(store.len(), 3);
        assert!(store.contains("CAT"));
        assert!(!store.contains("OLD"));
        assert!(store.contains("NEXT"));
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut store = store();
        store.upsert(Zone::new("LIB", "Library", Some(300)));
        for i in 0..6 {
            store.update(&Observation::new("LIB", 50 + i, ts(i * 5))).unwrap();
        }
        let bytes = store.snapshot().to_bytes().unwrap();

        let mut restored = ModelStore::new(Arc::new(EngineConfig::default()));
        let count = restored.restore(StoreCheckpoint::from_bytes(&bytes).unwrap());
        assert_eq!(count, 1);
        assert_eq!(restored.get("LIB").unwrap(), store.get("LIB").unwrap());
        assert_eq!(restored.entry("LIB").unwrap().zone.capacity, Some(300));

        // Ordering survives the restore.
        let stale = restored.update(&Observation::new("LIB", 1, ts(0))).unwrap();
        assert_eq!(&stale, store.get("LIB").unwrap());
    }

    #[test]
    fn test_hydrate_installs_states() {
        let mut source = store();
        for i in 0..4 {
            source.update(&Observation::new("A", 10 + i, ts(i * 5))).unwrap();
        }
        let state = source.get("A").unwrap().clone();

        let mut store = store();
        store.upsert(Zone::new("A", "Atrium", Some(80)));
        assert_eq!(store.hydrate(vec![("A".to_string(), state.clone())]), 1);
        assert_eq!(store.get("A").unwrap(), &state);
        assert!(!store.entry("A").unwrap().meta().dynamic);
    }
}

//! Short-lived cache of published prediction batches.
//!
//! Batches are keyed by their creation time rounded to the nearest bucket
//! (5 minutes by default). At most `max_buckets` are kept; the oldest is
//! evicted first. Publishing into an existing bucket replaces its batch.

use crate::config::CacheConfig;
use crate::metrics;
use crate::types::Prediction;
use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::BTreeMap;

/// A cached batch and how old it was when read.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPredictions {
    pub bucket: DateTime<Utc>,
    pub predictions: Vec<Prediction>,
    pub age_minutes: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
pub struct PredictionCache {
    buckets: BTreeMap<DateTime<Utc>, Vec<Prediction>>,
    config: CacheConfig,
    stats: CacheStats,
}

impl PredictionCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            buckets: BTreeMap::new(),
            config,
            stats: CacheStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// `at` rounded to the nearest bucket boundary.
    pub fn bucket_key(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let width = Duration::minutes(self.config.bucket_minutes.max(1) as i64);
        at.duration_round(width).unwrap_or(at)
    }

    /// Store a batch under the bucket for `created_at`.
    pub fn publish(&mut self, created_at: DateTime<Utc>, predictions: Vec<Prediction>) {
        let key = self.bucket_key(created_at);
        self.buckets.insert(key, predictions);

        while self.buckets.len() > self.config.max_buckets.max(1) {
            if self.buckets.pop_first().is_some() {
                self.stats.evictions += 1;
            }
        }
    }

    /// The freshest batch if it is at most `max_age_minutes` old at `now`.
    pub fn get(&mut self, max_age_minutes: i64, now: DateTime<Utc>) -> Option<CachedPredictions> {
        let hit = self.buckets.last_key_value().and_then(|(bucket, predictions)| {
            let age_minutes = (now - *bucket).num_minutes().max(0);
            (age_minutes <= max_age_minutes).then(|| CachedPredictions {
                bucket: *bucket,
                predictions: predictions.clone(),
                age_minutes,
            })
        });

        if hit.is_some() {
            self.stats.hits += 1;
            metrics::CACHE_HITS.inc();
        } else {
            self.stats.misses += 1;
            metrics::CACHE_MISSES.inc();
        }
        hit
    }
}

//! Upstream occupancy feeds.
//!
//! The cycle runner and the poller only see [`ObservationSource`]. The HTTP
//! source expects a JSON array of `{zone_id, count, timestamp}` records;
//! malformed records are rejected one by one without failing the fetch.

use crate::config::{SourceConfig, backoff_ms};
use crate::error::{ForecastError, RejectReason, Result};
use crate::metrics;
use crate::types::Observation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Observations available since the last fetch.
    async fn fetch(&self) -> Result<Vec<Observation>>;

    fn name(&self) -> &str {
        "source"
    }
}

/// Wire record. `count` stays loose so non-numeric values can be rejected
/// individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub zone_id: String,
    pub count: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ObservationRecord {
    pub fn into_observation(self) -> Result<Observation> {
        match self.count.as_ref().and_then(|v| v.as_f64()) {
            Some(raw) => Observation::from_raw(&self.zone_id, raw, self.timestamp),
            None => Err(ForecastError::InvalidObservation {
                zone_id: self.zone_id,
                reason: RejectReason::NonNumeric,
            }),
        }
    }
}

impl From<&Observation> for ObservationRecord {
    fn from(obs: &Observation) -> Self {
        Self {
            zone_id: obs.zone_id.clone(),
            count: Some(serde_json::Value::from(obs.count)),
            timestamp: obs.timestamp,
        }
    }
}

/// Keep the valid records, counting and logging the rest.
pub fn accept_records(records: Vec<ObservationRecord>) -> Vec<Observation> {
    records
        .into_iter()
        .filter_map(|record| match record.into_observation() {
            Ok(obs) => Some(obs),
            Err(e) => {
                metrics::OBSERVATIONS_REJECTED.inc();
                warn!(error = %e, "rejected upstream record");
                None
            }
        })
        .collect()
}

pub struct HttpObservationSource {
    client: reqwest::Client,
    url: String,
    config: SourceConfig,
}

impl HttpObservationSource {
    pub fn new(url: impl Into<String>, config: SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| ForecastError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            config,
        })
    }

    async fn fetch_once(&self) -> std::result::Result<Vec<ObservationRecord>, String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("upstream returned {}", response.status()));
        }

        response
            .json::<Vec<ObservationRecord>>()
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ObservationSource for HttpObservationSource {
    async fn fetch(&self) -> Result<Vec<Observation>> {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            match self.fetch_once().await {
                Ok(records) => {
                    debug!(url = %self.url, records = records.len(), "fetched observations");
                    return Ok(accept_records(records));
                }
                Err(e) => {
                    warn!(attempt, url = %self.url, error = %e, "observation fetch failed");
                    last_error = e;
                }
            }

            if attempt < self.config.max_retries {
                let base = backoff_ms(self.config.retry_base_delay_ms, attempt);
                let jitter = fastrand::u64(0..=base / 2);
                tokio::time::sleep(Duration::from_millis(base.saturating_add(jitter))).await;
            }
        }

        Err(ForecastError::UpstreamFetchFailure(last_error))
    }

    fn name(&self) -> &str {
        &self.url
    }
}

/// In-memory source that hands out queued batches in order. Can be told to
/// fail or stall, which is how the tests drive the skip-tick path.
#[derive(Debug, Default)]
pub struct StaticSource {
    batches: Mutex<VecDeque<Vec<Observation>>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, batch: Vec<Observation>) {
        if let Ok(mut batches) = self.batches.lock() {
            batches.push_back(batch);
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut d) = self.delay.lock() {
            *d = delay;
        }
    }
}

#[async_trait]
impl ObservationSource for StaticSource {
    async fn fetch(&self) -> Result<Vec<Observation>> {
        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ForecastError::UpstreamFetchFailure(
                "static source set to fail".into(),
            ));
        }
        let batch = self
            .batches
            .lock()
            .map_err(|_| ForecastError::UpstreamFetchFailure("source lock poisoned".into()))?
            .pop_front();
        Ok(batch.unwrap_or_default())
    }

    fn name(&self) -> &str {
        "static"
    }
}

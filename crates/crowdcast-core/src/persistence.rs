//! Durable storage for model states and published predictions.
//!
//! Writes never sit on the forecasting path. Callers hand records to a
//! [`PersistenceQueue`], a bounded channel drained by one tokio worker that
//! retries with exponential backoff and gives up quietly. A full queue drops
//! the record and counts it.

use crate::algo::smoothing::ModelState;
use crate::config::{PersistenceConfig, backoff_ms};
use crate::error::{ForecastError, Result};
use crate::metrics;
use crate::types::Prediction;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Storage backend for the store and the cycle runner.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn save_model_state(&self, zone_id: &str, state: &ModelState) -> Result<()>;

    async fn load_model_state(&self, zone_id: &str) -> Result<Option<ModelState>>;

    /// Zones with a stored state, including ones the catalog never listed.
    /// Sinks that cannot enumerate return nothing.
    async fn persisted_zone_ids(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn save_prediction(&self, prediction: &Prediction) -> Result<()>;
}

/// One unit of work for the persistence worker.
#[derive(Debug, Clone)]
pub enum PersistCommand {
    ModelState { zone_id: String, state: ModelState },
    Prediction(Prediction),
}

impl PersistCommand {
    fn kind(&self) -> &'static str {
        match self {
            Self::ModelState { .. } => "model_state",
            Self::Prediction(_) => "prediction",
        }
    }
}

#[derive(Debug, Default)]
pub struct PersistenceStats {
    pub written: AtomicU64,
    pub failed: AtomicU64,
    pub retried: AtomicU64,
    pub dropped: AtomicU64,
}

/// Handle to the background writer. Cheap to clone.
#[derive(Clone)]
pub struct PersistenceQueue {
    tx: mpsc::Sender<PersistCommand>,
    stats: Arc<PersistenceStats>,
    persist_predictions: bool,
}

impl PersistenceQueue {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(sink: Arc<dyn PersistenceSink>, config: PersistenceConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let stats = Arc::new(PersistenceStats::default());
        let stats_clone = stats.clone();
        let persist_predictions = config.persist_predictions;

        tokio::spawn(async move {
            Self::worker(rx, sink, config, stats_clone).await;
        });

        Self {
            tx,
            stats,
            persist_predictions,
        }
    }

    pub fn stats(&self) -> &PersistenceStats {
        &self.stats
    }

    /// Enqueue without waiting. Returns false when the record was dropped.
    pub fn submit(&self, command: PersistCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(command)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::PERSISTENCE_DROPPED.inc();
                warn!(kind = command.kind(), "persistence queue full, dropping record");
                false
            }
            Err(mpsc::error::TrySendError::Closed(command)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::PERSISTENCE_DROPPED.inc();
                warn!(kind = command.kind(), "persistence worker stopped, dropping record");
                false
            }
        }
    }

    pub fn save_model_state(&self, zone_id: &str, state: ModelState) -> bool {
        self.submit(PersistCommand::ModelState {
            zone_id: zone_id.to_string(),
            state,
        })
    }

    pub fn save_prediction(&self, prediction: Prediction) -> bool {
        if !self.persist_predictions {
            return true;
        }
        self.submit(PersistCommand::Prediction(prediction))
    }

    async fn worker(
        mut rx: mpsc::Receiver<PersistCommand>,
        sink: Arc<dyn PersistenceSink>,
        config: PersistenceConfig,
        stats: Arc<PersistenceStats>,
    ) {
        info!(capacity = config.channel_capacity, "persistence worker started");

        while let Some(command) = rx.recv().await {
            Self::write_with_retry(sink.as_ref(), &command, &config, &stats).await;
        }

        info!("persistence worker stopped");
    }

    async fn write_with_retry(
        sink: &dyn PersistenceSink,
        command: &PersistCommand,
        config: &PersistenceConfig,
        stats: &PersistenceStats,
    ) {
        let timeout = Duration::from_millis(config.write_timeout_ms);

        for attempt in 0..=config.max_retries {
            let write = async {
                match command {
                    PersistCommand::ModelState { zone_id, state } => {
                        sink.save_model_state(zone_id, state).await
                    }
                    PersistCommand::Prediction(p) => sink.save_prediction(p).await,
                }
            };

            match tokio::time::timeout(timeout, write).await {
                Ok(Ok(())) => {
                    stats.written.fetch_add(1, Ordering::Relaxed);
                    metrics::PERSISTENCE_WRITTEN.inc();
                    debug!(kind = command.kind(), "persisted record");
                    return;
                }
                Ok(Err(e)) => {
                    warn!(attempt, kind = command.kind(), error = %e, "persistence write failed");
                }
                Err(_) => {
                    warn!(attempt, kind = command.kind(), timeout_ms = config.write_timeout_ms, "persistence write timed out");
                }
            }

            if attempt < config.max_retries {
                stats.retried.fetch_add(1, Ordering::Relaxed);
                let delay = backoff_ms(config.retry_base_delay_ms, attempt);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        stats.failed.fetch_add(1, Ordering::Relaxed);
        metrics::PERSISTENCE_FAILED.inc();
        error!(kind = command.kind(), "gave up persisting record after max retries");
    }
}

/// In-process sink. Used when no durable storage is configured and by
/// tests, which can flip it into a failing state.
#[derive(Debug, Default)]
pub struct MemorySink {
    states: Mutex<HashMap<String, ModelState>>,
    predictions: Mutex<Vec<Prediction>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call return `PersistenceFailure`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn state_count(&self) -> usize {
        self.states.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn predictions(&self) -> Vec<Prediction> {
        self.predictions
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ForecastError::PersistenceFailure(
                "memory sink set to fail".into(),
            ));
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> ForecastError {
    ForecastError::PersistenceFailure("memory sink lock poisoned".into())
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn save_model_state(&self, zone_id: &str, state: &ModelState) -> Result<()> {
        self.check()?;
        self.states
            .lock()
            .map_err(poisoned)?
            .insert(zone_id.to_string(), state.clone());
        Ok(())
    }

    async fn load_model_state(&self, zone_id: &str) -> Result<Option<ModelState>> {
        self.check()?;
        Ok(self.states.lock().map_err(poisoned)?.get(zone_id).cloned())
    }

    async fn persisted_zone_ids(&self) -> Result<Vec<String>> {
        self.check()?;
        let mut ids: Vec<String> = self.states.lock().map_err(poisoned)?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn save_prediction(&self, prediction: &Prediction) -> Result<()> {
        self.check()?;
        self.predictions.lock().map_err(poisoned)?.push(prediction.clone());
        Ok(())
    }
}

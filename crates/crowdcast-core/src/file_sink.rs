//! Filesystem persistence.
//!
//! Model states live in one bincode checkpoint (`models.bin`), rewritten
//! through a temp file and rename on every save. Predictions are appended as
//! JSON lines to hourly files (`predictions_YYYYMMDDHH.jsonl`) by a
//! dedicated writer thread.

use crate::algo::smoothing::ModelState;
use crate::checkpoint::{StoreCheckpoint, ZoneCheckpoint};
use crate::error::{ForecastError, Result};
use crate::persistence::PersistenceSink;
use crate::types::Prediction;
use async_trait::async_trait;
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use tracing::{error, info, warn};

pub const MODELS_FILE: &str = "models.bin";
const WRITER_BACKLOG: usize = 65_536;

pub struct FileSink {
    dir: PathBuf,
    states: Mutex<BTreeMap<String, ModelState>>,
    predictions_tx: Option<Sender<String>>,
    writer: Option<thread::JoinHandle<()>>,
}

impl FileSink {
    /// Open (or create) a data directory and load any existing checkpoint.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let models_path = dir.join(MODELS_FILE);
        let mut states = BTreeMap::new();
        if models_path.exists() {
            let bytes = std::fs::read(&models_path)?;
            let checkpoint = StoreCheckpoint::from_bytes(&bytes)?;
            for row in checkpoint.zones {
                states.insert(row.zone_id, row.state);
            }
            info!(zones = states.len(), path = %models_path.display(), "loaded model checkpoint");
        }

        let (tx, rx) = crossbeam_channel::bounded(WRITER_BACKLOG);
        let writer = PredictionWriter::spawn(dir.clone(), rx)?;

        Ok(Self {
            dir,
            states: Mutex::new(states),
            predictions_tx: Some(tx),
            writer: Some(writer),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn checkpoint_bytes(&self) -> Result<Vec<u8>> {
        let states = self.states.lock().map_err(poisoned)?;
        let rows = states
            .iter()
            .map(|(zone_id, state)| ZoneCheckpoint {
                zone_id: zone_id.clone(),
                zone: None,
                state: state.clone(),
            })
            .collect();
        StoreCheckpoint::new(rows).to_bytes()
    }
}

fn poisoned<T>(_: T) -> ForecastError {
    ForecastError::PersistenceFailure("file sink lock poisoned".into())
}

/// Atomic replace: write next to the target, then rename over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("bin.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

#[async_trait]
impl PersistenceSink for FileSink {
    async fn save_model_state(&self, zone_id: &str, state: &ModelState) -> Result<()> {
        self.states
            .lock()
            .map_err(poisoned)?
            .insert(zone_id.to_string(), state.clone());

        let bytes = self.checkpoint_bytes()?;
        let path = self.dir.join(MODELS_FILE);
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| ForecastError::PersistenceFailure(e.to_string()))??;
        Ok(())
    }

    async fn load_model_state(&self, zone_id: &str) -> Result<Option<ModelState>> {
        Ok(self.states.lock().map_err(poisoned)?.get(zone_id).cloned())
    }

    async fn persisted_zone_ids(&self) -> Result<Vec<String>> {
        Ok(self.states.lock().map_err(poisoned)?.keys().cloned().collect())
    }

    async fn save_prediction(&self, prediction: &Prediction) -> Result<()> {
        let mut line = serde_json::to_string(prediction)
            .map_err(|e| ForecastError::PersistenceFailure(e.to_string()))?;
        line.push('\n');

        let tx = self
            .predictions_tx
            .as_ref()
            .ok_or_else(|| ForecastError::PersistenceFailure("prediction writer closed".into()))?;
        match tx.try_send(line) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ForecastError::PersistenceFailure(
                "prediction writer backlog full".into(),
            )),
            Err(TrySendError::Disconnected(_)) => Err(ForecastError::PersistenceFailure(
                "prediction writer stopped".into(),
            )),
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        // Closing the channel lets the writer flush and exit.
        self.predictions_tx.take();
        if let Some(handle) = self.writer.take() {
            if handle.join().is_err() {
                error!("prediction writer thread panicked");
            }
        }
    }
}

struct PredictionWriter;

impl PredictionWriter {
    fn spawn(dir: PathBuf, rx: Receiver<String>) -> Result<thread::JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("crowdcast-predictions".into())
            .spawn(move || Self::run(&dir, rx))?;
        Ok(handle)
    }

    fn run(dir: &Path, rx: Receiver<String>) {
        let mut current_hour = String::new();
        let mut buffer: Option<BufWriter<File>> = None;

        info!(dir = %dir.display(), "prediction writer active");

        while let Ok(line) = rx.recv() {
            let now_hour = Utc::now().format("%Y%m%d%H").to_string();
            if now_hour != current_hour || buffer.is_none() {
                if let Some(mut old) = buffer.take() {
                    let _ = old.flush();
                }
                current_hour = now_hour;
                match Self::open_segment(dir, &current_hour) {
                    Ok(writer) => buffer = Some(writer),
                    Err(e) => {
                        error!(error = %e, hour = %current_hour, "failed to open prediction log");
                        continue;
                    }
                }
            }

            if let Some(writer) = buffer.as_mut() {
                if let Err(e) = writer.write_all(line.as_bytes()) {
                    warn!(error = %e, "failed to append prediction");
                }
                // Flush whenever the backlog drains so readers see whole batches.
                if rx.is_empty() {
                    let _ = writer.flush();
                }
            }
        }

        if let Some(mut writer) = buffer {
            let _ = writer.flush();
        }
        info!("prediction writer stopped");
    }

    fn open_segment(dir: &Path, hour: &str) -> std::io::Result<BufWriter<File>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment_path(dir, hour))?;
        Ok(BufWriter::with_capacity(128 * 1024, file))
    }
}

pub fn segment_path(dir: &Path, hour: &str) -> PathBuf {
    dir.join(format!("predictions_{}.jsonl", hour))
}

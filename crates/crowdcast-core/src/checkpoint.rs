//! Binary snapshots of model state.
//!
//! Used by the file sink for its model table and by the store for whole
//! snapshot/restore. Snapshots are last-write-wins; there is no history.

use crate::algo::smoothing::ModelState;
use crate::error::{ForecastError, Result};
use crate::types::Zone;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version for checkpoint format migrations
pub const CHECKPOINT_VERSION: u32 = 1;

/// One zone's persisted row. `zone` is absent when the writer only knew
/// the identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneCheckpoint {
    pub zone_id: String,
    pub zone: Option<Zone>,
    pub state: ModelState,
}

/// Full checkpoint containing every zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreCheckpoint {
    /// Format version
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub zones: Vec<ZoneCheckpoint>,
}

impl StoreCheckpoint {
    pub fn new(zones: Vec<ZoneCheckpoint>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            created_at: Utc::now(),
            zones,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ForecastError::Checkpoint(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let checkpoint: StoreCheckpoint =
            bincode::deserialize(bytes).map_err(|e| ForecastError::Checkpoint(e.to_string()))?;

        if checkpoint.version > CHECKPOINT_VERSION {
            return Err(ForecastError::UnsupportedCheckpointVersion {
                found: checkpoint.version,
                max_supported: CHECKPOINT_VERSION,
            });
        }

        Ok(checkpoint)
    }

    pub fn find(&self, zone_id: &str) -> Option<&ZoneCheckpoint> {
        self.zones.iter().find(|z| z.zone_id == zone_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::smoothing::DampedHolt;
    use crate::config::Coefficients;

    fn sample() -> ZoneCheckpoint {
        let model = DampedHolt::fit(&[3.0, 5.0, 8.0, 9.0], Coefficients::default(), None).unwrap();
        ZoneCheckpoint {
            zone_id: "LIB".into(),
            zone: Some(Zone::new("LIB", "Main Library", Some(400)).with_kind("library")),
            state: model.state().clone(),
        }
    }

    #[test]
    fn test_checkpoint_serialization() {
        let checkpoint = StoreCheckpoint::new(vec![sample()]);
        let bytes = checkpoint.to_bytes().unwrap();
        let restored = StoreCheckpoint::from_bytes(&bytes).unwrap();

        assert_eq!(restored.version, CHECKPOINT_VERSION);
        assert_eq!(restored.zones, checkpoint.zones);
        assert!(restored.find("LIB").is_some());
        assert!(restored.find("GYM").is_none());
    }

    #[test]
    fn test_version_check() {
        let mut checkpoint = StoreCheckpoint::empty();
        checkpoint.version = 999;

        let bytes = bincode::serialize(&checkpoint).unwrap();
        let result = StoreCheckpoint::from_bytes(&bytes);

        assert!(matches!(
            result,
            Err(ForecastError::UnsupportedCheckpointVersion { found: 999, .. })
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            StoreCheckpoint::from_bytes(&[0xde, 0xad]),
            Err(ForecastError::Checkpoint(_))
        ));
    }
}

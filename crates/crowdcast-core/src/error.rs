//! Error taxonomy for the forecasting core.
//!
//! Only a few of these ever reach a caller. `InsufficientHistory` and
//! `ModelNotFound` are mostly degraded-mode triggers that the store and the
//! cycle runner resolve internally; `PersistenceFailure` is logged and
//! swallowed by the persistence queue.

use std::fmt;

/// Result type for forecasting operations
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Which boundary rejected an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NegativeCount,
    NonNumeric,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NegativeCount => write!(f, "count must be non-negative"),
            Self::NonNumeric => write!(f, "count is not a finite number"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("invalid observation for zone {zone_id}: {reason}")]
    InvalidObservation {
        zone_id: String,
        reason: RejectReason,
    },

    #[error("insufficient history for zone {zone_id}: need {required} points, have {available}")]
    InsufficientHistory {
        zone_id: String,
        required: usize,
        available: usize,
    },

    #[error("no model registered for zone {0}")]
    ModelNotFound(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("upstream fetch failure: {0}")]
    UpstreamFetchFailure(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("unsupported checkpoint version {found} (max supported: {max_supported})")]
    UnsupportedCheckpointVersion { found: u32, max_supported: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ForecastError {
    pub fn insufficient(zone_id: &str, required: usize, available: usize) -> Self {
        Self::InsufficientHistory {
            zone_id: zone_id.to_string(),
            required,
            available,
        }
    }

    /// Whether this error should push the caller into degraded mode rather
    /// than fail the request.
    pub fn is_degraded_mode_trigger(&self) -> bool {
        matches!(
            self,
            Self::InsufficientHistory { .. } | Self::ModelNotFound(_)
        )
    }
}

//! crowdcast-core: per-zone occupancy forecasting.
//!
//! ```text
//! ┌────────────┐   fetch    ┌──────────────┐  drain   ┌──────────────────────┐
//! │ Observation│ ─────────► │ pending queue│ ───────► │ ModelStore           │
//! │ Source     │  (Poller)  └──────────────┘          │  zone ─► DampedHolt  │
//! └────────────┘                                      │        + history     │
//!                                                     └──────────┬───────────┘
//!                       CycleRunner (Scheduler, fixed delay)     │ forecast
//!                                                                ▼
//!        ┌───────────────┐   publish   ┌──────────────────┐  clamp/blend
//!        │PredictionCache│ ◄────────── │ Vec<Prediction>  │ ◄────────────
//!        └───────────────┘             └────────┬─────────┘
//!                                               │ fire-and-forget
//!                                               ▼
//!                                      PersistenceQueue ─► PersistenceSink
//! ```

pub mod algo;
pub mod cache;
pub mod catalog;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod file_sink;
pub mod forecast;
pub mod metrics;
pub mod persistence;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod types;

pub use cache::{CachedPredictions, PredictionCache};
pub use catalog::ZoneCatalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use cycle::{CycleOutcome, CycleReport, CycleRunner, CycleState, Poller};
pub use engine::Forecaster;
pub use error::{ForecastError, Result};
pub use file_sink::FileSink;
pub use persistence::{MemorySink, PersistenceQueue, PersistenceSink};
pub use scheduler::{Scheduler, Task};
pub use source::{HttpObservationSource, ObservationRecord, ObservationSource, StaticSource};
pub use store::ModelStore;
pub use types::{ConfidenceInterval, ModelKind, ModelTag, Observation, Prediction, Zone};

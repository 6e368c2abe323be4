//! # crowdcast-sim
//!
//! Synthetic occupancy feed for exercising the forecasting engine without a
//! real sensor network.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      CampusSimulator                          │
//! │                                                               │
//! │   Zone ─► DiurnalProfile (kind) ─► fraction × capacity        │
//! │                                        │                      │
//! │                              + Normal noise, clamp            │
//! │                                        ▼                      │
//! │                              Vec<Observation> per step        │
//! └───────────────────────┬──────────────────────────────────────┘
//!                         │
//!          ┌──────────────┼─────────────────────┐
//!          ▼              ▼                     ▼
//!   SimulatedSource   generate (JSONL)    serve (GET /observations)
//!   (in-process,                           polled by forecastd
//!    drives ManualClock)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use crowdcast_sim::{CampusSimulator, SimConfig};
//!
//! let mut sim = CampusSimulator::campus(SimConfig::default(), Utc::now()).unwrap();
//! for obs in sim.step() {
//!     println!("{} {}", obs.zone_id, obs.count);
//! }
//! ```

pub mod campus;
pub mod source;

pub use campus::{CampusSimulator, DiurnalProfile, SimConfig, default_campus};
pub use source::SimulatedSource;

use crate::campus::CampusSimulator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crowdcast_core::{ForecastError, ManualClock, Observation, ObservationSource, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Feeds the engine from a [`CampusSimulator`]. Every fetch advances
/// simulated time by one step, outage or not, and drags the optional
/// engine clock along with it.
pub struct SimulatedSource {
    sim: Mutex<CampusSimulator>,
    clock: Option<Arc<ManualClock>>,
}

impl SimulatedSource {
    pub fn new(sim: CampusSimulator) -> Self {
        Self {
            sim: Mutex::new(sim),
            clock: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<ManualClock>) -> Self {
        clock.set(self.lock().now());
        self.clock = Some(clock);
        self
    }

    fn lock(&self) -> MutexGuard<'_, CampusSimulator> {
        self.sim.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.lock().now()
    }
}

#[async_trait]
impl ObservationSource for SimulatedSource {
    async fn fetch(&self) -> Result<Vec<Observation>> {
        let mut sim = self.lock();
        let at = sim.advance();
        if let Some(clock) = &self.clock {
            clock.set(at);
        }

        if sim.outage() {
            return Err(ForecastError::UpstreamFetchFailure(format!(
                "simulated outage at {}",
                at
            )));
        }

        let batch = sim.sample_at(at);
        debug!(at = %at, observations = batch.len(), "simulated fetch");
        Ok(batch)
    }

    fn name(&self) -> &str {
        "simulator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campus::SimConfig;
    use chrono::{Duration, TimeZone};
    use crowdcast_core::Clock;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 6, 9, 0, 0).unwrap()
    }

    fn sim(outage_probability: f64) -> CampusSimulator {
        let config = SimConfig {
            seed: Some(11),
            outage_probability,
            ..SimConfig::default()
        };
        CampusSimulator::campus(config, start()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_moves_clock() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let source = SimulatedSource::new(sim(0.0)).with_clock(clock.clone());
        assert_eq!(clock.now(), start());

        let batch = source.fetch().await.unwrap();
        assert!(!batch.is_empty());
        assert_eq!(clock.now(), start() + Duration::minutes(5));
        assert_eq!(source.now(), clock.now());
    }

    #[tokio::test]
    async fn test_outage_is_upstream_failure() {
        let clock = Arc::new(ManualClock::new(start()));
        let source = SimulatedSource::new(sim(1.0)).with_clock(clock.clone());

        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, ForecastError::UpstreamFetchFailure(_)));
        // Time still passes during an outage.
        assert_eq!(clock.now(), start() + Duration::minutes(5));
    }
}

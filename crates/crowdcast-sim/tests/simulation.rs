use chrono::{DateTime, TimeZone, Utc};
use crowdcast_core::{CycleRunner, EngineConfig, Forecaster, ManualClock};
use crowdcast_sim::{CampusSimulator, SimConfig, SimulatedSource, default_campus};
use std::collections::HashMap;
use std::sync::Arc;

fn monday_midnight() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 6, 0, 0, 0).unwrap()
}

fn engine(config: SimConfig) -> (Forecaster, CycleRunner) {
    let sim = CampusSimulator::campus(config, monday_midnight()).unwrap();
    let catalog = sim.catalog().unwrap();
    let clock = Arc::new(ManualClock::new(sim.now()));
    let source = Arc::new(SimulatedSource::new(sim).with_clock(clock.clone()));

    let forecaster = Forecaster::new(EngineConfig::default())
        .unwrap()
        .with_clock(clock);
    forecaster.load_catalog(catalog);
    let runner = CycleRunner::new(forecaster.clone()).with_source(source);
    (forecaster, runner)
}

#[tokio::test]
async fn simulated_day_stays_within_capacity() {
    let (forecaster, mut runner) = engine(SimConfig {
        seed: Some(42),
        ..SimConfig::default()
    });

    // Midnight to 14:00, one cycle per five minutes.
    for _ in 0..(14 * 12) {
        let report = runner.run_tick().await;
        assert!(report.is_completed());
    }

    let stats = forecaster.stats();
    assert_eq!(stats.total_zones, 6);
    assert_eq!(stats.dynamic_registrations, 0);

    let capacities: HashMap<String, Option<u32>> = default_campus()
        .into_iter()
        .map(|z| (z.id, z.capacity))
        .collect();
    for horizon in [15, 60] {
        let predictions = forecaster.get_all_predictions(horizon);
        assert_eq!(predictions.len(), 6);
        for p in &predictions {
            assert!(p.predicted_count >= 0);
            if let Some(cap) = capacities[&p.zone_id] {
                assert!(p.predicted_count <= cap as i64, "{:?}", p);
            }
        }
    }

    let cached = forecaster.get_cached_predictions(10).unwrap();
    assert_eq!(cached.predictions.len(), 6 * 4);
}

#[tokio::test]
async fn outages_skip_cycles_without_losing_models() {
    let (forecaster, mut runner) = engine(SimConfig {
        seed: Some(3),
        outage_probability: 0.3,
        ..SimConfig::default()
    });

    let mut skipped = 0;
    let mut completed = 0;
    for _ in 0..60 {
        let report = runner.run_tick().await;
        if report.is_completed() {
            completed += 1;
        } else {
            skipped += 1;
        }
    }

    assert!(skipped > 0);
    assert!(completed > 0);
    assert_eq!(runner.ticks(), 60);

    let state = forecaster.model_state("CAFE").unwrap();
    assert_eq!(state.data_points_processed, completed);
}

//! Synthetic campus occupancy.
//!
//! Each zone follows a diurnal curve built from three Gaussian bumps
//! (morning, midday, afternoon) whose weights depend on the zone kind.
//! The curve is a fraction of capacity; noise is added on top and the
//! result is clamped into `[0, capacity]`.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use crowdcast_core::{ForecastError, Observation, Result, Zone, ZoneCatalog};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Zones without a capacity are simulated against this scale and left
/// unclamped above.
const UNBOUNDED_SCALE: f64 = 100.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Fixed seed for reproducible runs. Random when absent.
    pub seed: Option<u64>,
    /// Simulated minutes between two samples.
    pub step_minutes: u32,
    /// Noise standard deviation as a fraction of capacity.
    pub noise_ratio: f64,
    /// Probability that a fetch fails outright.
    pub outage_probability: f64,
    /// Offset applied to UTC before looking up the hour of day.
    pub utc_offset_hours: i32,
    /// Occupancy multiplier on Saturdays and Sundays.
    pub weekend_factor: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: None,
            step_minutes: 5,
            noise_ratio: 0.04,
            outage_probability: 0.0,
            utc_offset_hours: 0,
            weekend_factor: 0.45,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<()> {
        if self.step_minutes == 0 {
            return Err(ForecastError::Config("step_minutes must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.outage_probability) {
            return Err(ForecastError::Config(format!(
                "outage_probability {} outside [0, 1]",
                self.outage_probability
            )));
        }
        if !self.noise_ratio.is_finite() || self.noise_ratio < 0.0 {
            return Err(ForecastError::Config(format!(
                "noise_ratio {} must be a non-negative number",
                self.noise_ratio
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Peak {
    hour: f64,
    width: f64,
    height: f64,
}

impl Peak {
    const fn new(hour: f64, width: f64, height: f64) -> Self {
        Self { hour, width, height }
    }

    fn at(&self, hour: f64) -> f64 {
        let d = (hour - self.hour) / self.width;
        self.height * (-0.5 * d * d).exp()
    }
}

/// Fraction-of-capacity curve over a day.
#[derive(Debug, Clone, PartialEq)]
pub struct DiurnalProfile {
    base: f64,
    peaks: [Peak; 3],
}

impl DiurnalProfile {
    pub fn for_kind(kind: Option<&str>) -> Self {
        let (base, peaks) = match kind {
            Some("library") => (
                0.04,
                [Peak::new(10.0, 1.5, 0.35), Peak::new(13.5, 1.5, 0.45), Peak::new(16.5, 2.5, 0.75)],
            ),
            Some("dining") => (
                0.02,
                [Peak::new(8.0, 1.0, 0.35), Peak::new(12.5, 0.9, 0.9), Peak::new(18.5, 1.2, 0.6)],
            ),
            Some("gym") => (
                0.03,
                [Peak::new(7.0, 1.2, 0.55), Peak::new(12.0, 1.0, 0.25), Peak::new(18.0, 1.8, 0.85)],
            ),
            Some("lecture") => (
                0.0,
                [Peak::new(10.0, 1.3, 0.7), Peak::new(13.0, 1.0, 0.5), Peak::new(15.5, 1.5, 0.6)],
            ),
            _ => (
                0.03,
                [Peak::new(10.0, 1.5, 0.4), Peak::new(13.0, 1.5, 0.5), Peak::new(16.0, 2.0, 0.4)],
            ),
        };
        Self { base, peaks }
    }

    /// Expected occupancy fraction at `hour` (0.0..24.0), in `[0, 1]`.
    pub fn fraction(&self, hour: f64) -> f64 {
        let raw = self.base + self.peaks.iter().map(|p| p.at(hour)).sum::<f64>();
        raw.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
struct SimZone {
    zone: Zone,
    profile: DiurnalProfile,
}

impl SimZone {
    fn scale(&self) -> f64 {
        self.zone.capacity.map(f64::from).unwrap_or(UNBOUNDED_SCALE)
    }
}

/// A small campus with one zone per profile kind plus an uncatalogued-style
/// zone without a capacity.
pub fn default_campus() -> Vec<Zone> {
    vec![
        Zone::new("LIB-1", "Main Library, Floor 1", Some(220)).with_kind("library"),
        Zone::new("LIB-2", "Main Library, Floor 2", Some(160)).with_kind("library"),
        Zone::new("CAFE", "Central Cafeteria", Some(300)).with_kind("dining"),
        Zone::new("GYM", "Recreation Center", Some(120)).with_kind("gym"),
        Zone::new("HALL-A", "Lecture Hall A", Some(250)).with_kind("lecture"),
        Zone::new("COMMONS", "Student Commons", None),
    ]
}

pub struct CampusSimulator {
    zones: Vec<SimZone>,
    config: SimConfig,
    noise: Normal<f64>,
    rng: StdRng,
    now: DateTime<Utc>,
    samples: u64,
}

impl CampusSimulator {
    pub fn new(zones: Vec<Zone>, config: SimConfig, start: DateTime<Utc>) -> Result<Self> {
        config.validate()?;
        let noise = Normal::new(0.0, config.noise_ratio)
            .map_err(|e| ForecastError::Config(format!("noise distribution: {}", e)))?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(fastrand::u64(..)),
        };
        let zones = zones
            .into_iter()
            .map(|zone| {
                let profile = DiurnalProfile::for_kind(zone.kind.as_deref());
                SimZone { zone, profile }
            })
            .collect();

        Ok(Self {
            zones,
            config,
            noise,
            rng,
            now: start,
            samples: 0,
        })
    }

    pub fn campus(config: SimConfig, start: DateTime<Utc>) -> Result<Self> {
        Self::new(default_campus(), config, start)
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter().map(|z| &z.zone)
    }

    pub fn catalog(&self) -> Result<ZoneCatalog> {
        ZoneCatalog::new(self.zones().cloned().collect())
    }

    fn local_hour(&self, at: DateTime<Utc>) -> (f64, bool) {
        let local = at + Duration::hours(self.config.utc_offset_hours as i64);
        let hour = local.hour() as f64 + local.minute() as f64 / 60.0;
        let weekend = matches!(local.weekday(), Weekday::Sat | Weekday::Sun);
        (hour, weekend)
    }

    /// Noise-free occupancy for `zone_id` at `at`. `None` for unknown zones.
    pub fn expected_count(&self, zone_id: &str, at: DateTime<Utc>) -> Option<f64> {
        let zone = self.zones.iter().find(|z| z.zone.id == zone_id)?;
        Some(self.expected(zone, at))
    }

    fn expected(&self, zone: &SimZone, at: DateTime<Utc>) -> f64 {
        let (hour, weekend) = self.local_hour(at);
        let mut fraction = zone.profile.fraction(hour);
        if weekend {
            fraction *= self.config.weekend_factor;
        }
        fraction * zone.scale()
    }

    /// One noisy reading per zone, stamped `at`.
    pub fn sample_at(&mut self, at: DateTime<Utc>) -> Vec<Observation> {
        let mut batch = Vec::with_capacity(self.zones.len());
        for i in 0..self.zones.len() {
            let expected = self.expected(&self.zones[i], at);
            let zone = &self.zones[i];
            let noisy = expected + self.noise.sample(&mut self.rng) * zone.scale();
            let count = zone.zone.clamp(noisy.round() as i64);
            batch.push(Observation::new(zone.zone.id.clone(), count, at));
        }
        self.samples += 1;
        batch
    }

    /// Move simulated time forward by one step.
    pub fn advance(&mut self) -> DateTime<Utc> {
        self.now += Duration::minutes(self.config.step_minutes as i64);
        self.now
    }

    /// Advance one step and sample.
    pub fn step(&mut self) -> Vec<Observation> {
        let at = self.advance();
        self.sample_at(at)
    }

    /// Roll for an upstream outage.
    pub fn outage(&mut self) -> bool {
        self.config.outage_probability > 0.0 && self.rng.random_bool(self.config.outage_probability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn monday(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 6, hour, minute, 0).unwrap()
    }

    fn seeded() -> SimConfig {
        SimConfig {
            seed: Some(7),
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_profile_peaks_beat_night() {
        for kind in [Some("library"), Some("dining"), Some("gym"), Some("lecture"), None] {
            let profile = DiurnalProfile::for_kind(kind);
            let night = profile.fraction(3.0);
            let busiest = (0..24).map(|h| profile.fraction(h as f64)).fold(0.0, f64::max);
            assert!(busiest > night + 0.3, "{:?}", kind);
            assert!(busiest <= 1.0);
        }
    }

    #[test]
    fn test_dining_lunch_rush() {
        let profile = DiurnalProfile::for_kind(Some("dining"));
        assert!(profile.fraction(12.5) > profile.fraction(10.0));
        assert!(profile.fraction(12.5) > profile.fraction(15.0));
    }

    #[test]
    fn test_counts_stay_within_capacity() {
        let config = SimConfig {
            noise_ratio: 0.5,
            ..seeded()
        };
        let mut sim = CampusSimulator::campus(config, monday(0, 0)).unwrap();
        for _ in 0..288 {
            for obs in sim.step() {
                assert!(obs.count >= 0);
                let zone = sim.zones().find(|z| z.id == obs.zone_id).unwrap();
                if let Some(cap) = zone.capacity {
                    assert!(obs.count <= cap as i64);
                }
            }
        }
        assert_eq!(sim.samples(), 288);
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let mut a = CampusSimulator::campus(seeded(), monday(8, 0)).unwrap();
        let mut b = CampusSimulator::campus(seeded(), monday(8, 0)).unwrap();
        for _ in 0..20 {
            assert_eq!(a.step(), b.step());
        }
    }

    #[test]
    fn test_step_advances_clock() {
        let mut sim = CampusSimulator::campus(seeded(), monday(8, 0)).unwrap();
        let batch = sim.step();
        assert_eq!(batch.len(), default_campus().len());
        assert!(batch.iter().all(|o| o.timestamp == monday(8, 5)));
        assert_eq!(sim.now(), monday(8, 5));
    }

    #[test]
    fn test_weekend_is_quieter() {
        let sim = CampusSimulator::campus(seeded(), monday(0, 0)).unwrap();
        let saturday = Utc.with_ymd_and_hms(2026, 4, 11, 12, 30, 0).unwrap();
        let weekday = sim.expected_count("CAFE", monday(12, 30)).unwrap();
        let weekend = sim.expected_count("CAFE", saturday).unwrap();
        assert!(weekend < weekday);
        assert!(sim.expected_count("NOPE", saturday).is_none());
    }

    #[test]
    fn test_utc_offset_shifts_peak() {
        let config = SimConfig {
            utc_offset_hours: -5,
            ..seeded()
        };
        let shifted = CampusSimulator::campus(config, monday(0, 0)).unwrap();
        let plain = CampusSimulator::campus(seeded(), monday(0, 0)).unwrap();
        // 17:30 UTC is 12:30 local five hours behind.
        let at = monday(17, 30);
        let lunch = plain.expected_count("CAFE", monday(12, 30)).unwrap();
        assert!((shifted.expected_count("CAFE", at).unwrap() - lunch).abs() < 1e-9);
    }

    #[test]
    fn test_outage_probability_bounds() {
        let never = SimConfig {
            outage_probability: 0.0,
            ..seeded()
        };
        let mut sim = CampusSimulator::campus(never, monday(0, 0)).unwrap();
        assert!((0..100).all(|_| !sim.outage()));

        let always = SimConfig {
            outage_probability: 1.0,
            ..seeded()
        };
        let mut sim = CampusSimulator::campus(always, monday(0, 0)).unwrap();
        assert!((0..100).all(|_| sim.outage()));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad = SimConfig {
            outage_probability: 1.5,
            ..SimConfig::default()
        };
        assert!(CampusSimulator::campus(bad, monday(0, 0)).is_err());

        let bad = SimConfig {
            step_minutes: 0,
            ..SimConfig::default()
        };
        assert!(matches!(
            CampusSimulator::campus(bad, monday(0, 0)),
            Err(ForecastError::Config(_))
        ));
    }

    #[test]
    fn test_catalog_matches_zones() {
        let sim = CampusSimulator::campus(seeded(), monday(0, 0)).unwrap();
        let catalog = sim.catalog().unwrap();
        assert_eq!(catalog.len(), default_campus().len());
        assert_eq!(catalog.get("GYM").unwrap().capacity, Some(120));
    }
}

//! Records exchanged with the outside world: zones, observations and
//! published predictions.

use crate::error::{ForecastError, RejectReason, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A monitored spatial unit (building, floor, area).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Maximum occupancy. `None` means unknown, treated as unbounded.
    #[serde(default)]
    pub capacity: Option<u32>,
    /// Only used to seed default smoothing coefficients.
    #[serde(default)]
    pub kind: Option<String>,
}

impl Zone {
    pub fn new(id: impl Into<String>, name: impl Into<String>, capacity: Option<u32>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capacity,
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Fallback zone for identifiers the catalog never listed.
    pub fn unlisted(id: &str, default_capacity: Option<u32>) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            capacity: default_capacity,
            kind: None,
        }
    }

    /// Clamp a count into `[0, capacity]`.
    pub fn clamp(&self, count: i64) -> i64 {
        let floored = count.max(0);
        match self.capacity {
            Some(cap) => floored.min(cap as i64),
            None => floored,
        }
    }
}

/// A single occupancy reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub zone_id: String,
    pub count: i64,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn new(zone_id: impl Into<String>, count: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            zone_id: zone_id.into(),
            count,
            timestamp,
        }
    }

    /// Build from a raw numeric reading, rejecting non-finite and negative
    /// values at the boundary.
    pub fn from_raw(zone_id: &str, raw: f64, timestamp: DateTime<Utc>) -> Result<Self> {
        if !raw.is_finite() {
            return Err(ForecastError::InvalidObservation {
                zone_id: zone_id.to_string(),
                reason: RejectReason::NonNumeric,
            });
        }
        let obs = Self::new(zone_id, raw.round() as i64, timestamp);
        obs.validate()?;
        Ok(obs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.count < 0 {
            return Err(ForecastError::InvalidObservation {
                zone_id: self.zone_id.clone(),
                reason: RejectReason::NegativeCount,
            });
        }
        Ok(())
    }
}

/// Which model path produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTag {
    pub kind: ModelKind,
    pub seasonal: bool,
    pub log1p: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    Holt,
    DampedHolt,
    /// Not enough history to smooth; the last observed count is repeated.
    LastValue,
    /// The zone failed inside a cycle; the last observed count is repeated.
    Fallback,
}

impl ModelTag {
    pub fn degraded(kind: ModelKind) -> Self {
        Self {
            kind,
            seasonal: false,
            log1p: false,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.kind, ModelKind::LastValue | ModelKind::Fallback)
    }
}

impl fmt::Display for ModelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.kind {
            ModelKind::Holt => "holt",
            ModelKind::DampedHolt => "damped-holt",
            ModelKind::LastValue => "last-value",
            ModelKind::Fallback => "fallback",
        };
        f.write_str(base)?;
        if self.seasonal {
            f.write_str("+seasonal")?;
        }
        if self.log1p {
            f.write_str("+log1p")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Published forecast for one zone and one horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub zone_id: String,
    pub horizon_minutes: u32,
    pub current_count: i64,
    pub predicted_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceInterval>,
    #[serde(serialize_with = "serialize_tag")]
    #[serde(deserialize_with = "deserialize_tag")]
    pub model_tag: ModelTag,
    pub created_at: DateTime<Utc>,
}

impl Prediction {
    /// Degraded prediction: repeat the last observed count.
    pub fn last_value(
        zone: &Zone,
        horizon_minutes: u32,
        last_count: i64,
        kind: ModelKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        let clamped = zone.clamp(last_count);
        Self {
            zone_id: zone.id.clone(),
            horizon_minutes,
            current_count: last_count,
            predicted_count: clamped,
            confidence: None,
            model_tag: ModelTag::degraded(kind),
            created_at,
        }
    }
}

fn serialize_tag<S: serde::Serializer>(tag: &ModelTag, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&tag.to_string())
}

fn deserialize_tag<'de, D: serde::Deserializer<'de>>(d: D) -> std::result::Result<ModelTag, D::Error> {
    let raw = String::deserialize(d)?;
    let mut parts = raw.split('+');
    let kind = match parts.next() {
        Some("holt") => ModelKind::Holt,
        Some("damped-holt") => ModelKind::DampedHolt,
        Some("last-value") => ModelKind::LastValue,
        Some("fallback") => ModelKind::Fallback,
        other => {
            return Err(serde::de::Error::custom(format!(
                "unknown model tag {:?}",
                other
            )));
        }
    };
    let mut tag = ModelTag::degraded(kind);
    for suffix in parts {
        match suffix {
            "seasonal" => tag.seasonal = true,
            "log1p" => tag.log1p = true,
            other => {
                return Err(serde::de::Error::custom(format!(
                    "unknown model tag suffix {}",
                    other
                )));
            }
        }
    }
    Ok(tag)
}

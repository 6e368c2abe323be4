//! Zone catalog: the known zones and their capacities.
//!
//! Loaded from a JSON array of `{id, name, capacity, kind}`. The catalog may
//! be incomplete; zones missing from it are registered on first observation.

use crate::error::{ForecastError, Result};
use crate::types::Zone;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneCatalog {
    zones: Vec<Zone>,
}

impl ZoneCatalog {
    pub fn new(zones: Vec<Zone>) -> Result<Self> {
        let catalog = Self { zones };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&raw)?;
        info!(zones = catalog.len(), path = %path.display(), "loaded zone catalog");
        Ok(catalog)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let zones: Vec<Zone> = serde_json::from_str(raw)
            .map_err(|e| ForecastError::Config(format!("zone catalog: {}", e)))?;
        Self::new(zones)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for zone in &self.zones {
            if zone.id.trim().is_empty() {
                return Err(ForecastError::Config("zone catalog: empty zone id".into()));
            }
            if !seen.insert(zone.id.as_str()) {
                return Err(ForecastError::Config(format!(
                    "zone catalog: duplicate zone id {}",
                    zone.id
                )));
            }
        }
        Ok(())
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn get(&self, id: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == id)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

impl IntoIterator for ZoneCatalog {
    type Item = Zone;
    type IntoIter = std::vec::IntoIter<Zone>;

    fn into_iter(self) -> Self::IntoIter {
        self.zones.into_iter()
    }
}

//! Site configuration: measurement locations and the sensors installed there
//!
//! Site files are JSON. Sensors are listed per location; the flattened roster
//! (locations in file order, sensors in location order) defines the column
//! order of recorded output and the result of `list_sensors`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{ReplayError, Result};
use crate::types::ReadingKind;

/// One sensor installed on site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    /// Source id used in readings
    pub id: String,
    /// Quantity measured
    #[serde(rename = "type")]
    pub kind: ReadingKind,
    /// Unit the sensor reports in
    #[serde(default)]
    pub units: Option<String>,
    /// Measurement uncertainty, in `units`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigma: Option<f64>,
    #[serde(default)]
    pub description: String,
    /// Location the sensor belongs to; filled in from the enclosing location
    #[serde(skip)]
    pub location_id: Option<String>,
}

impl SensorDescriptor {
    pub fn new(id: impl Into<String>, kind: ReadingKind) -> Self {
        Self {
            id: id.into(),
            kind,
            units: Some(kind.default_unit().to_string()),
            sigma: None,
            description: String::new(),
            location_id: None,
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Unit the sensor reports in, falling back to the kind's default
    pub fn unit(&self) -> &str {
        self.units.as_deref().unwrap_or(self.kind.default_unit())
    }
}

/// A measurement location and its sensors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sensors: Vec<SensorDescriptor>,
}

/// Site layout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
}

impl SiteConfig {
    /// Load and validate a site file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReplayError::Config(format!("Failed to read site config {:?}: {}", path, e))
        })?;
        let site: Self = serde_json::from_str(&content).map_err(|e| {
            ReplayError::Config(format!("Failed to parse site config {:?}: {}", path, e))
        })?;
        site.validate()?;
        tracing::debug!(
            "Loaded site {} with {} sensors",
            site.id,
            site.sensors().len()
        );
        Ok(site)
    }

    /// Save the site file as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            ReplayError::Config(format!("Failed to serialize site config: {}", e))
        })?;
        std::fs::write(path, content).map_err(|e| {
            ReplayError::Config(format!("Failed to write site config {:?}: {}", path, e))
        })
    }

    /// Reject empty or duplicate sensor ids
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for sensor in self.locations.iter().flat_map(|l| &l.sensors) {
            if sensor.id.trim().is_empty() {
                return Err(ReplayError::Config("sensor with empty id".to_string()));
            }
            if !seen.insert(sensor.id.as_str()) {
                return Err(ReplayError::Config(format!(
                    "duplicate sensor id {}",
                    sensor.id
                )));
            }
        }
        Ok(())
    }

    /// Sensor roster across all locations, tagged with their location
    pub fn sensors(&self) -> Vec<SensorDescriptor> {
        self.locations
            .iter()
            .flat_map(|location| {
                location.sensors.iter().map(move |sensor| SensorDescriptor {
                    location_id: Some(location.id.clone()),
                    ..sensor.clone()
                })
            })
            .collect()
    }
}

//! Core data types for leakrig
//!
//! This module contains the value types that flow through the event bus:
//! single sensor readings and timestamped vectors of readings.
//!
//! # Main Types
//!
//! - [`ReadingKind`] - Quantity measured by a sensor (pressure, temperature, humidity)
//! - [`Reading`] - One sensor value with its source identifier and timestamp
//! - [`SensorVector`] - A timestamped snapshot of readings keyed by source identifier
//! - [`VectorError`] - Annotation attached to a vector by a processing stage
//!
//! # Units
//!
//! Every reading stores its value in the default unit of its kind:
//! Pascal for pressure, Celsius for temperature and percent relative humidity.
//! Constructors accepting other units convert on the way in.
//!
//! # Immutability
//!
//! Readings and vectors are never mutated once built. Re-timestamping or
//! replacing a value produces a new instance.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{ReplayError, Result};

/// Pascal, the default pressure unit
pub const PASCAL: &str = "Pa";
/// Bar
pub const BAR: &str = "bar";
/// Kilopascal
pub const KILO_PASCAL: &str = "kPa";
/// Degrees Celsius, the default temperature unit
pub const CELSIUS: &str = "C";
/// Kelvin
pub const KELVIN: &str = "K";
/// Percent relative humidity
pub const PERCENT: &str = "%";

const BAR_TO_PASCAL: f64 = 100_000.0;
const KILO_PASCAL_TO_PASCAL: f64 = 1_000.0;
const CELSIUS_TO_KELVIN: f64 = 273.15;

/// Quantity measured by a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingKind {
    /// Absolute pressure
    Pressure,
    /// Gas or wall temperature
    Temperature,
    /// Relative humidity
    Humidity,
}

impl ReadingKind {
    /// Unit in which values of this kind are stored
    pub fn default_unit(&self) -> &'static str {
        match self {
            ReadingKind::Pressure => PASCAL,
            ReadingKind::Temperature => CELSIUS,
            ReadingKind::Humidity => PERCENT,
        }
    }

    /// Display name for the kind
    pub fn display_name(&self) -> &'static str {
        match self {
            ReadingKind::Pressure => "Pressure",
            ReadingKind::Temperature => "Temperature",
            ReadingKind::Humidity => "Humidity",
        }
    }

    /// Convert `value` expressed in `unit` into this kind's default unit
    pub fn to_default_unit(&self, value: f64, unit: &str) -> Result<f64> {
        match (self, unit) {
            (ReadingKind::Pressure, PASCAL) => Ok(value),
            (ReadingKind::Pressure, BAR) => Ok(value * BAR_TO_PASCAL),
            (ReadingKind::Pressure, KILO_PASCAL) => Ok(value * KILO_PASCAL_TO_PASCAL),
            (ReadingKind::Temperature, CELSIUS) => Ok(value),
            (ReadingKind::Temperature, KELVIN) => Ok(value - CELSIUS_TO_KELVIN),
            (ReadingKind::Humidity, PERCENT) => Ok(value),
            _ => Err(ReplayError::InvalidArgument(format!(
                "invalid unit '{}' for {}; valid units are: {}",
                unit,
                self.display_name().to_lowercase(),
                self.valid_units().join(", ")
            ))),
        }
    }

    fn valid_units(&self) -> &'static [&'static str] {
        match self {
            ReadingKind::Pressure => &[PASCAL, BAR, KILO_PASCAL],
            ReadingKind::Temperature => &[CELSIUS, KELVIN],
            ReadingKind::Humidity => &[PERCENT],
        }
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A single sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Milliseconds since the Unix epoch (UTC)
    pub timestamp_ms: i64,
    /// Sensor identifier, unique within a vector
    pub source_id: String,
    /// Measured quantity
    pub kind: ReadingKind,
    /// Value in the kind's default unit
    pub value: f64,
    /// Source uncertainty (one sigma), if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigma: Option<f64>,
}

impl Reading {
    /// Create a reading whose value is already in the default unit
    pub fn new(
        timestamp_ms: i64,
        source_id: impl Into<String>,
        kind: ReadingKind,
        value: f64,
    ) -> Self {
        Self {
            timestamp_ms,
            source_id: source_id.into(),
            kind,
            value,
            sigma: None,
        }
    }

    /// Create a pressure reading in Pascal
    pub fn pressure(timestamp_ms: i64, source_id: impl Into<String>, pascal: f64) -> Self {
        Self::new(timestamp_ms, source_id, ReadingKind::Pressure, pascal)
    }

    /// Create a temperature reading in Celsius
    pub fn temperature(timestamp_ms: i64, source_id: impl Into<String>, celsius: f64) -> Self {
        Self::new(timestamp_ms, source_id, ReadingKind::Temperature, celsius)
    }

    /// Create a humidity reading in percent
    pub fn humidity(timestamp_ms: i64, source_id: impl Into<String>, percent: f64) -> Self {
        Self::new(timestamp_ms, source_id, ReadingKind::Humidity, percent)
    }

    /// Create a reading from a value in an arbitrary supported unit
    pub fn with_unit(
        timestamp_ms: i64,
        source_id: impl Into<String>,
        kind: ReadingKind,
        value: f64,
        unit: &str,
    ) -> Result<Self> {
        let value = kind.to_default_unit(value, unit)?;
        Ok(Self::new(timestamp_ms, source_id, kind, value))
    }

    /// Attach a source uncertainty
    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = Some(sigma);
        self
    }

    /// Copy of this reading at a different timestamp
    pub fn with_timestamp(&self, timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            ..self.clone()
        }
    }

    /// Copy of this reading with a different value (default unit)
    pub fn with_value(&self, value: f64) -> Self {
        Self {
            value,
            ..self.clone()
        }
    }

    /// Unit of [`Reading::value`]
    pub fn unit(&self) -> &'static str {
        self.kind.default_unit()
    }

    /// Pressure in bar, `None` for other kinds
    pub fn bar(&self) -> Option<f64> {
        (self.kind == ReadingKind::Pressure).then(|| self.value / BAR_TO_PASCAL)
    }

    /// Pressure in kilopascal, `None` for other kinds
    pub fn kilo_pascal(&self) -> Option<f64> {
        (self.kind == ReadingKind::Pressure).then(|| self.value / KILO_PASCAL_TO_PASCAL)
    }

    /// Temperature in Kelvin, `None` for other kinds
    pub fn kelvin(&self) -> Option<f64> {
        (self.kind == ReadingKind::Temperature).then(|| self.value + CELSIUS_TO_KELVIN)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit())
    }
}

/// Severity of a [`VectorError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Warning,
    Severe,
}

/// Annotation attached to a vector, tied to a sensor or derived quantity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorError {
    pub sensor_id: String,
    pub severity: ErrorSeverity,
    pub message: String,
}

impl VectorError {
    pub fn new(
        sensor_id: impl Into<String>,
        severity: ErrorSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            severity,
            message: message.into(),
        }
    }
}

/// A timestamped snapshot of sensor readings.
///
/// Readings are keyed by source identifier. Keys are unique and the order in
/// which identifiers were first inserted is retained. Deserialized vectors
/// with a repeated identifier are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredVector")]
pub struct SensorVector {
    timestamp_ms: i64,
    readings: Vec<Reading>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    errors: Vec<VectorError>,
}

/// Serialized form of [`SensorVector`], checked on the way in
#[derive(Deserialize)]
struct StoredVector {
    timestamp_ms: i64,
    readings: Vec<Reading>,
    #[serde(default)]
    errors: Vec<VectorError>,
}

impl TryFrom<StoredVector> for SensorVector {
    type Error = String;

    fn try_from(stored: StoredVector) -> std::result::Result<Self, Self::Error> {
        let mut seen = HashSet::with_capacity(stored.readings.len());
        if let Some(dup) = stored
            .readings
            .iter()
            .find(|r| !seen.insert(r.source_id.as_str()))
        {
            return Err(format!(
                "vector @{} has more than one reading from {}",
                stored.timestamp_ms, dup.source_id
            ));
        }
        Ok(Self {
            timestamp_ms: stored.timestamp_ms,
            readings: stored.readings,
            errors: stored.errors,
        })
    }
}

impl SensorVector {
    /// Build a vector from a list of readings. A later reading with an
    /// already-seen source identifier replaces the earlier one in place.
    pub fn from_readings(timestamp_ms: i64, readings: impl IntoIterator<Item = Reading>) -> Self {
        let mut unique: Vec<Reading> = Vec::new();
        for reading in readings {
            match unique.iter_mut().find(|r| r.source_id == reading.source_id) {
                Some(existing) => *existing = reading,
                None => unique.push(reading),
            }
        }
        Self {
            timestamp_ms,
            readings: unique,
            errors: Vec::new(),
        }
    }

    /// Build an empty vector (not eligible for playback)
    pub fn empty(timestamp_ms: i64) -> Self {
        Self::from_readings(timestamp_ms, std::iter::empty())
    }

    /// Attach error annotations
    pub fn with_errors(mut self, errors: Vec<VectorError>) -> Self {
        self.errors = errors;
        self
    }

    /// Milliseconds since the Unix epoch (UTC); the scheduling key
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// Readings in insertion order
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Look up a reading by source identifier
    pub fn get(&self, source_id: &str) -> Option<&Reading> {
        self.readings.iter().find(|r| r.source_id == source_id)
    }

    /// Source identifiers in insertion order
    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.readings.iter().map(|r| r.source_id.as_str())
    }

    /// Error annotations
    pub fn errors(&self) -> &[VectorError] {
        &self.errors
    }

    /// Number of readings
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Check if the vector has no readings
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Copy of this vector moved to `timestamp_ms`. Every reading is shifted
    /// by the same delta, so relative timing inside the vector is preserved.
    pub fn time_shifted(&self, timestamp_ms: i64) -> Self {
        let delta = timestamp_ms - self.timestamp_ms;
        Self {
            timestamp_ms,
            readings: self
                .readings
                .iter()
                .map(|r| r.with_timestamp(r.timestamp_ms + delta))
                .collect(),
            errors: self.errors.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversion() {
        let p = Reading::with_unit(0, "p1", ReadingKind::Pressure, 1.5, BAR).unwrap();
        assert_eq!(p.value, 150_000.0);
        assert_eq!(p.bar(), Some(1.5));
        assert_eq!(p.kilo_pascal(), Some(150.0));
        assert_eq!(p.kelvin(), None);

        let t = Reading::with_unit(0, "t1", ReadingKind::Temperature, 300.0, KELVIN).unwrap();
        assert!((t.value - 26.85).abs() < 1e-9);
        assert!((t.kelvin().unwrap() - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_unit() {
        let err = Reading::with_unit(0, "h1", ReadingKind::Humidity, 40.0, BAR).unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(err.to_string().contains('%'));
    }

    #[test]
    fn test_with_timestamp_is_a_copy() {
        let original = Reading::pressure(1_000, "p1", 101_325.0).with_sigma(5.0);
        let shifted = original.with_timestamp(2_000);
        assert_eq!(original.timestamp_ms, 1_000);
        assert_eq!(shifted.timestamp_ms, 2_000);
        assert_eq!(shifted.source_id, "p1");
        assert_eq!(shifted.value, 101_325.0);
        assert_eq!(shifted.sigma, Some(5.0));
    }

    #[test]
    fn test_duplicate_ids_overwrite_in_place() {
        let vector = SensorVector::from_readings(
            0,
            vec![
                Reading::pressure(0, "p1", 1.0),
                Reading::temperature(0, "t1", 20.0),
                Reading::pressure(0, "p1", 2.0),
            ],
        );
        assert_eq!(vector.len(), 2);
        assert_eq!(vector.source_ids().collect::<Vec<_>>(), vec!["p1", "t1"]);
        assert_eq!(vector.get("p1").unwrap().value, 2.0);
    }

    #[test]
    fn test_time_shift_preserves_relative_timing() {
        let vector = SensorVector::from_readings(
            1_000,
            vec![
                Reading::pressure(990, "p1", 1.0),
                Reading::humidity(1_005, "h1", 45.0),
            ],
        )
        .with_errors(vec![VectorError::new("p1", ErrorSeverity::Warning, "drift")]);

        let shifted = vector.time_shifted(50_000);
        assert_eq!(shifted.timestamp_ms(), 50_000);
        assert_eq!(shifted.get("p1").unwrap().timestamp_ms, 49_990);
        assert_eq!(shifted.get("h1").unwrap().timestamp_ms, 50_005);
        assert_eq!(shifted.errors(), vector.errors());
        // Source untouched
        assert_eq!(vector.timestamp_ms(), 1_000);
    }

    #[test]
    fn test_deserialize_rejects_repeated_source() {
        let json = r#"{
            "timestamp_ms": 10,
            "readings": [
                { "timestamp_ms": 10, "source_id": "p1", "kind": "pressure", "value": 1.0 },
                { "timestamp_ms": 10, "source_id": "p1", "kind": "pressure", "value": 2.0 }
            ]
        }"#;
        let err = serde_json::from_str::<SensorVector>(json).unwrap_err();
        assert!(err.to_string().contains("p1"));

        let vector = SensorVector::from_readings(
            10,
            vec![Reading::pressure(10, "p1", 1.0), Reading::humidity(10, "h1", 50.0)],
        );
        let json = serde_json::to_string(&vector).unwrap();
        assert_eq!(serde_json::from_str::<SensorVector>(&json).unwrap(), vector);
    }

    #[test]
    fn test_empty_vector() {
        let vector = SensorVector::empty(5);
        assert!(vector.is_empty());
        assert_eq!(vector.len(), 0);
    }
}

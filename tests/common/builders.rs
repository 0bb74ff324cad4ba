//! Test data builders for creating test objects

use leakrig::{Reading, SensorVector};

/// Builder for creating test vectors
pub struct VectorBuilder {
    timestamp_ms: i64,
    readings: Vec<Reading>,
}

impl VectorBuilder {
    pub fn at(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            readings: Vec::new(),
        }
    }

    pub fn pressure(mut self, id: &str, pascal: f64) -> Self {
        self.readings
            .push(Reading::pressure(self.timestamp_ms, id, pascal));
        self
    }

    pub fn temperature(mut self, id: &str, celsius: f64) -> Self {
        self.readings
            .push(Reading::temperature(self.timestamp_ms, id, celsius));
        self
    }

    pub fn humidity(mut self, id: &str, percent: f64) -> Self {
        self.readings
            .push(Reading::humidity(self.timestamp_ms, id, percent));
        self
    }

    pub fn build(self) -> SensorVector {
        SensorVector::from_readings(self.timestamp_ms, self.readings)
    }
}

/// A typical rig snapshot: one pressure, one temperature and one humidity reading
pub fn rig_vector(timestamp_ms: i64) -> SensorVector {
    VectorBuilder::at(timestamp_ms)
        .pressure("p1", 101_325.0)
        .temperature("t1", 21.0)
        .humidity("h1", 45.0)
        .build()
}

/// Rig vectors at the given timestamps
pub fn rig_sequence(timestamps: &[i64]) -> Vec<SensorVector> {
    timestamps.iter().copied().map(rig_vector).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_builder() {
        let vector = VectorBuilder::at(500)
            .pressure("p1", 1.0)
            .temperature("t1", 2.0)
            .build();

        assert_eq!(vector.timestamp_ms(), 500);
        assert_eq!(vector.len(), 2);
        assert_eq!(vector.get("t1").unwrap().value, 2.0);
    }
}

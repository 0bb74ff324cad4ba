//! Merge a data stream onto the cadence of a timing stream

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::SensorDescriptor;
use crate::types::{Reading, SensorVector};

use super::bus::{EventBus, Subscription, VectorStream};

type LatestReadings = Arc<Mutex<HashMap<String, Reading>>>;

/// Republishes the latest reading of every known sensor whenever the timing
/// stream emits.
///
/// Merged vectors carry the timing vector's timestamp, and every reading in
/// them is re-timestamped to it. Readings are ordered by source id. Sensors
/// the data stream has not reported yet are omitted, so the first merged
/// vectors may be empty.
pub struct StreamMerger {
    bus: EventBus,
    latest: LatestReadings,
    sensors: Vec<SensorDescriptor>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl std::fmt::Debug for StreamMerger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamMerger")
            .field("bus", &self.bus)
            .field("known_sensors", &self.known_sensors())
            .finish()
    }
}

impl StreamMerger {
    /// Subscribe to both streams immediately
    pub fn new(timing: &dyn VectorStream, data: &dyn VectorStream) -> Self {
        let bus = EventBus::new();
        let latest: LatestReadings = Arc::default();

        let cache = latest.clone();
        let data_sub = data.event_bus().subscribe(move |vector| {
            let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
            for reading in vector.readings() {
                cache.insert(reading.source_id.clone(), reading.clone());
            }
            Ok(())
        });

        let cache = latest.clone();
        let out = bus.clone();
        let timing_sub = timing.event_bus().subscribe(move |tick| {
            let merged = merge_at(&cache, tick.timestamp_ms());
            out.publish(&merged);
            Ok(())
        });

        Self {
            bus,
            latest,
            sensors: data.list_sensors(),
            subscriptions: Mutex::new(vec![timing_sub, data_sub]),
        }
    }

    /// Number of sensors with at least one cached reading
    pub fn known_sensors(&self) -> usize {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Unsubscribe from both streams, forget cached readings and detach
    /// this merger's own subscribers
    pub fn stop(&self) {
        let subscriptions =
            std::mem::take(&mut *self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner));
        for subscription in &subscriptions {
            subscription.unsubscribe();
        }
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.bus.clear();
    }
}

fn merge_at(cache: &LatestReadings, timestamp_ms: i64) -> SensorVector {
    let cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
    let mut readings: Vec<Reading> = cache
        .values()
        .map(|r| r.with_timestamp(timestamp_ms))
        .collect();
    readings.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    SensorVector::from_readings(timestamp_ms, readings)
}

impl VectorStream for StreamMerger {
    fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    fn list_sensors(&self) -> Vec<SensorDescriptor> {
        self.sensors.clone()
    }
}

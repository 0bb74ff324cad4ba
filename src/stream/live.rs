//! Live vector stream fed by producer threads
//!
//! Producers push vectors through a bounded crossbeam channel ([`LiveFeed`]).
//! A pump thread publishes them on the stream's bus in arrival order, so a
//! slow subscriber applies backpressure to producers instead of blocking them
//! indefinitely inside a handler.

use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};

use crate::config::SensorDescriptor;
use crate::error::{ReplayError, Result};
use crate::types::SensorVector;

use super::bus::{EventBus, VectorStream};

/// Default channel capacity between producers and the pump thread
pub const DEFAULT_CAPACITY: usize = 1024;

/// Producer side of a [`LiveStream`]
#[derive(Debug, Clone)]
pub struct LiveFeed {
    tx: Sender<SensorVector>,
}

impl LiveFeed {
    /// Push a vector, waiting while the channel is full
    pub fn push(&self, vector: SensorVector) -> Result<()> {
        self.tx
            .send(vector)
            .map_err(|_| ReplayError::Channel("live stream has been stopped".to_string()))
    }

    /// Push a vector without waiting. Returns false if the channel is full.
    pub fn try_push(&self, vector: SensorVector) -> Result<bool> {
        match self.tx.try_send(vector) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => Err(ReplayError::Channel(
                "live stream has been stopped".to_string(),
            )),
        }
    }
}

struct Pump {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

/// A vector stream whose events come from live producers
pub struct LiveStream {
    bus: EventBus,
    feed: LiveFeed,
    sensors: Vec<SensorDescriptor>,
    pump: Mutex<Option<Pump>>,
}

impl std::fmt::Debug for LiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStream")
            .field("bus", &self.bus)
            .field("running", &self.is_running())
            .finish()
    }
}

impl LiveStream {
    /// Start a live stream with the default channel capacity
    pub fn new() -> Result<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Start a live stream whose feed holds at most `capacity` pending vectors
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ReplayError::InvalidArgument(
                "live stream capacity must be positive".to_string(),
            ));
        }
        let (tx, rx) = bounded(capacity);
        let (stop_tx, stop_rx) = bounded(1);
        let bus = EventBus::new();

        let pump_bus = bus.clone();
        let thread = std::thread::Builder::new()
            .name("leakrig-live".to_string())
            .spawn(move || run_pump(pump_bus, rx, stop_rx))
            .map_err(|e| ReplayError::Io(e).with_context("Failed to start live stream"))?;

        Ok(Self {
            bus,
            feed: LiveFeed { tx },
            sensors: Vec::new(),
            pump: Mutex::new(Some(Pump { stop_tx, thread })),
        })
    }

    /// Attach a sensor roster
    pub fn with_sensors(mut self, sensors: Vec<SensorDescriptor>) -> Self {
        self.sensors = sensors;
        self
    }

    /// Producer handle; may be cloned and moved to other threads
    pub fn feed(&self) -> LiveFeed {
        self.feed.clone()
    }

    /// Check whether the pump thread is still delivering
    pub fn is_running(&self) -> bool {
        self.pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop delivering and wait for the pump thread. Vectors still queued are
    /// discarded. Calling it again is a no-op.
    pub fn stop(&self) {
        let pump = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(pump) = pump else {
            return;
        };
        let _ = pump.stop_tx.send(());
        if pump.thread.join().is_err() {
            tracing::warn!("Live stream pump thread panicked");
        }
        tracing::debug!("Live stream stopped");
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl VectorStream for LiveStream {
    fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    fn list_sensors(&self) -> Vec<SensorDescriptor> {
        self.sensors.clone()
    }
}

fn run_pump(bus: EventBus, rx: Receiver<SensorVector>, stop_rx: Receiver<()>) {
    tracing::debug!("Live stream pump started");
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(vector) if vector.is_empty() => {
                    tracing::warn!(
                        "Dropping live vector @{} without readings",
                        vector.timestamp_ms()
                    );
                }
                Ok(vector) => bus.publish(&vector),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => break,
        }
    }
    tracing::debug!("Live stream pump exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Reading;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    fn vector(ts: i64) -> SensorVector {
        SensorVector::from_readings(ts, vec![Reading::pressure(ts, "p1", 100_000.0)])
    }

    #[test]
    fn test_delivers_in_arrival_order() {
        let stream = LiveStream::new().unwrap();
        let (tx, rx) = unbounded();
        stream.subscribe(move |v| {
            tx.send(v.timestamp_ms())?;
            Ok(())
        });

        let feed = stream.feed();
        for ts in [30, 10, 20] {
            feed.push(vector(ts)).unwrap();
        }
        let got: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(got, vec![30, 10, 20]);
        stream.stop();
    }

    #[test]
    fn test_empty_vectors_are_dropped() {
        let stream = LiveStream::new().unwrap();
        let (tx, rx) = unbounded();
        stream.subscribe(move |v| {
            tx.send(v.timestamp_ms())?;
            Ok(())
        });

        let feed = stream.feed();
        feed.push(SensorVector::empty(1)).unwrap();
        feed.push(vector(2)).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 2);
        stream.stop();
    }

    #[test]
    fn test_push_after_stop_fails() {
        let stream = LiveStream::new().unwrap();
        let feed = stream.feed();
        stream.stop();
        assert!(!stream.is_running());
        assert!(matches!(feed.push(vector(1)), Err(ReplayError::Channel(_))));
        assert!(feed.try_push(vector(1)).is_err());
        stream.stop();
    }

    #[test]
    fn test_try_push_reports_full_channel() {
        let stream = LiveStream::with_capacity(1).unwrap();
        let (gate_tx, gate_rx) = bounded::<()>(0);
        stream.subscribe(move |_| {
            let _ = gate_rx.recv_timeout(Duration::from_secs(2));
            Ok(())
        });

        let feed = stream.feed();
        feed.push(vector(1)).unwrap();
        // Wait until the pump holds vector 1 inside the blocked handler
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !feed.try_push(vector(2)).unwrap() {
            assert!(std::time::Instant::now() < deadline);
            std::thread::yield_now();
        }
        assert!(!feed.try_push(vector(3)).unwrap());

        let _ = gate_tx.send(());
        let _ = gate_tx.send(());
        stream.stop();
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(LiveStream::with_capacity(0).unwrap_err().is_invalid_argument());
    }
}

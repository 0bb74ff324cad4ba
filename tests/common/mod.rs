//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use crossbeam_channel::{unbounded, Receiver};
use leakrig::{SensorVector, VectorStream};
use std::time::{Duration, Instant};

/// Generous upper bound for waiting on a single delivery
pub fn delivery_timeout() -> Duration {
    Duration::from_secs(3)
}

/// A vector together with the instant it reached the subscriber
#[derive(Debug, Clone)]
pub struct Arrival {
    pub vector: SensorVector,
    pub at: Instant,
}

/// Subscribe a handler that forwards every vector with its arrival time
pub fn capture(stream: &impl VectorStream) -> Receiver<Arrival> {
    let (tx, rx) = unbounded();
    stream.subscribe(move |vector| {
        tx.send(Arrival {
            vector: vector.clone(),
            at: Instant::now(),
        })?;
        Ok(())
    });
    rx
}

/// Receive exactly `n` arrivals or fail
pub fn recv_n(rx: &Receiver<Arrival>, n: usize) -> Vec<Arrival> {
    (0..n)
        .map(|i| {
            rx.recv_timeout(delivery_timeout())
                .unwrap_or_else(|_| panic!("arrival {} of {} did not come", i + 1, n))
        })
        .collect()
}

/// Assert `actual` lies within `tolerance` of `expected`
pub fn assert_duration_near(actual: Duration, expected: Duration, tolerance: Duration) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= tolerance,
        "Expected {:?} to be within {:?} of {:?}",
        actual,
        tolerance,
        expected
    );
}

//! Virtual time tracking for playback
//!
//! Virtual time is the elapsed position along the recorded timeline, in
//! milliseconds. It advances with real time multiplied by the speed factor,
//! stays frozen while paused, and is unaffected by the wall-clock offset at
//! which playback happens.
//!
//! [`VirtualClock`] never reads a clock itself: every operation takes the
//! current wall time as a parameter, which keeps it fully deterministic.
//! [`WallClock`] is the seam through which the player obtains wall time.

use crate::error::{ReplayError, Result};

/// Source of wall-clock time in milliseconds since the Unix epoch
#[cfg_attr(test, mockall::automock)]
pub trait WallClock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock backed by the system's UTC time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Check that a speed factor is usable: finite and strictly positive
pub fn validate_speed(factor: f64) -> Result<()> {
    if factor.is_finite() && factor > 0.0 {
        Ok(())
    } else {
        Err(ReplayError::InvalidArgument(format!(
            "speed factor must be positive and finite, got {}",
            factor
        )))
    }
}

/// Tracks virtual time across pauses and speed changes.
///
/// Elapsed time is folded into `elapsed_ms` at every boundary (pause, speed
/// change), so the accumulator only ever holds fully closed segments. The
/// open segment, if playing, is computed from `anchor_ms` and the current
/// speed.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualClock {
    /// Virtual time of all closed segments
    elapsed_ms: i64,
    /// Wall time at which the open segment began (`None` unless playing)
    anchor_ms: Option<i64>,
    /// Wall time at which the current pause began
    paused_at_ms: Option<i64>,
    /// Virtual milliseconds per real millisecond
    speed: f64,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualClock {
    /// Create a clock in the never-started state
    pub fn new() -> Self {
        Self {
            elapsed_ms: 0,
            anchor_ms: None,
            paused_at_ms: None,
            speed: 1.0,
        }
    }

    /// Begin a new session at `now`, discarding accumulated virtual time
    pub fn start(&mut self, now: i64) {
        self.elapsed_ms = 0;
        self.anchor_ms = Some(now);
        self.paused_at_ms = None;
    }

    /// Freeze virtual time. No-op if not started or already paused.
    pub fn pause(&mut self, now: i64) {
        if self.anchor_ms.is_none() || self.paused_at_ms.is_some() {
            return;
        }
        self.fold(now);
        self.paused_at_ms = Some(now);
        self.anchor_ms = None;
    }

    /// Unfreeze virtual time. No-op if not paused.
    pub fn resume(&mut self, now: i64) {
        if self.paused_at_ms.is_none() {
            return;
        }
        self.anchor_ms = Some(now);
        self.paused_at_ms = None;
    }

    /// Change the speed factor, closing the open segment at the old speed
    pub fn set_speed(&mut self, now: i64, factor: f64) -> Result<()> {
        validate_speed(factor)?;
        self.fold(now);
        self.speed = factor;
        if self.anchor_ms.is_some() {
            self.anchor_ms = Some(now);
        }
        Ok(())
    }

    /// Virtual time at wall time `now`
    pub fn current_virtual_time(&self, now: i64) -> i64 {
        match self.open_anchor() {
            Some(anchor) => self
                .elapsed_ms
                .saturating_add(self.scaled(now.saturating_sub(anchor))),
            None => self.elapsed_ms,
        }
    }

    /// Real milliseconds that must still pass, at the current speed, before
    /// virtual time reaches `target`. Never negative.
    pub fn delay_until(&self, target: i64, now: i64) -> u64 {
        let remaining = target.saturating_sub(self.current_virtual_time(now));
        if remaining <= 0 {
            return 0;
        }
        (remaining as f64 / self.speed) as u64
    }

    /// Return to the pristine never-started state
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Current speed factor
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Check if a session is open and frozen
    pub fn is_paused(&self) -> bool {
        self.paused_at_ms.is_some()
    }

    /// Check if a session is open and running
    pub fn is_running(&self) -> bool {
        self.open_anchor().is_some()
    }

    fn open_anchor(&self) -> Option<i64> {
        match (self.anchor_ms, self.paused_at_ms) {
            (Some(anchor), None) => Some(anchor),
            _ => None,
        }
    }

    /// Virtual length of a real segment; the float cast saturates at the i64 bounds
    fn scaled(&self, real_ms: i64) -> i64 {
        (real_ms as f64 * self.speed) as i64
    }

    /// Move the open segment's virtual time into the accumulator
    fn fold(&mut self, now: i64) {
        if let Some(anchor) = self.open_anchor() {
            self.elapsed_ms = self
                .elapsed_ms
                .saturating_add(self.scaled(now.saturating_sub(anchor)));
            self.anchor_ms = Some(now);
        }
    }
}

//! Replay scheduler for playing back recorded vector sequences
//!
//! The player arms one timer per vector. Each timer's delay is derived from the
//! vector's fixed offset on the recorded timeline (its timestamp minus the
//! first vector's) and the [`VirtualClock`], so pausing, resuming and changing
//! speed only ever cancel the outstanding timers and re-arm them from the
//! cursor. Delays are never computed relative to the previous vector, so
//! repeated rescheduling cannot accumulate drift.
//!
//! # Delivery protocol
//!
//! The cursor (index of the next vector pending delivery) is claimed with a
//! compare-and-set before a vector is published. A firing timer claims every
//! index up to and including its own, in order, so two timers waking in the
//! same tick cannot reorder deliveries, and a late or duplicate firing for an
//! index that was already claimed publishes nothing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::{ReplayConfig, SensorDescriptor};
use crate::error::{ReplayError, Result};
use crate::stream::{EventBus, VectorStream};
use crate::types::SensorVector;

use super::clock::{validate_speed, SystemClock, VirtualClock, WallClock};
use super::timer::{TimerFacility, TimerHandle};
use super::types::PlaybackState;

/// Default time `shutdown` waits for the timer thread
pub const DEFAULT_SHUTDOWN_AWAIT: Duration = Duration::from_millis(5000);

const TIMER_THREAD_NAME: &str = "leakrig-playback";

/// Everything a firing timer needs, shared by all timers of one session.
struct Delivery {
    vectors: Arc<[SensorVector]>,
    cursor: Arc<AtomicUsize>,
    bus: EventBus,
    first_vector_time: i64,
    start_time: i64,
    use_original_timestamps: bool,
}

impl Delivery {
    fn offset(&self, index: usize) -> i64 {
        self.vectors[index].timestamp_ms() - self.first_vector_time
    }

    fn fire(&self, index: usize) {
        loop {
            let next = self.cursor.load(Ordering::Acquire);
            if next > index {
                return;
            }
            if self
                .cursor
                .compare_exchange(next, next + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.deliver(next);
            }
        }
    }

    fn deliver(&self, index: usize) {
        let vector = &self.vectors[index];
        if self.use_original_timestamps {
            tracing::debug!("Publishing vector {} @{}", index, vector.timestamp_ms());
            self.bus.publish(vector);
        } else {
            let shifted =
                vector.time_shifted(self.start_time.saturating_add(self.offset(index)));
            tracing::debug!(
                "Publishing vector {} @{} (recorded @{})",
                index,
                shifted.timestamp_ms(),
                vector.timestamp_ms()
            );
            self.bus.publish(&shifted);
        }
    }
}

/// State of one playback run, replaced wholesale on start and stop
struct Session {
    delivery: Arc<Delivery>,
    paused: bool,
    armed: Vec<TimerHandle>,
}

impl Session {
    fn cursor(&self) -> usize {
        self.delivery.cursor.load(Ordering::Acquire)
    }

    fn total(&self) -> usize {
        self.delivery.vectors.len()
    }

    fn cancel_armed(&mut self) {
        for timer in self.armed.drain(..) {
            timer.cancel();
        }
    }
}

struct PlayerState {
    speed: f64,
    clock: VirtualClock,
    session: Option<Session>,
}

/// Plays back a time-ordered sequence of vectors through an [`EventBus`],
/// preserving the recorded spacing between vectors up to the speed factor.
///
/// All operations may be called from any thread. None of them wait for a
/// delivery; only [`ReplayScheduler::shutdown`] blocks, and only for a
/// bounded time.
pub struct ReplayScheduler {
    bus: EventBus,
    timers: TimerFacility,
    wall_clock: Arc<dyn WallClock>,
    sensors: Vec<SensorDescriptor>,
    shutdown_await: Duration,
    state: Mutex<PlayerState>,
}

impl std::fmt::Debug for ReplayScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayScheduler")
            .field("state", &self.state())
            .field("cursor", &self.cursor())
            .field("total_vectors", &self.total_vectors())
            .field("speed", &self.speed())
            .finish()
    }
}

impl ReplayScheduler {
    /// Create a player using the system clock and default settings
    pub fn new() -> Result<Self> {
        Ok(Self {
            bus: EventBus::new(),
            timers: TimerFacility::new(TIMER_THREAD_NAME)?,
            wall_clock: Arc::new(SystemClock),
            sensors: Vec::new(),
            shutdown_await: DEFAULT_SHUTDOWN_AWAIT,
            state: Mutex::new(PlayerState {
                speed: 1.0,
                clock: VirtualClock::new(),
                session: None,
            }),
        })
    }

    /// Create a player configured from a [`ReplayConfig`]
    pub fn from_config(config: &ReplayConfig) -> Result<Self> {
        config.validate()?;
        let player = Self::new()?
            .with_shutdown_await(Duration::from_millis(config.shutdown_await_ms));
        player.set_speed(config.speed)?;
        Ok(player)
    }

    /// Use a different wall clock
    pub fn with_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.wall_clock = clock;
        self
    }

    /// Attach the site's sensor roster
    pub fn with_sensors(mut self, sensors: Vec<SensorDescriptor>) -> Self {
        self.sensors = sensors;
        self
    }

    /// Set how long `shutdown` waits for the timer thread
    pub fn with_shutdown_await(mut self, timeout: Duration) -> Self {
        self.shutdown_await = timeout;
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, PlayerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start playing back `vectors`.
    ///
    /// When `use_original_timestamps` is false, the vector at offset `d` from
    /// the first one is published with timestamp `start_time + d`, and its
    /// readings are shifted by the same amount. Otherwise vectors are
    /// published unchanged.
    ///
    /// The sequence must be ordered by timestamp; it is not sorted here.
    pub fn start_playback(
        &self,
        vectors: Vec<SensorVector>,
        start_time: i64,
        use_original_timestamps: bool,
    ) -> Result<()> {
        let mut state = self.lock_state();
        if state.session.is_some() {
            return Err(ReplayError::InvalidState(
                "cannot start playback while a session is active".to_string(),
            ));
        }
        if vectors.is_empty() {
            return Err(ReplayError::InvalidArgument(
                "vectors must be non-empty".to_string(),
            ));
        }
        if let Some(index) = vectors.iter().position(|v| v.is_empty()) {
            return Err(ReplayError::InvalidArgument(format!(
                "vector {} has no readings",
                index
            )));
        }
        if !self.timers.is_running() {
            return Err(ReplayError::InvalidState(
                "player has been shut down".to_string(),
            ));
        }

        let first_vector_time = vectors[0].timestamp_ms();
        let delivery = Arc::new(Delivery {
            vectors: vectors.into(),
            cursor: Arc::new(AtomicUsize::new(0)),
            bus: self.bus.clone(),
            first_vector_time,
            start_time,
            use_original_timestamps,
        });

        let now = self.wall_clock.now_ms();
        let speed = state.speed;
        state.clock.start(now);
        state.clock.set_speed(now, speed)?;

        let mut session = Session {
            delivery,
            paused: false,
            armed: Vec::new(),
        };
        tracing::info!(
            "Starting playback of {} vectors at {}x (start time {}, original timestamps: {})",
            session.total(),
            speed,
            start_time,
            use_original_timestamps
        );
        let armed = self.arm_from_cursor(&state.clock, &session, now);
        session.armed = match armed {
            Ok(armed) => armed,
            Err(e) => {
                state.clock.reset();
                return Err(e);
            }
        };
        state.session = Some(session);
        Ok(())
    }

    /// Arm one timer for every vector from the cursor to the end
    fn arm_from_cursor(
        &self,
        clock: &VirtualClock,
        session: &Session,
        now: i64,
    ) -> Result<Vec<TimerHandle>> {
        let delivery = &session.delivery;
        let from = session.cursor();
        let mut armed = Vec::with_capacity(session.total().saturating_sub(from));
        for index in from..session.total() {
            let delay = clock.delay_until(delivery.offset(index), now);
            let delivery = Arc::clone(delivery);
            let timer = self
                .timers
                .schedule(Duration::from_millis(delay), move || delivery.fire(index));
            match timer {
                Ok(timer) => armed.push(timer),
                Err(e) => {
                    for timer in &armed {
                        timer.cancel();
                    }
                    return Err(e);
                }
            }
        }
        tracing::debug!("Armed {} timers from vector {}", armed.len(), from);
        Ok(armed)
    }

    /// Cancel outstanding timers and re-arm them from the cursor
    fn reschedule(&self, state: &mut PlayerState, now: i64) -> Result<()> {
        let PlayerState { clock, session, .. } = state;
        let Some(session) = session.as_mut() else {
            return Ok(());
        };
        session.cancel_armed();
        session.armed = self.arm_from_cursor(clock, session, now)?;
        Ok(())
    }

    /// Change the playback speed.
    ///
    /// While playing, pending vectors are rescheduled at the new speed. With
    /// no session, or while paused, the factor is stored and applies from the
    /// next start or resume.
    pub fn set_speed(&self, factor: f64) -> Result<()> {
        validate_speed(factor)?;
        let mut state = self.lock_state();
        let now = self.wall_clock.now_ms();
        state.clock.set_speed(now, factor)?;
        state.speed = factor;

        let playing = state.session.as_ref().is_some_and(|s| !s.paused);
        if playing {
            tracing::info!("Playback speed changed to {}x, rescheduling", factor);
            self.reschedule(&mut state, now)?;
        } else {
            tracing::debug!("Playback speed set to {}x", factor);
        }
        Ok(())
    }

    /// Pause playback. No-op without a session or when already paused.
    pub fn pause(&self) {
        let mut state = self.lock_state();
        let now = self.wall_clock.now_ms();
        let PlayerState { clock, session, .. } = &mut *state;
        let Some(session) = session.as_mut() else {
            return;
        };
        if session.paused {
            return;
        }
        clock.pause(now);
        session.cancel_armed();
        session.paused = true;
        tracing::info!(
            "Playback paused at vector {}/{}",
            session.cursor(),
            session.total()
        );
    }

    /// Resume playback from the next pending vector. No-op without a session
    /// or when not paused.
    pub fn resume(&self) -> Result<()> {
        let mut state = self.lock_state();
        let now = self.wall_clock.now_ms();
        let PlayerState { clock, session, .. } = &mut *state;
        let Some(session) = session.as_mut() else {
            return Ok(());
        };
        if !session.paused {
            return Ok(());
        }
        if session.cursor() >= session.total() {
            session.paused = false;
            return Ok(());
        }
        clock.resume(now);
        session.paused = false;
        tracing::info!(
            "Playback resumed at vector {}/{}",
            session.cursor(),
            session.total()
        );
        self.reschedule(&mut state, now)
    }

    /// Stop playback, discarding the loaded sequence
    pub fn stop_playback(&self) {
        let mut state = self.lock_state();
        if let Some(mut session) = state.session.take() {
            session.cancel_armed();
            tracing::info!(
                "Playback stopped after {}/{} vectors",
                session.cursor(),
                session.total()
            );
        }
        state.clock.reset();
    }

    /// Stop playback, detach all subscribers and release the timer thread.
    ///
    /// Waits up to the configured shutdown interval for a delivery in
    /// progress, then forces release. The player cannot be restarted.
    pub fn shutdown(&self) {
        self.stop_playback();
        self.bus.clear();
        self.timers.shutdown(self.shutdown_await);
        tracing::debug!("Playback player shut down");
    }

    /// Current playback state
    pub fn state(&self) -> PlaybackState {
        match self.lock_state().session.as_ref() {
            None => PlaybackState::Idle,
            Some(s) if s.paused => PlaybackState::Paused,
            Some(s) if s.cursor() >= s.total() => PlaybackState::Finished,
            Some(_) => PlaybackState::Playing,
        }
    }

    /// Check if a session is active (playing, paused or finished)
    pub fn is_active(&self) -> bool {
        self.lock_state().session.is_some()
    }

    /// Check if the active session is paused
    pub fn is_paused(&self) -> bool {
        self.lock_state().session.as_ref().is_some_and(|s| s.paused)
    }

    /// Configured speed factor
    pub fn speed(&self) -> f64 {
        self.lock_state().speed
    }

    /// Index of the next vector pending delivery (0 without a session)
    pub fn cursor(&self) -> usize {
        self.lock_state().session.as_ref().map_or(0, |s| s.cursor())
    }

    /// Number of vectors in the active session
    pub fn total_vectors(&self) -> usize {
        self.lock_state().session.as_ref().map_or(0, |s| s.total())
    }

    /// Position on the recorded timeline, in milliseconds from the first vector
    pub fn virtual_position_ms(&self) -> i64 {
        let state = self.lock_state();
        if state.session.is_none() {
            return 0;
        }
        state.clock.current_virtual_time(self.wall_clock.now_ms())
    }

    /// Fraction of vectors delivered (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        let state = self.lock_state();
        match state.session.as_ref() {
            Some(s) => s.cursor() as f64 / s.total() as f64,
            None => 0.0,
        }
    }
}

impl VectorStream for ReplayScheduler {
    fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    fn list_sensors(&self) -> Vec<SensorDescriptor> {
        self.sensors.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::clock::MockWallClock;
    use crate::types::Reading;
    use crossbeam_channel::{unbounded, Receiver};
    use serial_test::serial;
    use std::sync::atomic::AtomicI64;
    use std::time::Instant;

    fn vector(ts: i64) -> SensorVector {
        SensorVector::from_readings(
            ts,
            vec![
                Reading::pressure(ts, "p1", 101_325.0),
                Reading::temperature(ts + 5, "t1", 21.5),
            ],
        )
    }

    fn collect(player: &ReplayScheduler) -> Receiver<SensorVector> {
        let (tx, rx) = unbounded();
        player.subscribe(move |v| {
            tx.send(v.clone())?;
            Ok(())
        });
        rx
    }

    fn manual_clock() -> (Arc<AtomicI64>, Arc<dyn WallClock>) {
        let now = Arc::new(AtomicI64::new(10_000));
        let source = now.clone();
        let mut clock = MockWallClock::new();
        clock
            .expect_now_ms()
            .returning(move || source.load(Ordering::SeqCst));
        (now, Arc::new(clock))
    }

    #[test]
    fn test_rejects_invalid_input() {
        let player = ReplayScheduler::new().unwrap();

        let err = player.start_playback(Vec::new(), 0, false).unwrap_err();
        assert!(err.is_invalid_argument());

        let err = player
            .start_playback(vec![vector(0), SensorVector::empty(100)], 0, false)
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(!player.is_active());

        for bad in [0.0, -2.0, f64::NAN, f64::INFINITY] {
            assert!(player.set_speed(bad).unwrap_err().is_invalid_argument());
        }
        assert_eq!(player.speed(), 1.0);
        player.shutdown();
    }

    #[test]
    fn test_second_start_is_rejected_and_session_untouched() {
        let player = ReplayScheduler::new().unwrap();
        player
            .start_playback(vec![vector(0), vector(3_600_000)], 0, false)
            .unwrap();
        let err = player
            .start_playback(vec![vector(0)], 0, false)
            .unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(player.total_vectors(), 2);

        player.stop_playback();
        assert!(!player.is_active());
        player.start_playback(vec![vector(0)], 0, false).unwrap();
        player.shutdown();
    }

    #[test]
    fn test_virtual_position_follows_clock() {
        let (now, clock) = manual_clock();
        let player = ReplayScheduler::new().unwrap().with_clock(clock);
        player
            .start_playback(vec![vector(0), vector(3_600_000)], 0, true)
            .unwrap();
        assert_eq!(player.virtual_position_ms(), 0);

        now.store(10_500, Ordering::SeqCst);
        assert_eq!(player.virtual_position_ms(), 500);

        player.set_speed(2.0).unwrap();
        now.store(11_000, Ordering::SeqCst);
        assert_eq!(player.virtual_position_ms(), 1_500);

        player.pause();
        assert_eq!(player.state(), PlaybackState::Paused);
        now.store(20_000, Ordering::SeqCst);
        assert_eq!(player.virtual_position_ms(), 1_500);

        player.resume().unwrap();
        now.store(20_250, Ordering::SeqCst);
        assert_eq!(player.virtual_position_ms(), 2_000);

        player.stop_playback();
        assert_eq!(player.virtual_position_ms(), 0);
        // Configured speed survives the session
        assert_eq!(player.speed(), 2.0);
        player.shutdown();
    }

    #[test]
    fn test_extreme_speed_changes_do_not_panic() {
        let (now, clock) = manual_clock();
        let player = ReplayScheduler::new().unwrap().with_clock(clock);
        let rx = collect(&player);
        player
            .start_playback(vec![vector(0), vector(3_600_000)], 0, true)
            .unwrap();

        player.set_speed(1e300).unwrap();
        now.store(10_005, Ordering::SeqCst);
        player.set_speed(2.0).unwrap();
        now.store(10_010, Ordering::SeqCst);
        player.set_speed(3.0).unwrap();
        assert_eq!(player.virtual_position_ms(), i64::MAX);

        // Every pending vector is already due
        let got: Vec<_> = (0..2)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap().timestamp_ms())
            .collect();
        assert_eq!(got, vec![0, 3_600_000]);
        player.shutdown();
    }

    #[test]
    fn test_pause_and_resume_without_session_are_noops() {
        let player = ReplayScheduler::new().unwrap();
        player.pause();
        player.resume().unwrap();
        assert_eq!(player.state(), PlaybackState::Idle);
        player.set_speed(3.0).unwrap();
        assert_eq!(player.speed(), 3.0);
        player.shutdown();
    }

    #[test]
    #[serial]
    fn test_shifted_timestamps() {
        let player = ReplayScheduler::new().unwrap();
        let rx = collect(&player);
        player
            .start_playback(vec![vector(5_000), vector(5_040), vector(5_090)], 1_000_000, false)
            .unwrap();

        let got: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        let stamps: Vec<_> = got.iter().map(|v| v.timestamp_ms()).collect();
        assert_eq!(stamps, vec![1_000_000, 1_000_040, 1_000_090]);
        // Readings moved by the same delta
        assert_eq!(got[1].get("t1").unwrap().timestamp_ms, 1_000_045);
        assert_eq!(player.state(), PlaybackState::Finished);
        assert_eq!(player.progress(), 1.0);
        player.shutdown();
    }

    #[test]
    #[serial]
    fn test_original_timestamps() {
        let player = ReplayScheduler::new().unwrap();
        let rx = collect(&player);
        let vectors = vec![vector(5_000), vector(5_020)];
        player.start_playback(vectors.clone(), 0, true).unwrap();

        for expected in &vectors {
            let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(&got, expected);
        }
        player.shutdown();
    }

    #[test]
    #[serial]
    fn test_pause_holds_back_deliveries() {
        let player = ReplayScheduler::new().unwrap();
        let rx = collect(&player);
        player
            .start_playback(vec![vector(0), vector(150)], 0, false)
            .unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        player.pause();
        assert!(player.is_paused());

        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
        assert_eq!(player.cursor(), 1);

        let resumed_at = Instant::now();
        player.resume().unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(second.timestamp_ms(), 150);
        assert!(resumed_at.elapsed() < Duration::from_millis(400));
        player.shutdown();
    }

    #[test]
    #[serial]
    fn test_resume_after_last_vector_only_clears_pause() {
        let player = ReplayScheduler::new().unwrap();
        let rx = collect(&player);
        player.start_playback(vec![vector(0)], 0, false).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();

        player.pause();
        player.resume().unwrap();
        assert!(!player.is_paused());
        assert_eq!(player.state(), PlaybackState::Finished);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        player.shutdown();
    }

    #[test]
    #[serial]
    fn test_stop_cancels_pending() {
        let player = ReplayScheduler::new().unwrap();
        let rx = collect(&player);
        player
            .start_playback(vec![vector(0), vector(200)], 0, false)
            .unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        player.stop_playback();
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
        player.shutdown();
    }

    #[test]
    fn test_start_after_shutdown_fails() {
        let player = ReplayScheduler::new().unwrap();
        player.subscribe(|_| Ok(()));
        player.shutdown();
        assert_eq!(player.event_bus().subscriber_count(), 0);
        let err = player.start_playback(vec![vector(0)], 0, false).unwrap_err();
        assert!(err.is_invalid_state());
        // Shutting down twice is harmless
        player.shutdown();
    }

    #[test]
    fn test_duplicate_fire_is_noop() {
        let bus = EventBus::new();
        let (tx, rx) = unbounded();
        bus.subscribe(move |v| {
            tx.send(v.timestamp_ms())?;
            Ok(())
        });
        let delivery = Delivery {
            vectors: vec![vector(0), vector(10), vector(20)].into(),
            cursor: Arc::new(AtomicUsize::new(0)),
            bus,
            first_vector_time: 0,
            start_time: 100,
            use_original_timestamps: false,
        };

        // Index 2 waking first delivers the earlier ones in order
        delivery.fire(2);
        delivery.fire(0);
        delivery.fire(1);
        delivery.fire(2);

        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(got, vec![100, 110, 120]);
        assert_eq!(delivery.cursor.load(Ordering::SeqCst), 3);
    }
}

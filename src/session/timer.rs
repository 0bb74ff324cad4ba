//! Single-threaded timer facility for playback deliveries.
//!
//! Timers run on a dedicated tokio runtime with exactly one worker thread, so
//! all firings for one player are serialised. Cancelling a timer aborts its
//! task: a timer still waiting never fires, while a callback that is already
//! executing runs to completion (the callback contains no await point).

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::error::{ReplayError, Result};

/// Handle to one armed timer
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Prevent the timer from firing if it has not started yet
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Check whether the timer has fired or been cancelled
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Owns the timer thread and arms delayed callbacks on it
pub struct TimerFacility {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
}

impl std::fmt::Debug for TimerFacility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerFacility")
            .field("running", &self.is_running())
            .finish()
    }
}

impl TimerFacility {
    /// Spawn the timer thread
    pub fn new(thread_name: &str) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(thread_name)
            .enable_time()
            .build()
            .map_err(|e| {
                ReplayError::Io(e).with_context("Failed to start playback timer thread")
            })?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
        })
    }

    /// Check whether timers can still be armed
    pub fn is_running(&self) -> bool {
        self.runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run `task` on the timer thread once `delay` has elapsed
    pub fn schedule<F>(&self, delay: Duration, task: F) -> Result<TimerHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            return Err(ReplayError::InvalidState(
                "timer facility has been shut down".to_string(),
            ));
        }
        let task = self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task();
        });
        Ok(TimerHandle { task })
    }

    /// Stop the timer thread, waiting up to `timeout` for a running callback
    /// to finish before abandoning it. Pending timers are dropped. Calling it
    /// again is a no-op.
    pub fn shutdown(&self, timeout: Duration) {
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(runtime) = runtime else {
            return;
        };

        if Handle::try_current().is_ok() {
            // Blocking is not allowed from inside a runtime (e.g. a subscriber
            // shutting the player down from a delivery callback).
            tracing::warn!("Timer shutdown requested from async context, not waiting");
            runtime.shutdown_background();
            return;
        }

        let started = std::time::Instant::now();
        runtime.shutdown_timeout(timeout);
        let waited = started.elapsed();
        if waited >= timeout {
            tracing::warn!(
                "Timer thread did not stop within {:?}, forced release",
                timeout
            );
        } else {
            tracing::debug!("Timer thread stopped after {:?}", waited);
        }
    }
}

impl Drop for TimerFacility {
    fn drop(&mut self) {
        let runtime = self
            .runtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_timer_fires_after_delay() {
        let timers = TimerFacility::new("test-timer").unwrap();
        let (tx, rx) = bounded(1);
        let armed_at = Instant::now();
        timers
            .schedule(Duration::from_millis(50), move || {
                let _ = tx.send(Instant::now());
            })
            .unwrap();

        let fired_at = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(fired_at.duration_since(armed_at) >= Duration::from_millis(45));
        timers.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let timers = TimerFacility::new("test-timer").unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let handle = timers
            .schedule(Duration::from_millis(100), move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        handle.cancel();

        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(handle.is_finished());
        timers.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_cancel_does_not_interrupt_running_callback() {
        let timers = TimerFacility::new("test-timer").unwrap();
        let (started_tx, started_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        let handle = timers
            .schedule(Duration::ZERO, move || {
                let _ = started_tx.send(());
                std::thread::sleep(Duration::from_millis(100));
                let _ = done_tx.send(());
            })
            .unwrap();

        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        handle.cancel();
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        timers.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_schedule_after_shutdown_fails() {
        let timers = TimerFacility::new("test-timer").unwrap();
        timers.shutdown(Duration::from_millis(100));
        assert!(!timers.is_running());
        let err = timers.schedule(Duration::ZERO, || {}).unwrap_err();
        assert!(err.is_invalid_state());
        // Second shutdown is a no-op
        timers.shutdown(Duration::from_millis(100));
    }
}

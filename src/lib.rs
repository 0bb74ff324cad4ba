//! # leakrig: sensor vector replay and streaming
//!
//! Replays recorded pressure, temperature and humidity readings with their
//! original relative timing, so downstream processing can be exercised
//! against a recording exactly as it would run against live sensors.
//!
//! ## Architecture
//!
//! - **Types**: Readings and timestamped [`SensorVector`]s, immutable once built
//! - **Streams**: An [`EventBus`] fans vectors out to subscribers; live
//!   sources and mergers publish through the same interface
//! - **Session**: The [`ReplayScheduler`] arms one timer per recorded vector
//!   against a virtual clock that supports pause, resume and speed changes
//! - **Config**: Replay settings in TOML and site sensor rosters in JSON
//!
//! ## Example
//!
//! ```ignore
//! use leakrig::{Recording, ReplayScheduler, VectorStream};
//!
//! let recording = Recording::load_from_file("night.json".as_ref())?;
//! let player = ReplayScheduler::new()?;
//! player.subscribe(|vector| {
//!     println!("{} readings @{}", vector.len(), vector.timestamp_ms());
//!     Ok(())
//! });
//! player.start_playback(recording.vectors, chrono::Utc::now().timestamp_millis(), false)?;
//! ```

pub mod config;
pub mod error;
pub mod session;
pub mod stream;
pub mod types;

// Re-export commonly used types
pub use config::{ReplayConfig, SensorDescriptor, SiteConfig};
pub use error::{HandlerError, ReplayError, Result};
pub use session::{CsvRecorder, PlaybackState, Recording, RecordingMetadata, ReplayScheduler};
pub use stream::{EventBus, LiveFeed, LiveStream, StreamMerger, Subscription, VectorStream};
pub use types::{Reading, ReadingKind, SensorVector};

//! Session recording and playback module
//!
//! This module replays recorded vector sequences onto an event bus with their
//! original relative timing, and records live or replayed streams to disk.
//!
//! # Features
//!
//! - Replay recordings at original or variable speed, with pause and resume
//! - Re-timestamp replayed vectors onto a new start time
//! - Load and save recordings as JSON
//! - Record any stream to CSV

pub mod clock;
pub mod player;
pub mod recorder;
pub mod timer;
pub mod types;

pub use clock::{SystemClock, VirtualClock, WallClock};
pub use player::ReplayScheduler;
pub use recorder::CsvRecorder;
pub use types::{PlaybackState, Recording, RecordingMetadata};

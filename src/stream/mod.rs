//! Vector streams
//!
//! - [`EventBus`] - Fan-out of vectors to subscribers
//! - [`VectorStream`] - Anything that publishes vectors through a bus
//! - [`LiveStream`] - Stream fed by producer threads
//! - [`StreamMerger`] - Data stream resampled onto a timing stream

pub mod bus;
pub mod live;
pub mod merger;

pub use bus::{EventBus, Subscription, VectorHandler, VectorStream};
pub use live::{LiveFeed, LiveStream};
pub use merger::StreamMerger;

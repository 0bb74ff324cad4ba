//! Error handling for leakrig
//!
//! This module defines the crate error type and a Result alias used
//! throughout the streaming and replay code.

use thiserror::Error;

/// Main error type for leakrig operations
#[derive(Error, Debug)]
pub enum ReplayError {
    /// An argument was rejected before any state was touched
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to recording files
    #[error("Recording error: {0}")]
    Recording(String),

    /// Errors raised by the CSV recorder
    #[error("Recorder error: {0}")]
    Recorder(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ReplayError>,
    },
}

impl ReplayError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ReplayError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check whether this is (or wraps) an invalid argument error
    pub fn is_invalid_argument(&self) -> bool {
        match self {
            ReplayError::InvalidArgument(_) => true,
            ReplayError::WithContext { source, .. } => source.is_invalid_argument(),
            _ => false,
        }
    }

    /// Check whether this is (or wraps) an invalid state error
    pub fn is_invalid_state(&self) -> bool {
        match self {
            ReplayError::InvalidState(_) => true,
            ReplayError::WithContext { source, .. } => source.is_invalid_state(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ReplayError {
    fn from(err: serde_json::Error) -> Self {
        ReplayError::Serialization(err.to_string())
    }
}

/// Result type alias for leakrig operations
pub type Result<T> = std::result::Result<T, ReplayError>;

/// Error type returned by vector subscribers.
///
/// Handlers are plug-ins written outside this crate, so their failures are
/// carried as boxed dynamic errors.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ReplayError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ReplayError::Io(e).with_context(f()))
    }
}

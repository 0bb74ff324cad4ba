//! Session data types

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ReplayError, Result, ResultExt};
use crate::types::SensorVector;

/// State of a replay session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// No session loaded
    #[default]
    Idle,
    /// Vectors are being delivered
    Playing,
    /// Session loaded, deliveries suspended
    Paused,
    /// Every vector of the session has been delivered
    Finished,
}

impl PlaybackState {
    /// Check if a session is loaded
    pub fn is_active(&self) -> bool {
        !matches!(self, PlaybackState::Idle)
    }

    /// Display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "Idle",
            PlaybackState::Playing => "Playing",
            PlaybackState::Paused => "Paused",
            PlaybackState::Finished => "Finished",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Metadata for a recorded vector sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingMetadata {
    /// Name/title of the recording
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// When the recording was made
    pub recorded_at: chrono::DateTime<chrono::Utc>,
    /// Number of vectors recorded
    #[serde(default)]
    pub vector_count: usize,
}

impl Default for RecordingMetadata {
    fn default() -> Self {
        Self {
            name: String::from("Untitled Recording"),
            description: None,
            recorded_at: chrono::Utc::now(),
            vector_count: 0,
        }
    }
}

impl RecordingMetadata {
    /// Create new metadata with a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A recorded vector sequence, stored as JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recording {
    /// Recording metadata
    pub metadata: RecordingMetadata,
    /// Vectors ordered by timestamp
    pub vectors: Vec<SensorVector>,
}

impl Recording {
    /// Create a recording from vectors, filling in the vector count
    pub fn new(metadata: RecordingMetadata, vectors: Vec<SensorVector>) -> Self {
        let mut recording = Self { metadata, vectors };
        recording.finalize();
        recording
    }

    /// Timeline length: last timestamp minus first
    pub fn duration_ms(&self) -> i64 {
        match (self.vectors.first(), self.vectors.last()) {
            (Some(first), Some(last)) => last.timestamp_ms() - first.timestamp_ms(),
            _ => 0,
        }
    }

    /// Get the number of vectors
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Check if the recording is empty
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Check that the recording can be replayed: non-empty, every vector has
    /// readings and timestamps never decrease.
    pub fn validate(&self) -> Result<()> {
        if self.vectors.is_empty() {
            return Err(ReplayError::Recording("recording has no vectors".to_string()));
        }
        if let Some(index) = self.vectors.iter().position(|v| v.is_empty()) {
            return Err(ReplayError::Recording(format!(
                "vector {} has no readings",
                index
            )));
        }
        if let Some(index) = self
            .vectors
            .windows(2)
            .position(|w| w[1].timestamp_ms() < w[0].timestamp_ms())
        {
            return Err(ReplayError::Recording(format!(
                "vector {} is earlier than its predecessor",
                index + 1
            )));
        }
        Ok(())
    }

    /// Update metadata from the vectors
    pub fn finalize(&mut self) {
        self.metadata.vector_count = self.vectors.len();
    }

    /// Save recording to a file (JSON format)
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write recording {}", path.display()))
    }

    /// Load recording from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read recording {}", path.display()))?;
        let mut recording: Self = serde_json::from_str(&json).map_err(|e| {
            ReplayError::Recording(format!("{}: {}", path.display(), e))
        })?;
        recording.finalize();
        Ok(recording)
    }
}

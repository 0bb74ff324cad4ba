//! CSV recorder for capturing vector streams to disk
//!
//! Each row holds a UTC timestamp in milliseconds followed by one value per
//! sensor, in the default unit of its kind. Missing readings are written as
//! empty cells.
//!
//! The header is `timestamp` followed by the sensor ids of the stream's roster,
//! or, when the roster is empty, the ids of the first recorded vector in
//! sorted order. An existing file is appended to only if its header matches
//! and its last timestamp lies within one hour of the first incoming vector.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::{HandlerError, ReplayError, Result, ResultExt};
use crate::stream::{VectorHandler, VectorStream};
use crate::types::SensorVector;

/// Maximum gap between an existing file's last row and the first appended one
pub const MAX_APPEND_GAP_MS: i64 = 60 * 60 * 1000;

const TIMESTAMP_COLUMN: &str = "timestamp";

/// Writes every received vector as a CSV row
#[derive(Debug)]
pub struct CsvRecorder {
    path: PathBuf,
    roster: Vec<String>,
    /// Column layout, fixed by the first write
    schema: Mutex<Option<Vec<String>>>,
}

impl CsvRecorder {
    /// Create a recorder with no roster; columns come from the first vector
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            roster: Vec::new(),
            schema: Mutex::new(None),
        }
    }

    /// Create a recorder whose columns follow `stream`'s sensor roster
    pub fn for_stream(path: impl Into<PathBuf>, stream: &dyn VectorStream) -> Self {
        let roster = stream.list_sensors().into_iter().map(|s| s.id).collect();
        Self {
            roster,
            ..Self::new(path)
        }
    }

    /// Target file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Column layout, once the first vector has been written
    pub fn columns(&self) -> Option<Vec<String>> {
        self.schema
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Write one vector, creating or validating the file on first use
    pub fn record(&self, vector: &SensorVector) -> Result<()> {
        let mut schema = self.schema.lock().unwrap_or_else(PoisonError::into_inner);
        let columns = match schema.take() {
            Some(columns) => columns,
            None => {
                let columns = self.build_schema(vector);
                self.open_file(&columns, vector)?;
                columns
            }
        };
        let row = to_row(&columns, vector);
        *schema = Some(columns);
        self.append_lines(&[row]).map_err(|e| {
            tracing::error!("Failed to write CSV row to {}: {}", self.path.display(), e);
            e
        })
    }

    fn build_schema(&self, vector: &SensorVector) -> Vec<String> {
        let mut columns = vec![TIMESTAMP_COLUMN.to_string()];
        if self.roster.is_empty() {
            let mut ids: Vec<String> = vector.source_ids().map(str::to_string).collect();
            ids.sort();
            columns.extend(ids);
        } else {
            columns.extend(self.roster.iter().cloned());
        }
        columns
    }

    /// Write the header to an empty file, or check that an existing file can
    /// be continued with `first`
    fn open_file(&self, columns: &[String], first: &SensorVector) -> Result<()> {
        let lines = self.read_lines()?;
        let blank = lines.iter().all(|l| l.trim().is_empty());
        if blank {
            tracing::info!("Creating CSV recording {}", self.path.display());
            File::create(&self.path)
                .with_context(|| format!("Failed to create {}", self.path.display()))?;
            return self.append_lines(&[columns.join(",")]);
        }

        if lines.len() < 2 {
            return Err(ReplayError::Recorder(format!(
                "{} has a header but no rows to continue",
                self.path.display()
            )));
        }
        let existing: Vec<&str> = lines[0].split(',').collect();
        let matches = existing.len() == columns.len()
            && existing
                .iter()
                .zip(columns)
                .all(|(found, expected)| found.trim().eq_ignore_ascii_case(expected));
        if !matches {
            return Err(ReplayError::Recorder(format!(
                "header of {} does not match sensors; expected {}, found {}",
                self.path.display(),
                columns.join(","),
                lines[0]
            )));
        }

        let last = last_timestamp(&lines).ok_or_else(|| {
            ReplayError::Recorder(format!("no timestamp found in {}", self.path.display()))
        })?;
        if (first.timestamp_ms() - last).abs() > MAX_APPEND_GAP_MS {
            return Err(ReplayError::Recorder(format!(
                "last row of {} (@{}) is more than an hour from incoming vector (@{})",
                self.path.display(),
                last,
                first.timestamp_ms()
            )));
        }
        tracing::info!("Appending to CSV recording {}", self.path.display());
        Ok(())
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        BufReader::new(file)
            .lines()
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("Failed to read {}", self.path.display()))
    }

    fn append_lines(&self, lines: &[String]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        for line in lines {
            writeln!(file, "{}", line)
                .with_context(|| format!("Failed to write {}", self.path.display()))?;
        }
        Ok(())
    }
}

impl VectorHandler for CsvRecorder {
    fn handle(&self, vector: &SensorVector) -> std::result::Result<(), HandlerError> {
        self.record(vector).map_err(Into::into)
    }
}

fn to_row(columns: &[String], vector: &SensorVector) -> String {
    let mut cells = Vec::with_capacity(columns.len());
    cells.push(vector.timestamp_ms().to_string());
    for id in columns.iter().skip(1) {
        cells.push(
            vector
                .get(id)
                .map(|r| r.value.to_string())
                .unwrap_or_default(),
        );
    }
    cells.join(",")
}

/// Timestamp of the last data row, skipping lines that do not start with one
fn last_timestamp(lines: &[String]) -> Option<i64> {
    lines
        .iter()
        .skip(1)
        .rev()
        .filter_map(|line| line.split(',').next())
        .find_map(|cell| cell.trim().parse().ok())
}

//! Core data model: points, batches, and task metadata
//!
//! A [`Point`] is the unit of a stream recording; a [`Batch`] is the unit
//! of a batch recording, carrying one query-window result. Both use
//! string tag maps and JSON field values with nanosecond timestamps.

pub mod codec;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SluiceError;

/// Tag set attached to points, batches, and batch rows.
pub type Tags = BTreeMap<String, String>;

/// Field values carried by points and batch rows.
pub type Fields = BTreeMap<String, Value>;

/// The two task shapes. Determines the recording format and replay path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Stream,
    Batch,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::Stream => write!(f, "stream"),
            TaskType::Batch => write!(f, "batch"),
        }
    }
}

impl FromStr for TaskType {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" => Ok(TaskType::Stream),
            "batch" => Ok(TaskType::Batch),
            other => Err(SluiceError::request(format!(
                "invalid task type {:?}",
                other
            ))),
        }
    }
}

/// A (database, retention policy) pair identifying a logical data stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dbrp {
    pub database: String,
    pub retention_policy: String,
}

impl Dbrp {
    pub fn new(database: impl Into<String>, retention_policy: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            retention_policy: retention_policy.into(),
        }
    }
}

impl fmt::Display for Dbrp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}.{:?}", self.database, self.retention_policy)
    }
}

/// A single telemetry point.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Measurement name
    pub name: String,
    pub database: String,
    pub retention_policy: String,
    pub tags: Tags,
    pub fields: Fields,
    /// Nanosecond-precision timestamp
    pub time: DateTime<Utc>,
}

impl Point {
    /// The logical stream this point belongs to.
    pub fn dbrp(&self) -> Dbrp {
        Dbrp::new(self.database.clone(), self.retention_policy.clone())
    }
}

/// One row of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPoint {
    pub time: DateTime<Utc>,
    pub tags: Tags,
    pub fields: Fields,
}

/// One query-window result: an ordered run of rows sharing a name and a
/// group-by tag set. `window_end` is the upper bound of the window and
/// the pacing anchor during replay.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub name: String,
    /// Group-by tag set
    pub tags: Tags,
    pub window_end: DateTime<Utc>,
    pub points: Vec<BatchPoint>,
}

//! Time-series database client contract and result conversion
//!
//! The service never speaks to the TSDB directly; it goes through the
//! [`TsdbClient`] trait. Responses follow the familiar
//! results/series/columns/values table shape, and
//! [`result_to_batches`] turns one result into the [`Batch`]es the
//! recorder archives.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SluiceError};
use crate::models::{Batch, BatchPoint, Fields, Tags};

/// A single query statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub command: String,
}

impl Query {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

/// One series table of a query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    #[serde(default)]
    pub tags: Tags,
    pub columns: Vec<String>,
    pub values: Vec<Vec<Value>>,
}

/// One statement's result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub series: Vec<Series>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A full query response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub results: Vec<QueryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// First error carried anywhere in the response.
    pub fn error(&self) -> Option<&str> {
        if let Some(e) = self.error.as_deref() {
            return Some(e);
        }
        self.results.iter().find_map(|r| r.error.as_deref())
    }
}

/// Client contract for executing queries against the TSDB.
#[async_trait]
pub trait TsdbClient: Send + Sync {
    async fn query(&self, q: Query) -> Result<Response>;
}

/// Convert one query result into batches, one per series.
///
/// Each series must carry a `time` column; rows become batch rows with
/// the remaining columns as fields, and the series group-by tags become
/// the batch tags. The window end is the last row's time (rows arrive in
/// time order). Empty series produce no batch.
pub fn result_to_batches(result: &QueryResult) -> Result<Vec<Batch>> {
    if let Some(e) = &result.error {
        return Err(SluiceError::tsdb(e.clone()));
    }

    let mut batches = Vec::with_capacity(result.series.len());
    for series in &result.series {
        let time_idx = series
            .columns
            .iter()
            .position(|c| c == "time")
            .ok_or_else(|| {
                SluiceError::tsdb(format!("series {:?} has no time column", series.name))
            })?;

        let mut points = Vec::with_capacity(series.values.len());
        for row in &series.values {
            if row.len() != series.columns.len() {
                return Err(SluiceError::tsdb(format!(
                    "series {:?} row width {} does not match {} columns",
                    series.name,
                    row.len(),
                    series.columns.len()
                )));
            }
            let time = parse_time_value(&row[time_idx])?;
            let mut fields = Fields::new();
            for (idx, column) in series.columns.iter().enumerate() {
                if idx == time_idx || row[idx].is_null() {
                    continue;
                }
                fields.insert(column.clone(), row[idx].clone());
            }
            points.push(BatchPoint {
                time,
                tags: series.tags.clone(),
                fields,
            });
        }

        let window_end = match points.last() {
            Some(last) => last.time,
            None => continue,
        };
        batches.push(Batch {
            name: series.name.clone(),
            tags: series.tags.clone(),
            window_end,
            points,
        });
    }
    Ok(batches)
}

/// Accept either integer nanoseconds or an RFC 3339 string.
fn parse_time_value(v: &Value) -> Result<DateTime<Utc>> {
    match v {
        Value::Number(n) => {
            let nanos = n
                .as_i64()
                .ok_or_else(|| SluiceError::tsdb(format!("bad time value: {}", n)))?;
            Ok(DateTime::from_timestamp_nanos(nanos))
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| SluiceError::tsdb(format!("bad time value {:?}: {}", s, e))),
        other => Err(SluiceError::tsdb(format!("bad time value: {}", other))),
    }
}

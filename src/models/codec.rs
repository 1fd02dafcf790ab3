//! Wire codec for recorded points and batches
//!
//! Recordings are newline-delimited JSON: one serialized point or batch
//! per line. Point timestamps are written as integers in the tagged
//! precision (the service records at nanosecond precision throughout);
//! batch window bounds and row times are always nanoseconds. Write
//! followed by read round-trips losslessly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read, Write};
use std::str::FromStr;

use crate::error::{Result, SluiceError};
use crate::models::{Batch, BatchPoint, Fields, Point, Tags};

/// Timestamp precision tag attached to serialized points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Precision {
    #[default]
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Nanosecond => "n",
            Precision::Microsecond => "u",
            Precision::Millisecond => "ms",
            Precision::Second => "s",
        }
    }

    /// Nanoseconds per unit of this precision.
    fn nanos_per_unit(&self) -> i64 {
        match self {
            Precision::Nanosecond => 1,
            Precision::Microsecond => 1_000,
            Precision::Millisecond => 1_000_000,
            Precision::Second => 1_000_000_000,
        }
    }
}

impl FromStr for Precision {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "n" => Ok(Precision::Nanosecond),
            "u" => Ok(Precision::Microsecond),
            "ms" => Ok(Precision::Millisecond),
            "s" => Ok(Precision::Second),
            other => Err(SluiceError::decode(format!(
                "unknown precision {:?}",
                other
            ))),
        }
    }
}

fn time_to_units(t: DateTime<Utc>, precision: Precision) -> Result<i64> {
    let nanos = t
        .timestamp_nanos_opt()
        .ok_or_else(|| SluiceError::decode(format!("timestamp out of range: {}", t)))?;
    Ok(nanos / precision.nanos_per_unit())
}

fn units_to_time(units: i64, precision: Precision) -> Result<DateTime<Utc>> {
    let nanos = units
        .checked_mul(precision.nanos_per_unit())
        .ok_or_else(|| SluiceError::decode(format!("timestamp out of range: {}", units)))?;
    Ok(DateTime::from_timestamp_nanos(nanos))
}

#[derive(Serialize, Deserialize)]
struct WirePoint {
    name: String,
    database: String,
    retention_policy: String,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    tags: Tags,
    fields: Fields,
    time: i64,
    /// Absent frames fall back to the reader's default precision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    precision: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireBatchPoint {
    time: i64,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    tags: Tags,
    fields: Fields,
}

#[derive(Serialize, Deserialize)]
struct WireBatch {
    name: String,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    tags: Tags,
    window_end: i64,
    points: Vec<WireBatchPoint>,
}

/// Serialize one point as a recording frame.
pub fn write_point_for_recording<W: Write>(
    w: &mut W,
    p: &Point,
    precision: Precision,
) -> Result<()> {
    let wire = WirePoint {
        name: p.name.clone(),
        database: p.database.clone(),
        retention_policy: p.retention_policy.clone(),
        tags: p.tags.clone(),
        fields: p.fields.clone(),
        time: time_to_units(p.time, precision)?,
        precision: Some(precision.as_str().to_string()),
    };
    let line = serde_json::to_string(&wire).map_err(|e| SluiceError::decode(e.to_string()))?;
    writeln!(w, "{}", line)?;
    Ok(())
}

/// Serialize one batch as a recording frame.
pub fn write_batch_for_recording<W: Write>(w: &mut W, b: &Batch) -> Result<()> {
    let wire = WireBatch {
        name: b.name.clone(),
        tags: b.tags.clone(),
        window_end: time_to_units(b.window_end, Precision::Nanosecond)?,
        points: b
            .points
            .iter()
            .map(|bp| {
                Ok(WireBatchPoint {
                    time: time_to_units(bp.time, Precision::Nanosecond)?,
                    tags: bp.tags.clone(),
                    fields: bp.fields.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?,
    };
    let line = serde_json::to_string(&wire).map_err(|e| SluiceError::decode(e.to_string()))?;
    writeln!(w, "{}", line)?;
    Ok(())
}

/// Streaming decoder for stream recordings.
pub struct PointReader<R: Read> {
    reader: BufReader<R>,
    line: String,
    default_precision: Precision,
}

impl<R: Read> PointReader<R> {
    pub fn new(src: R) -> Self {
        Self::with_default_precision(src, Precision::Nanosecond)
    }

    /// Decoder using `precision` for frames that carry no precision tag.
    pub fn with_default_precision(src: R, precision: Precision) -> Self {
        Self {
            reader: BufReader::new(src),
            line: String::new(),
            default_precision: precision,
        }
    }
}

impl<R: Read> Iterator for PointReader<R> {
    type Item = Result<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            let wire: WirePoint = match serde_json::from_str(line) {
                Ok(w) => w,
                Err(e) => {
                    return Some(Err(SluiceError::decode(format!(
                        "bad point frame: {}",
                        e
                    ))))
                }
            };
            let precision = match wire.precision.as_deref() {
                Some(tag) => match tag.parse::<Precision>() {
                    Ok(p) => p,
                    Err(e) => return Some(Err(e)),
                },
                None => self.default_precision,
            };
            let time = match units_to_time(wire.time, precision) {
                Ok(t) => t,
                Err(e) => return Some(Err(e)),
            };
            return Some(Ok(Point {
                name: wire.name,
                database: wire.database,
                retention_policy: wire.retention_policy,
                tags: wire.tags,
                fields: wire.fields,
                time,
            }));
        }
    }
}

/// Streaming decoder for one batch slot.
pub struct BatchReader<R: Read> {
    reader: BufReader<R>,
    line: String,
}

impl<R: Read> BatchReader<R> {
    pub fn new(src: R) -> Self {
        Self {
            reader: BufReader::new(src),
            line: String::new(),
        }
    }
}

impl<R: Read> Iterator for BatchReader<R> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            let wire: WireBatch = match serde_json::from_str(line) {
                Ok(w) => w,
                Err(e) => {
                    return Some(Err(SluiceError::decode(format!(
                        "bad batch frame: {}",
                        e
                    ))))
                }
            };
            return Some(decode_batch(wire));
        }
    }
}

fn decode_batch(wire: WireBatch) -> Result<Batch> {
    let points = wire
        .points
        .into_iter()
        .map(|bp| {
            Ok(BatchPoint {
                time: units_to_time(bp.time, Precision::Nanosecond)?,
                tags: bp.tags,
                fields: bp.fields,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Batch {
        name: wire.name,
        tags: wire.tags,
        window_end: units_to_time(wire.window_end, Precision::Nanosecond)?,
        points,
    })
}

//! On-disk recording catalog
//!
//! Every recording is one file directly under the save directory, named
//! `<RecordingID><ext>`. The extension is authoritative for the type:
//! `.srpl` is a gzip-compressed run of serialized points, `.brpl` is a
//! ZIP archive whose entries are named by batch slot index (`0..N-1`).
//! A file appears for the catalog the moment its writer closes
//! successfully; a writer that did not close cleanly leaves the file in
//! an undefined state, and it is never removed automatically.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::{Result, SluiceError};
use crate::models::TaskType;

/// Extension of stream recordings.
pub const STREAM_EXT: &str = ".srpl";
/// Extension of batch recordings.
pub const BATCH_EXT: &str = ".brpl";

/// Catalog entry for one recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingInfo {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Type")]
    pub task_type: TaskType,
    /// Byte count on disk
    #[serde(rename = "Size")]
    pub size: u64,
    /// Derived from file mtime
    #[serde(rename = "Created")]
    pub created: DateTime<Utc>,
}

/// Durable store of recordings under one save directory.
pub struct RecordingStore {
    dir: PathBuf,
}

impl RecordingStore {
    /// Open a store, creating the save directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List recordings, optionally filtered to the given IDs.
    ///
    /// Subdirectories and unrecognized extensions are skipped; filter IDs
    /// with no recording are silently omitted.
    pub fn list(&self, ids: &[String]) -> Result<Vec<RecordingInfo>> {
        let mut infos = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let (id, task_type) = match recording_name(&name) {
                Some(parsed) => parsed,
                None => continue,
            };
            if !ids.is_empty() && !ids.iter().any(|i| i == id) {
                continue;
            }
            let created = meta.modified().map(DateTime::<Utc>::from)?;
            infos.push(RecordingInfo {
                id: id.to_string(),
                task_type,
                size: meta.len(),
                created,
            });
        }
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(infos)
    }

    /// Readable handle on a stream recording, decompressing transparently.
    pub fn find_stream(&self, id: &str) -> Result<GzDecoder<File>> {
        let f = self.find_file(id, TaskType::Stream)?;
        Ok(GzDecoder::new(f))
    }

    /// Per-slot readers of a batch recording, in archive order (the
    /// recorder writes entries in slot order).
    pub fn find_batch(&self, id: &str) -> Result<Vec<Cursor<Vec<u8>>>> {
        let f = self.find_file(id, TaskType::Batch)?;
        let mut archive = ZipArchive::new(f)?;
        let mut slots = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            slots.push(Cursor::new(buf));
        }
        Ok(slots)
    }

    /// Remove a recording. Idempotent and best-effort: missing files are
    /// not an error, and filesystem failures are only logged.
    pub fn delete(&self, id: &str) {
        for ext in [STREAM_EXT, BATCH_EXT] {
            let path = self.path_for(id, ext);
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "deleted recording file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "delete failed"),
            }
        }
    }

    /// Create `<id>.srpl` and layer gzip over it.
    pub fn stream_writer(&self, id: &str) -> Result<StreamWriter> {
        let path = self.path_for(id, STREAM_EXT);
        let f = File::create(&path)?;
        Ok(StreamWriter {
            gz: GzEncoder::new(f, Compression::default()),
        })
    }

    /// Create `<id>.brpl` and layer a ZIP writer over it.
    pub fn batch_archive(&self, id: &str) -> Result<BatchArchive> {
        let path = self.path_for(id, BATCH_EXT);
        let f = File::create(&path)?;
        Ok(BatchArchive {
            zip: ZipWriter::new(f),
        })
    }

    fn path_for(&self, id: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{}{}", id, ext))
    }

    fn find_file(&self, id: &str, task_type: TaskType) -> Result<File> {
        let (ext, other) = match task_type {
            TaskType::Stream => (STREAM_EXT, BATCH_EXT),
            TaskType::Batch => (BATCH_EXT, STREAM_EXT),
        };
        match File::open(self.path_for(id, ext)) {
            Ok(f) => Ok(f),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.path_for(id, other).exists() {
                    Err(SluiceError::WrongRecordingType(id.to_string()))
                } else {
                    Err(SluiceError::RecordingNotFound(id.to_string()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn recording_name(name: &str) -> Option<(&str, TaskType)> {
    if let Some(id) = name.strip_suffix(STREAM_EXT) {
        Some((id, TaskType::Stream))
    } else {
        name.strip_suffix(BATCH_EXT)
            .map(|id| (id, TaskType::Batch))
    }
}

/// Gzip-layered writer for a stream recording.
///
/// [`close`](StreamWriter::close) flushes the gzip stream, then the
/// file; the first error wins.
pub struct StreamWriter {
    gz: GzEncoder<File>,
}

impl StreamWriter {
    pub fn close(self) -> Result<()> {
        let f = self.gz.finish()?;
        f.sync_all()?;
        Ok(())
    }
}

impl Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.gz.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.gz.flush()
    }
}

/// ZIP-layered writer for a batch recording.
///
/// [`create`](BatchArchive::create) opens the entry for one batch slot;
/// writes then go to that entry until the next `create`. Entries must be
/// written in slot order. [`close`](BatchArchive::close) finalizes the
/// central directory and then the file; a finalize error still closes
/// the file and is surfaced.
pub struct BatchArchive {
    zip: ZipWriter<File>,
}

impl BatchArchive {
    pub fn create(&mut self, index: usize) -> Result<()> {
        self.zip
            .start_file(index.to_string(), FileOptions::default())?;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        let f = self.zip.finish()?;
        f.sync_all()?;
        Ok(())
    }
}

impl Write for BatchArchive {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.zip.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.zip.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::codec::{
        write_batch_for_recording, write_point_for_recording, BatchReader, PointReader,
        Precision,
    };
    use crate::models::{Batch, BatchPoint, Fields, Point, Tags};
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use tempfile::TempDir;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(1971, 1, 1, 0, 0, 0).unwrap()
    }

    fn sample_point(i: i64) -> Point {
        let mut fields = Fields::new();
        fields.insert("value".to_string(), json!(i as f64));
        Point {
            name: "packets".to_string(),
            database: "telegraf".to_string(),
            retention_policy: "default".to_string(),
            tags: Tags::new(),
            fields,
            time: base() + Duration::seconds(i),
        }
    }

    fn sample_batch(end_secs: i64) -> Batch {
        let mut fields = Fields::new();
        fields.insert("value".to_string(), json!(end_secs as f64));
        Batch {
            name: "packets".to_string(),
            tags: Tags::new(),
            window_end: base() + Duration::seconds(end_secs),
            points: vec![BatchPoint {
                time: base() + Duration::seconds(end_secs - 2),
                tags: Tags::new(),
                fields,
            }],
        }
    }

    fn store() -> (RecordingStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = RecordingStore::new(tmp.path().join("recordings")).unwrap();
        (store, tmp)
    }

    #[test]
    fn test_stream_round_trip() {
        let (store, _tmp) = store();
        let points: Vec<Point> = (0..20).map(sample_point).collect();

        let mut w = store.stream_writer("rec-a").unwrap();
        for p in &points {
            write_point_for_recording(&mut w, p, Precision::Nanosecond).unwrap();
        }
        w.close().unwrap();

        let decoded: Vec<Point> = PointReader::new(store.find_stream("rec-a").unwrap())
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(decoded, points);
    }

    #[test]
    fn test_batch_round_trip_across_slots() {
        let (store, _tmp) = store();
        let slots: Vec<Vec<Batch>> = vec![
            vec![sample_batch(10), sample_batch(20)],
            vec![sample_batch(10)],
            vec![sample_batch(30), sample_batch(40), sample_batch(50)],
        ];

        let mut archive = store.batch_archive("rec-b").unwrap();
        for (i, batches) in slots.iter().enumerate() {
            archive.create(i).unwrap();
            for b in batches {
                write_batch_for_recording(&mut archive, b).unwrap();
            }
        }
        archive.close().unwrap();

        let readers = store.find_batch("rec-b").unwrap();
        assert_eq!(readers.len(), slots.len());
        for (reader, expected) in readers.into_iter().zip(&slots) {
            let decoded: Vec<Batch> = BatchReader::new(reader)
                .collect::<Result<Vec<_>>>()
                .unwrap();
            assert_eq!(&decoded, expected);
        }
    }

    #[test]
    fn test_list_catalog_consistency() {
        let (store, _tmp) = store();
        store.stream_writer("s1").unwrap().close().unwrap();
        store.stream_writer("s2").unwrap().close().unwrap();
        let mut a = store.batch_archive("b1").unwrap();
        a.create(0).unwrap();
        a.close().unwrap();

        // noise: subdirectory and foreign extension
        fs::create_dir(store.dir().join("nested")).unwrap();
        fs::write(store.dir().join("notes.txt"), b"hi").unwrap();

        let infos = store.list(&[]).unwrap();
        let ids: Vec<&str> = infos.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["b1", "s1", "s2"]);
        assert_eq!(infos[0].task_type, TaskType::Batch);
        assert_eq!(infos[1].task_type, TaskType::Stream);

        let filtered = store.list(&["s2".to_string(), "ghost".to_string()]).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "s2");

        let none = store.list(&["ghost".to_string()]).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_delete_idempotent() {
        let (store, _tmp) = store();
        store.stream_writer("gone").unwrap().close().unwrap();
        assert_eq!(store.list(&[]).unwrap().len(), 1);

        store.delete("gone");
        store.delete("gone");
        assert!(store.list(&[]).unwrap().is_empty());
        assert!(matches!(
            store.find_stream("gone").unwrap_err(),
            SluiceError::RecordingNotFound(_)
        ));
    }

    #[test]
    fn test_wrong_type_disambiguation() {
        let (store, _tmp) = store();
        let mut a = store.batch_archive("mixed").unwrap();
        a.create(0).unwrap();
        a.close().unwrap();

        let err = store.find_stream("mixed").unwrap_err();
        assert!(matches!(err, SluiceError::WrongRecordingType(_)));

        let err = store.find_batch("absent").unwrap_err();
        assert!(matches!(err, SluiceError::RecordingNotFound(_)));
    }

    #[test]
    fn test_list_reports_size() {
        let (store, _tmp) = store();
        let mut w = store.stream_writer("sized").unwrap();
        for p in (0..50).map(sample_point) {
            write_point_for_recording(&mut w, &p, Precision::Nanosecond).unwrap();
        }
        w.close().unwrap();

        let infos = store.list(&[]).unwrap();
        assert_eq!(infos.len(), 1);
        assert!(infos[0].size > 0);
    }
}

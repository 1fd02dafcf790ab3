//! Capture paths: live stream, batch query plans, ad hoc queries
//!
//! All three modes share one shape: mint a recording ID, open the
//! matching store writer, stream serialized data into it, close, and
//! hand the ID back. Failures abort the capture and leave whatever was
//! already on disk; the catalog lists such partials and they can be
//! deleted explicitly.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SluiceError};
use crate::models::codec::{write_batch_for_recording, write_point_for_recording, Precision};
use crate::models::{Dbrp, Point, TaskType};
use crate::query;
use crate::replay::store::RecordingStore;
use crate::task::{Task, TaskMaster};
use crate::tsdb::{result_to_batches, Query, TsdbClient};

/// Records live streams, batch query plans, and ad hoc queries into the
/// store.
pub struct Recorder {
    store: Arc<RecordingStore>,
    task_master: Arc<TaskMaster>,
    tsdb: Option<Arc<dyn TsdbClient>>,
}

impl Recorder {
    pub fn new(
        store: Arc<RecordingStore>,
        task_master: Arc<TaskMaster>,
        tsdb: Option<Arc<dyn TsdbClient>>,
    ) -> Self {
        Self {
            store,
            task_master,
            tsdb,
        }
    }

    /// Mint a fresh recording ID.
    pub fn next_id() -> Uuid {
        Uuid::new_v4()
    }

    /// Record the live stream for `duration`, filtered to `dbrps`.
    ///
    /// A fork keyed by the recording ID taps the live stream; a producer
    /// drains the forked edge into the stream writer while this call
    /// sleeps out the duration. Closing the edge is what stops the
    /// producer; the stop flag is a backup checked between iterations.
    /// Points that slip in between the deadline and the close are kept.
    pub async fn record_stream(&self, id: Uuid, duration: Duration, dbrps: &[Dbrp]) -> Result<()> {
        let fork_name = id.to_string();
        let edge = self.task_master.new_fork(&fork_name, dbrps);
        let mut writer = self.store.stream_writer(&fork_name)?;

        info!(recording = %fork_name, ?duration, "recording stream");

        let stop = Arc::new(AtomicBool::new(false));
        let producer = {
            let edge = edge.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut count = 0u64;
                while let Some(p) = edge.next().await {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    write_point_for_recording(&mut writer, &p, Precision::Nanosecond)?;
                    count += 1;
                }
                debug!(points = count, "stream producer finished");
                writer.close()
            })
        };

        tokio::time::sleep(duration).await;
        stop.store(true, Ordering::Release);
        edge.close();
        self.task_master.del_fork(&fork_name);

        producer
            .await
            .map_err(|e| SluiceError::server(format!("stream producer: {}", e)))?
    }

    /// Record a batch task's query plan over `[start, stop]`.
    ///
    /// One archive entry per batch slot; queries within a slot execute
    /// sequentially and their batches concatenate into the entry.
    pub async fn record_batch(
        &self,
        id: Uuid,
        task: &Task,
        start: Option<DateTime<Utc>>,
        stop: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let plan = task.program.batch_queries(start, stop)?;
        let tsdb = self.tsdb_client()?;

        let rid = id.to_string();
        info!(recording = %rid, task = %task.name, slots = plan.len(), "recording batch queries");
        let mut archive = self.store.batch_archive(&rid)?;

        for (slot, queries) in plan.iter().enumerate() {
            archive.create(slot)?;
            for q in queries {
                let resp = tsdb.query(Query::new(q.clone())).await?;
                if let Some(e) = resp.error() {
                    return Err(SluiceError::tsdb(e.to_string()));
                }
                for result in &resp.results {
                    for batch in result_to_batches(result)? {
                        write_batch_for_recording(&mut archive, &batch)?;
                    }
                }
            }
        }
        archive.close()
    }

    /// Record the result of an ad hoc query as either recording shape.
    ///
    /// The query must be a SELECT over exactly one fully-qualified
    /// measurement; for stream recordings its rows become points tagged
    /// with the parsed database and retention policy.
    pub async fn record_query(&self, id: Uuid, q: &str, task_type: TaskType) -> Result<()> {
        let dbrp = query::fully_qualified_source(q)?;
        let tsdb = self.tsdb_client()?;

        let resp = tsdb.query(Query::new(q)).await?;
        if let Some(e) = resp.error() {
            return Err(SluiceError::tsdb(e.to_string()));
        }

        let rid = id.to_string();
        info!(recording = %rid, r#type = %task_type, "recording query result");
        match task_type {
            TaskType::Stream => {
                let mut writer = self.store.stream_writer(&rid)?;
                for result in &resp.results {
                    for batch in result_to_batches(result)? {
                        for row in &batch.points {
                            let point = Point {
                                name: batch.name.clone(),
                                database: dbrp.database.clone(),
                                retention_policy: dbrp.retention_policy.clone(),
                                tags: row.tags.clone(),
                                fields: row.fields.clone(),
                                time: row.time,
                            };
                            write_point_for_recording(&mut writer, &point, Precision::Nanosecond)?;
                        }
                    }
                }
                writer.close()
            }
            TaskType::Batch => {
                let mut archive = self.store.batch_archive(&rid)?;
                archive.create(0)?;
                for result in &resp.results {
                    for batch in result_to_batches(result)? {
                        write_batch_for_recording(&mut archive, &batch)?;
                    }
                }
                archive.close()
            }
        }
    }

    fn tsdb_client(&self) -> Result<Arc<dyn TsdbClient>> {
        self.tsdb.clone().ok_or_else(|| {
            SluiceError::tsdb("time-series database not configured, cannot record query")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::codec::{BatchReader, PointReader};
    use crate::models::Tags;
    use crate::tsdb::{QueryResult, Response, Series};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use serde_json::json;
    use tempfile::TempDir;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(1971, 1, 1, 0, 0, 0).unwrap()
    }

    struct CannedTsdb {
        response: Response,
        commands: Mutex<Vec<String>>,
    }

    impl CannedTsdb {
        fn new(response: Response) -> Self {
            Self {
                response,
                commands: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TsdbClient for CannedTsdb {
        async fn query(&self, q: Query) -> Result<Response> {
            self.commands.lock().push(q.command);
            Ok(self.response.clone())
        }
    }

    fn canned_response() -> Response {
        let t0 = base().timestamp_nanos_opt().unwrap();
        let rows = (0..5)
            .map(|i| vec![json!(t0 + i * 2_000_000_000), json!(i as f64)])
            .collect();
        Response {
            results: vec![QueryResult {
                series: vec![Series {
                    name: "packets".to_string(),
                    tags: Tags::new(),
                    columns: vec!["time".to_string(), "value".to_string()],
                    values: rows,
                }],
                error: None,
            }],
            error: None,
        }
    }

    fn recorder_with(tsdb: Option<Arc<dyn TsdbClient>>) -> (Recorder, Arc<RecordingStore>, TempDir)
    {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(RecordingStore::new(tmp.path()).unwrap());
        let tm = TaskMaster::new();
        tm.open();
        (Recorder::new(store.clone(), tm, tsdb), store, tmp)
    }

    #[tokio::test]
    async fn test_record_query_stream_tags_points_with_dbrp() {
        let tsdb = Arc::new(CannedTsdb::new(canned_response()));
        let (recorder, store, _tmp) = recorder_with(Some(tsdb.clone()));

        let id = Recorder::next_id();
        recorder
            .record_query(
                id,
                "SELECT value FROM \"telegraf\".\"default\".packets",
                TaskType::Stream,
            )
            .await
            .unwrap();

        assert_eq!(tsdb.commands.lock().len(), 1);
        let points: Vec<_> = PointReader::new(store.find_stream(&id.to_string()).unwrap())
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(points.len(), 5);
        assert_eq!(points[0].database, "telegraf");
        assert_eq!(points[0].retention_policy, "default");
        assert_eq!(points[4].fields["value"], json!(4.0));
    }

    #[tokio::test]
    async fn test_record_query_batch_single_entry() {
        let tsdb = Arc::new(CannedTsdb::new(canned_response()));
        let (recorder, store, _tmp) = recorder_with(Some(tsdb));

        let id = Recorder::next_id();
        recorder
            .record_query(
                id,
                "SELECT value FROM \"telegraf\".\"default\".packets",
                TaskType::Batch,
            )
            .await
            .unwrap();

        let slots = store.find_batch(&id.to_string()).unwrap();
        assert_eq!(slots.len(), 1);
        let batches: Vec<_> = BatchReader::new(slots.into_iter().next().unwrap())
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].points.len(), 5);
    }

    #[tokio::test]
    async fn test_record_query_requires_qualified_source() {
        let tsdb = Arc::new(CannedTsdb::new(canned_response()));
        let (recorder, _store, _tmp) = recorder_with(Some(tsdb));

        let err = recorder
            .record_query(Recorder::next_id(), "SELECT value FROM packets", TaskType::Stream)
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::Query(_)));
    }

    #[tokio::test]
    async fn test_record_query_without_tsdb_fails() {
        let (recorder, _store, _tmp) = recorder_with(None);
        let err = recorder
            .record_query(
                Recorder::next_id(),
                "SELECT value FROM \"db\".\"rp\".m",
                TaskType::Stream,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::Tsdb(_)));
    }

    #[tokio::test]
    async fn test_record_batch_writes_slot_per_plan_entry() {
        struct PlannedProgram;

        #[async_trait]
        impl crate::task::TaskProgram for PlannedProgram {
            fn batch_queries(
                &self,
                _start: Option<DateTime<Utc>>,
                _stop: Option<DateTime<Utc>>,
            ) -> Result<Vec<Vec<String>>> {
                Ok(vec![
                    vec!["SELECT a FROM \"db\".\"rp\".m".to_string()],
                    vec![
                        "SELECT b FROM \"db\".\"rp\".m".to_string(),
                        "SELECT c FROM \"db\".\"rp\".m".to_string(),
                    ],
                ])
            }

            async fn run(&self, _inputs: crate::task::TaskInputs) -> Result<()> {
                Ok(())
            }
        }

        let tsdb = Arc::new(CannedTsdb::new(canned_response()));
        let (recorder, store, _tmp) = recorder_with(Some(tsdb.clone()));

        let task = Task {
            name: "windows".to_string(),
            task_type: TaskType::Batch,
            dbrps: Vec::new(),
            program: Arc::new(PlannedProgram),
        };

        let id = Recorder::next_id();
        recorder.record_batch(id, &task, None, None).await.unwrap();

        // slot order preserved, one query in slot 0, two in slot 1
        assert_eq!(tsdb.commands.lock().len(), 3);
        let slots = store.find_batch(&id.to_string()).unwrap();
        assert_eq!(slots.len(), 2);
        let slot1: Vec<_> = BatchReader::new(slots.into_iter().nth(1).unwrap())
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(slot1.len(), 2); // two queries concatenated
    }

    #[tokio::test]
    async fn test_record_stream_captures_forked_points() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(RecordingStore::new(tmp.path()).unwrap());
        let tm = TaskMaster::new();
        tm.open();
        let recorder = Recorder::new(store.clone(), tm.clone(), None);

        let stream = tm.stream_collector().unwrap();
        let feeder = tokio::spawn(async move {
            for i in 0..40i64 {
                let mut fields = crate::models::Fields::new();
                fields.insert("value".to_string(), json!(i as f64));
                let p = Point {
                    name: "packets".to_string(),
                    database: "telegraf".to_string(),
                    retention_policy: "default".to_string(),
                    tags: Tags::new(),
                    fields,
                    time: base() + chrono::Duration::milliseconds(i),
                };
                if stream.collect(p).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        let id = Recorder::next_id();
        recorder
            .record_stream(id, Duration::from_millis(200), &[Dbrp::new("telegraf", "default")])
            .await
            .unwrap();

        let points: Vec<_> = PointReader::new(store.find_stream(&id.to_string()).unwrap())
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert!(!points.is_empty());
        // recorded in arrival order
        for w in points.windows(2) {
            assert!(w[0].time <= w[1].time);
        }

        tm.close().await.unwrap();
        feeder.await.unwrap();
    }
}

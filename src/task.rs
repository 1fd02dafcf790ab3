//! Task metadata and the execution master
//!
//! A [`Task`] couples a name, a shape ([`TaskType`]), the DBRPs it
//! subscribes to, and an opaque [`TaskProgram`] — the execution graph the
//! task compiler produced. The [`TaskMaster`] owns the live point stream:
//! it fans incoming points out to named forks and to running stream
//! tasks, and hands out per-slot batch collectors for batch tasks.
//!
//! Replays construct a fresh master with [`TaskMaster::new`] so state
//! from a prior replay or the live system cannot leak between runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::edge::{self, Collector, Edge, DEFAULT_EDGE_CAPACITY};
use crate::error::{Result, SluiceError};
use crate::models::{Batch, Dbrp, Point, TaskType};

/// A loaded task: compiled graph plus its subscription metadata.
#[derive(Clone)]
pub struct Task {
    pub name: String,
    pub task_type: TaskType,
    pub dbrps: Vec<Dbrp>,
    pub program: Arc<dyn TaskProgram>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("task_type", &self.task_type)
            .field("dbrps", &self.dbrps)
            .finish()
    }
}

/// Inputs handed to a task program when it starts.
pub enum TaskInputs {
    /// Point stream for stream tasks.
    Stream(Arc<Edge<Point>>),
    /// One batch edge per slot for batch tasks.
    Batch(Vec<Edge<Batch>>),
}

/// The compiled execution graph of a task. Produced by the task compiler;
/// the core only drives it.
#[async_trait]
pub trait TaskProgram: Send + Sync {
    /// Queries per batch slot, bound to the given time range. Batch tasks
    /// only; the default declares no slots.
    fn batch_queries(
        &self,
        _start: Option<DateTime<Utc>>,
        _stop: Option<DateTime<Utc>>,
    ) -> Result<Vec<Vec<String>>> {
        Ok(Vec::new())
    }

    /// Number of batch input slots the graph consumes.
    fn batch_slot_count(&self) -> usize {
        self.batch_queries(None, None).map_or(0, |plan| plan.len())
    }

    /// Drive the graph until its inputs end.
    async fn run(&self, inputs: TaskInputs) -> Result<()>;
}

/// Durable task catalog the service loads tasks from.
pub trait TaskStore: Send + Sync {
    fn load(&self, name: &str) -> Result<Task>;
}

struct Fork {
    dbrps: Vec<Dbrp>,
    out: Collector<Point>,
}

/// A running task. Cloneable handle; all clones observe the same run.
#[derive(Clone, Debug)]
pub struct ExecutingTask {
    name: String,
    inner: Arc<ExecutingInner>,
}

#[derive(Debug)]
struct ExecutingInner {
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    error: Mutex<Option<String>>,
}

impl ExecutingTask {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Error observed so far, without waiting for the task to finish.
    pub fn err(&self) -> Result<()> {
        match self.inner.error.lock().clone() {
            Some(msg) => Err(SluiceError::task("run", msg)),
            None => Ok(()),
        }
    }

    /// Wait for the task to finish and return its final status.
    pub async fn wait(&self) -> Result<()> {
        let mut handle = self.inner.handle.lock().await;
        if let Some(h) = handle.take() {
            if h.await.is_err() {
                *self.inner.error.lock() = Some("task panicked".to_string());
            }
        }
        drop(handle);
        self.err()
    }
}

/// Routes live points and hosts running tasks.
///
/// One master serves the live system; each replay gets its own isolated
/// instance.
pub struct TaskMaster {
    forks: RwLock<HashMap<String, Fork>>,
    stream_tasks: RwLock<HashMap<String, (Vec<Dbrp>, Collector<Point>)>>,
    batch_inputs: RwLock<HashMap<String, Vec<Collector<Batch>>>>,
    executing: Mutex<Vec<ExecutingTask>>,
    stream_tx: Mutex<Option<Collector<Point>>>,
    stream_entry: Arc<Edge<Point>>,
    dispatcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    opened: AtomicBool,
    closed: AtomicBool,
}

impl TaskMaster {
    /// Create a new, self-contained master. Call [`open`](Self::open)
    /// before starting tasks.
    pub fn new() -> Arc<Self> {
        let (tx, rx) = edge::pair(DEFAULT_EDGE_CAPACITY);
        Arc::new(Self {
            forks: RwLock::new(HashMap::new()),
            stream_tasks: RwLock::new(HashMap::new()),
            batch_inputs: RwLock::new(HashMap::new()),
            executing: Mutex::new(Vec::new()),
            stream_tx: Mutex::new(Some(tx)),
            stream_entry: Arc::new(rx),
            dispatcher: tokio::sync::Mutex::new(None),
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Start routing points.
    pub fn open(self: &Arc<Self>) {
        if self.opened.swap(true, Ordering::SeqCst) {
            return;
        }
        let master = self.clone();
        let entry = self.stream_entry.clone();
        let handle = tokio::spawn(async move {
            while let Some(p) = entry.next().await {
                master.dispatch(p).await;
            }
            debug!("task master stream dispatcher finished");
        });
        if let Ok(mut slot) = self.dispatcher.try_lock() {
            *slot = Some(handle);
        }
    }

    async fn dispatch(&self, p: Point) {
        let dbrp = p.dbrp();
        let fork_outs: Vec<Collector<Point>> = self
            .forks
            .read()
            .values()
            .filter(|f| f.dbrps.contains(&dbrp))
            .map(|f| f.out.clone())
            .collect();
        for out in fork_outs {
            // A closed fork edge is torn down by del_fork; skip quietly.
            let _ = out.collect(p.clone()).await;
        }

        let task_outs: Vec<Collector<Point>> = self
            .stream_tasks
            .read()
            .values()
            .filter(|(dbrps, _)| dbrps.contains(&dbrp))
            .map(|(_, out)| out.clone())
            .collect();
        for out in task_outs {
            let _ = out.collect(p.clone()).await;
        }
    }

    /// Entry collector for live (or replayed) points.
    pub fn stream_collector(&self) -> Result<Collector<Point>> {
        self.stream_tx
            .lock()
            .clone()
            .ok_or_else(|| SluiceError::server("task master is closed"))
    }

    /// Install a named tap on the live stream, filtered to `dbrps`.
    pub fn new_fork(&self, name: &str, dbrps: &[Dbrp]) -> Arc<Edge<Point>> {
        let (tx, rx) = edge::pair(DEFAULT_EDGE_CAPACITY);
        self.forks.write().insert(
            name.to_string(),
            Fork {
                dbrps: dbrps.to_vec(),
                out: tx,
            },
        );
        debug!(fork = %name, "installed fork");
        Arc::new(rx)
    }

    /// Remove a named fork. The forked edge ends once drained.
    pub fn del_fork(&self, name: &str) {
        self.forks.write().remove(name);
        debug!(fork = %name, "removed fork");
    }

    /// Start a task on this master.
    pub fn start_task(&self, task: &Task) -> Result<ExecutingTask> {
        if !self.opened.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(SluiceError::task("start", "task master is not open"));
        }

        let inputs = match task.task_type {
            TaskType::Stream => {
                let mut stream_tasks = self.stream_tasks.write();
                if stream_tasks.contains_key(&task.name) {
                    return Err(SluiceError::task("start", "task is already running"));
                }
                let (tx, rx) = edge::pair(DEFAULT_EDGE_CAPACITY);
                stream_tasks.insert(task.name.clone(), (task.dbrps.clone(), tx));
                TaskInputs::Stream(Arc::new(rx))
            }
            TaskType::Batch => {
                let slots = task.program.batch_slot_count();
                if slots == 0 {
                    return Err(SluiceError::task("start", "batch task declares no slots"));
                }
                let mut batch_inputs = self.batch_inputs.write();
                if batch_inputs.contains_key(&task.name) {
                    return Err(SluiceError::task("start", "task is already running"));
                }
                let mut collectors = Vec::with_capacity(slots);
                let mut edges = Vec::with_capacity(slots);
                for _ in 0..slots {
                    let (tx, rx) = edge::pair(DEFAULT_EDGE_CAPACITY);
                    collectors.push(tx);
                    edges.push(rx);
                }
                batch_inputs.insert(task.name.clone(), collectors);
                TaskInputs::Batch(edges)
            }
        };

        let program = task.program.clone();
        let shared = Arc::new(ExecutingInner {
            handle: tokio::sync::Mutex::new(None),
            error: Mutex::new(None),
        });
        let inner = shared.clone();
        let name = task.name.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = program.run(inputs).await {
                warn!(task = %name, error = %e, "task failed");
                *inner.error.lock() = Some(e.to_string());
            }
        });
        if let Ok(mut slot) = shared.handle.try_lock() {
            *slot = Some(handle);
        }

        let et = ExecutingTask {
            name: task.name.clone(),
            inner: shared,
        };
        self.executing.lock().push(et.clone());
        debug!(task = %et.name, r#type = %task.task_type, "task started");
        Ok(et)
    }

    /// Per-slot batch collectors for a running batch task.
    ///
    /// Hands them over: the task's inputs end when the caller drops the
    /// collectors, so a replay finishing with them lets the task drain.
    pub fn batch_collectors(&self, name: &str) -> Result<Vec<Collector<Batch>>> {
        self.batch_inputs
            .write()
            .remove(name)
            .ok_or_else(|| SluiceError::TaskNotFound(name.to_string()))
    }

    /// Stop routing, end every task's input, and wait for the tasks.
    /// Returns the first task error. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Drop the entry collector, then let the dispatcher drain what is
        // already buffered before the task inputs go away.
        *self.stream_tx.lock() = None;
        let dispatcher = self.dispatcher.lock().await.take();
        if let Some(h) = dispatcher {
            let _ = h.await;
        }

        self.forks.write().clear();
        self.stream_tasks.write().clear();
        self.batch_inputs.write().clear();

        let executing: Vec<ExecutingTask> = self.executing.lock().drain(..).collect();
        let mut first_err = Ok(());
        for et in executing {
            let res = et.wait().await;
            if first_err.is_ok() {
                if let Err(e) = res {
                    first_err = Err(SluiceError::task(
                        "close",
                        format!("task {:?}: {}", et.name(), e),
                    ));
                }
            }
        }
        first_err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fields, Tags};
    use chrono::TimeZone;
    use serde_json::json;

    fn point(db: &str, rp: &str, value: f64) -> Point {
        let mut fields = Fields::new();
        fields.insert("value".to_string(), json!(value));
        Point {
            name: "packets".to_string(),
            database: db.to_string(),
            retention_policy: rp.to_string(),
            tags: Tags::new(),
            fields,
            time: Utc.with_ymd_and_hms(1971, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    struct CountingProgram {
        seen: Arc<Mutex<Vec<Point>>>,
    }

    #[async_trait]
    impl TaskProgram for CountingProgram {
        async fn run(&self, inputs: TaskInputs) -> Result<()> {
            let TaskInputs::Stream(edge) = inputs else {
                return Err(SluiceError::task("run", "expected a stream input"));
            };
            while let Some(p) = edge.next().await {
                self.seen.lock().push(p);
            }
            Ok(())
        }
    }

    fn stream_task(name: &str, seen: Arc<Mutex<Vec<Point>>>) -> Task {
        Task {
            name: name.to_string(),
            task_type: TaskType::Stream,
            dbrps: vec![Dbrp::new("telegraf", "default")],
            program: Arc::new(CountingProgram { seen }),
        }
    }

    #[tokio::test]
    async fn test_fork_receives_matching_points_only() {
        let tm = TaskMaster::new();
        tm.open();
        let fork = tm.new_fork("rec-1", &[Dbrp::new("telegraf", "default")]);
        let stream = tm.stream_collector().unwrap();

        stream.collect(point("telegraf", "default", 1.0)).await.unwrap();
        stream.collect(point("other", "default", 2.0)).await.unwrap();
        stream.collect(point("telegraf", "default", 3.0)).await.unwrap();

        let p1 = fork.next().await.unwrap();
        let p2 = fork.next().await.unwrap();
        assert_eq!(p1.fields["value"], json!(1.0));
        assert_eq!(p2.fields["value"], json!(3.0));

        tm.del_fork("rec-1");
        drop(stream);
        tm.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_task_receives_points_and_drains_on_close() {
        let tm = TaskMaster::new();
        tm.open();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let task = stream_task("watcher", seen.clone());
        let et = tm.start_task(&task).unwrap();

        let stream = tm.stream_collector().unwrap();
        for i in 0..4 {
            stream.collect(point("telegraf", "default", i as f64)).await.unwrap();
        }
        drop(stream);

        tm.close().await.unwrap();
        et.wait().await.unwrap();
        assert_eq!(seen.lock().len(), 4);
    }

    #[tokio::test]
    async fn test_start_task_requires_open_master() {
        let tm = TaskMaster::new();
        let task = stream_task("early", Arc::new(Mutex::new(Vec::new())));
        let err = tm.start_task(&task).unwrap_err();
        assert!(err.to_string().contains("task start"));
    }

    #[tokio::test]
    async fn test_duplicate_task_rejected() {
        let tm = TaskMaster::new();
        tm.open();
        let task = stream_task("dup", Arc::new(Mutex::new(Vec::new())));
        tm.start_task(&task).unwrap();
        assert!(tm.start_task(&task).is_err());
        tm.close().await.unwrap();
    }

    struct FailingProgram;

    #[async_trait]
    impl TaskProgram for FailingProgram {
        async fn run(&self, _inputs: TaskInputs) -> Result<()> {
            Err(SluiceError::server("node exploded"))
        }
    }

    #[tokio::test]
    async fn test_close_surfaces_task_error() {
        let tm = TaskMaster::new();
        tm.open();
        let task = Task {
            name: "bad".to_string(),
            task_type: TaskType::Stream,
            dbrps: vec![Dbrp::new("telegraf", "default")],
            program: Arc::new(FailingProgram),
        };
        let et = tm.start_task(&task).unwrap();
        let err = tm.close().await.unwrap_err();
        assert!(err.to_string().contains("node exploded"));
        assert!(et.err().is_err());

        // second close is a no-op
        tm.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_collectors_hand_over() {
        struct BatchDrain;

        #[async_trait]
        impl TaskProgram for BatchDrain {
            fn batch_queries(
                &self,
                _start: Option<DateTime<Utc>>,
                _stop: Option<DateTime<Utc>>,
            ) -> Result<Vec<Vec<String>>> {
                Ok(vec![vec!["SELECT 1".to_string()]; 2])
            }

            async fn run(&self, inputs: TaskInputs) -> Result<()> {
                let TaskInputs::Batch(edges) = inputs else {
                    return Err(SluiceError::task("run", "expected batch inputs"));
                };
                for e in &edges {
                    while e.next().await.is_some() {}
                }
                Ok(())
            }
        }

        let tm = TaskMaster::new();
        tm.open();
        let task = Task {
            name: "windows".to_string(),
            task_type: TaskType::Batch,
            dbrps: Vec::new(),
            program: Arc::new(BatchDrain),
        };
        let et = tm.start_task(&task).unwrap();

        let collectors = tm.batch_collectors("windows").unwrap();
        assert_eq!(collectors.len(), 2);
        assert!(tm.batch_collectors("windows").is_err());

        drop(collectors);
        et.wait().await.unwrap();
        tm.close().await.unwrap();
    }
}

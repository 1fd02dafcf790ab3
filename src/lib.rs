#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Sluice
//!
//! Sluice is the recording and replay core of a stream/batch processing
//! service that executes user-defined dataflow tasks over time-series
//! telemetry. It captures the data a live task would have consumed,
//! catalogs the captures on disk, and feeds them back into a task's
//! execution graph under a controllable clock — at wall speed, or as
//! fast as the pipeline can consume.
//!
//! ## Architecture
//!
//! - [`clock`]: virtual clocks; replays wait on these, never on the OS
//! - [`models`]: points, batches, task metadata, and the wire codec
//! - [`replay`]: the recording store, the recorder, and the replayer
//! - [`task`]: task contracts and the execution master that routes points
//! - [`tsdb`]: the time-series database client contract
//! - [`query`]: duration literals and record-query source extraction
//! - [`server`]: the HTTP surface (list, delete, record, replay)
//! - [`edge`]: typed channels between dataflow stages
//! - [`config`]: service configuration
//! - [`error`]: error types and `Result` alias
//!
//! ## Recording formats
//!
//! A stream recording (`.srpl`) is a gzip-compressed run of serialized
//! points; a batch recording (`.brpl`) is a ZIP archive with one entry
//! per batch slot. Both live flat under the save directory, named by
//! their recording ID.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sluice::clock::FastClock;
//! use sluice::replay::{Recorder, RecordingStore, Replayer};
//!
//! let store = Arc::new(RecordingStore::new("./recordings")?);
//! let recorder = Recorder::new(store.clone(), task_master.clone(), None);
//!
//! let id = Recorder::next_id();
//! recorder.record_stream(id, Duration::from_secs(10), &task.dbrps).await?;
//!
//! let clock = Arc::new(FastClock::new(zero));
//! let replayer = Replayer::new(clock);
//! let done = replayer.replay_stream(
//!     store.find_stream(&id.to_string())?,
//!     replay_master.stream_collector()?,
//!     false,
//!     Precision::Nanosecond,
//! );
//! done.await??;
//! ```

pub mod clock;
pub mod config;
pub mod edge;
pub mod error;
pub mod models;
pub mod query;
pub mod replay;
pub mod server;
pub mod task;
pub mod tsdb;

pub use clock::{Clock, FastClock, WallClock};
pub use config::ServiceConfig;
pub use error::{Result, SluiceError};
pub use models::{Batch, BatchPoint, Dbrp, Point, TaskType};
pub use replay::{Recorder, RecordingInfo, RecordingStore, Replayer};
pub use task::{ExecutingTask, Task, TaskMaster, TaskProgram, TaskStore};

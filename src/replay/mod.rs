//! Recording and replay of task input data
//!
//! This module captures what a live task would have consumed and plays
//! it back deterministically:
//! - Record the live point stream through a fork, a batch task's query
//!   plan, or an ad hoc query
//! - Catalog recordings on disk, one flat file per recording
//! - Replay a recording into a task's input edges, paced by a virtual
//!   clock, at wall speed or as fast as the pipeline can consume
//!
//! # Usage
//!
//! ```rust,ignore
//! use sluice::replay::{Recorder, RecordingStore, Replayer};
//! use sluice::clock::FastClock;
//!
//! let store = Arc::new(RecordingStore::new("./recordings")?);
//! let recorder = Recorder::new(store.clone(), task_master, Some(tsdb));
//!
//! let id = Recorder::next_id();
//! recorder.record_stream(id, Duration::from_secs(10), &task.dbrps).await?;
//!
//! let replayer = Replayer::new(Arc::new(FastClock::new(zero)));
//! let done = replayer.replay_stream(store.find_stream(&id.to_string())?, sink, false, precision);
//! done.await??;
//! ```

pub mod playback;
pub mod record;
pub mod store;

pub use playback::{ReplayDone, Replayer};
pub use record::Recorder;
pub use store::{BatchArchive, RecordingInfo, RecordingStore, StreamWriter, BATCH_EXT, STREAM_EXT};

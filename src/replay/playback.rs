//! Clock-paced replay into task input edges
//!
//! The replayer reads a recording and pushes it into a task's inputs,
//! gating every emission on the injected [`Clock`]. The first recorded
//! instant is pinned to the clock's zero, so the relative cadence of the
//! original data is preserved; under a fast clock the same schedule
//! collapses to "as fast as the pipeline can consume". The only
//! suspension points are clock waits and sink writes.
//!
//! Both operations hand back a one-shot completion channel carrying the
//! first error, or `Ok(())` once everything has been emitted.

use std::io::Read;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::clock::Clock;
use crate::edge::Collector;
use crate::error::{Result, SluiceError};
use crate::models::codec::{BatchReader, PointReader, Precision};
use crate::models::{Batch, Point};

/// Completion signal of a running replay.
pub type ReplayDone = oneshot::Receiver<Result<()>>;

/// Replays recordings against a virtual clock.
pub struct Replayer {
    clock: Arc<dyn Clock>,
}

impl Replayer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Replay a stream recording into a point sink.
    ///
    /// Each point waits until the clock reaches `zero + (tp - t0)`, where
    /// `t0` is the first point's recorded time. With `rec_time` the
    /// emitted point keeps its recorded timestamp; otherwise it takes the
    /// gated clock time. Decode errors and sink closure end the replay
    /// with an error.
    pub fn replay_stream<R>(
        &self,
        src: R,
        sink: Collector<Point>,
        rec_time: bool,
        precision: Precision,
    ) -> ReplayDone
    where
        R: Read + Send + 'static,
    {
        let clock = self.clock.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let res = replay_stream_inner(clock, src, sink, rec_time, precision).await;
            if let Err(e) = &res {
                error!(error = %e, "stream replay failed");
            }
            let _ = tx.send(res);
        });
        rx
    }

    /// Replay a batch recording into per-slot batch collectors.
    ///
    /// Each (source, sink) pair runs concurrently; within a pair batches
    /// emit in source order, gated at window end. The completion channel
    /// fires `Ok` only when every pair finished; the first error cancels
    /// the rest.
    pub fn replay_batch<R>(
        &self,
        srcs: Vec<R>,
        sinks: Vec<Collector<Batch>>,
        rec_time: bool,
    ) -> ReplayDone
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        if srcs.len() != sinks.len() {
            let _ = tx.send(Err(SluiceError::request(format!(
                "recording has {} batch slots but the task collects {}",
                srcs.len(),
                sinks.len()
            ))));
            return rx;
        }

        let mut workers = JoinSet::new();
        for (slot, (src, sink)) in srcs.into_iter().zip(sinks).enumerate() {
            let clock = self.clock.clone();
            workers.spawn(async move {
                replay_batch_slot(clock, src, sink, rec_time)
                    .await
                    .map_err(|e| SluiceError::server(format!("batch slot {}: {}", slot, e)))
            });
        }

        tokio::spawn(async move {
            let mut outcome = Ok(());
            while let Some(joined) = workers.join_next().await {
                let res = match joined {
                    Ok(res) => res,
                    Err(e) if e.is_cancelled() => continue,
                    Err(e) => Err(SluiceError::server(format!("batch replay worker: {}", e))),
                };
                if let Err(e) = res {
                    if outcome.is_ok() {
                        error!(error = %e, "batch replay failed");
                        outcome = Err(e);
                        workers.abort_all();
                    }
                }
            }
            let _ = tx.send(outcome);
        });
        rx
    }
}

async fn replay_stream_inner<R: Read>(
    clock: Arc<dyn Clock>,
    src: R,
    sink: Collector<Point>,
    rec_time: bool,
    precision: Precision,
) -> Result<()> {
    let zero = clock.zero();
    let mut first: Option<chrono::DateTime<chrono::Utc>> = None;
    let mut emitted = 0u64;

    for item in PointReader::with_default_precision(src, precision) {
        let mut p = item?;
        let t0 = *first.get_or_insert(p.time);
        let at = zero + (p.time - t0);
        clock.until(at).await;
        if !rec_time {
            p.time = at;
        }
        sink.collect(p).await?;
        emitted += 1;
    }
    debug!(points = emitted, "stream replay complete");
    Ok(())
}

async fn replay_batch_slot<R: Read>(
    clock: Arc<dyn Clock>,
    src: R,
    sink: Collector<Batch>,
    rec_time: bool,
) -> Result<()> {
    let zero = clock.zero();
    let mut diff: Option<chrono::Duration> = None;
    let mut emitted = 0u64;

    for item in BatchReader::new(src) {
        let mut b = item?;
        let d = *diff.get_or_insert(zero - b.window_end);
        let release = if rec_time {
            b.window_end
        } else {
            for row in &mut b.points {
                row.time = row.time + d;
            }
            b.window_end = b.window_end + d;
            b.window_end
        };
        clock.until(release).await;
        sink.collect(b).await?;
        emitted += 1;
    }
    debug!(batches = emitted, "batch slot replay complete");
    Ok(())
}

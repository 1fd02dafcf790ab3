//! Typed edges between dataflow stages
//!
//! An edge is a bounded channel split into a producer half
//! ([`Collector`]) and a consumer half ([`Edge`]). Either side can end
//! it: dropping every collector drains the edge to its natural end, and
//! [`Edge::close`] tears it down from the consumer side so producers see
//! [`SluiceError::EdgeClosed`] on the next send. Closing is signalled
//! through a watch channel, which gives the required happens-before
//! ordering without a bare flag.

use tokio::sync::{mpsc, watch, Mutex};

use crate::error::{Result, SluiceError};

/// Default buffer size for edges.
pub const DEFAULT_EDGE_CAPACITY: usize = 1024;

/// Create a connected collector/edge pair.
pub fn pair<T>(capacity: usize) -> (Collector<T>, Edge<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    let (closed_tx, closed_rx) = watch::channel(false);
    (
        Collector {
            tx,
            closed: closed_rx,
        },
        Edge {
            rx: Mutex::new(rx),
            closed: closed_tx,
        },
    )
}

/// Consumer half of an edge.
pub struct Edge<T> {
    rx: Mutex<mpsc::Receiver<T>>,
    closed: watch::Sender<bool>,
}

impl<T> Edge<T> {
    /// Next item, or `None` once the edge has ended.
    ///
    /// Ends when every collector has been dropped and the buffer is
    /// drained, or immediately after [`close`](Edge::close).
    pub async fn next(&self) -> Option<T> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return None;
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            item = rx.recv() => item,
            _ = closed.wait_for(|c| *c) => None,
        }
    }

    /// End the edge from the consumer side.
    ///
    /// Pending and future sends fail with [`SluiceError::EdgeClosed`];
    /// a blocked [`next`](Edge::next) call returns `None`.
    pub fn close(&self) {
        let _ = self.closed.send(true);
    }
}

/// Producer half of an edge.
#[derive(Clone)]
pub struct Collector<T> {
    tx: mpsc::Sender<T>,
    closed: watch::Receiver<bool>,
}

impl<T> Collector<T> {
    /// Deliver one item, blocking on backpressure.
    ///
    /// A send blocked on a full buffer still observes a concurrent
    /// [`Edge::close`] and fails rather than waiting on a consumer that
    /// is gone.
    pub async fn collect(&self, item: T) -> Result<()> {
        let mut closed = self.closed.clone();
        if *closed.borrow() {
            return Err(SluiceError::EdgeClosed);
        }
        tokio::select! {
            res = self.tx.send(item) => res.map_err(|_| SluiceError::EdgeClosed),
            _ = closed.wait_for(|c| *c) => Err(SluiceError::EdgeClosed),
        }
    }

    /// True once the consumer side has closed the edge.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.tx.is_closed()
    }
}

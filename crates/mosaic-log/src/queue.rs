//! Batching admission queue.
//!
//! Producers call [`Queue::add`] concurrently; entries accumulate into a
//! batch that is flushed to the integrator when it reaches `max_size` or
//! when the oldest entry in it reaches `max_age`. Each caller gets an
//! [`IndexFuture`] that resolves once the batch containing its entry
//! commits.
//!
//! A caller dropping its future does not withdraw the entry: if the batch
//! commits, the entry still occupies its assigned index.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use mosaic_core::{Entry, SequencedIndex};

use crate::error::AppendError;

type AddResult = Result<SequencedIndex, AppendError>;

/// Resolves to the index assigned to one added entry.
#[must_use = "the index future resolves when the entry's batch commits"]
pub struct IndexFuture {
    rx: oneshot::Receiver<AddResult>,
}

impl IndexFuture {
    /// A future that is already resolved, used for dedup short-circuits and
    /// admission failures.
    pub(crate) fn resolved(result: AddResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for IndexFuture {
    type Output = AddResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The batch was dropped without resolution; the writer is gone.
            Poll::Ready(Err(_)) => Poll::Ready(Err(AppendError::ShuttingDown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A flushed batch on its way to the integrator.
pub(crate) struct Batch {
    pub entries: Vec<Entry>,
    pub responders: Vec<oneshot::Sender<AddResult>>,
}

impl Batch {
    /// Fail every caller in the batch with the same error.
    pub(crate) fn fail(self, err: AppendError) {
        for tx in self.responders {
            let _ = tx.send(Err(err.clone()));
        }
    }
}

struct Accumulating {
    entries: Vec<Entry>,
    responders: Vec<oneshot::Sender<AddResult>>,
    /// Bumped on every flush so a stale age timer cannot flush a newer batch.
    epoch: u64,
}

struct QueueInner {
    max_size: usize,
    max_age: Duration,
    batch_tx: mpsc::UnboundedSender<Batch>,
    current: Mutex<Accumulating>,
    closed: AtomicBool,
    pushback: Arc<AtomicBool>,
}

impl QueueInner {
    fn flush_locked(&self, cur: &mut Accumulating) {
        if cur.entries.is_empty() {
            return;
        }
        cur.epoch += 1;
        let batch = Batch {
            entries: std::mem::take(&mut cur.entries),
            responders: std::mem::take(&mut cur.responders),
        };
        debug!(entries = batch.entries.len(), "Flushing batch");
        if self.batch_tx.send(batch).is_err() {
            // Integrator gone; the Batch drop resolves callers as shut down.
            debug!("Integrator channel closed, dropping batch");
        }
    }

    fn flush_if_epoch(&self, epoch: u64) {
        let mut cur = self.current.lock().expect("queue lock poisoned");
        if cur.epoch == epoch {
            self.flush_locked(&mut cur);
        }
    }
}

/// The admission queue in front of the integrator.
#[derive(Clone)]
pub(crate) struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    pub(crate) fn new(
        batch_tx: mpsc::UnboundedSender<Batch>,
        max_size: usize,
        max_age: Duration,
        pushback: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                max_size,
                max_age,
                batch_tx,
                current: Mutex::new(Accumulating {
                    entries: Vec::new(),
                    responders: Vec::new(),
                    epoch: 0,
                }),
                closed: AtomicBool::new(false),
                pushback,
            }),
        }
    }

    /// Admit an entry into the current batch.
    ///
    /// Fails immediately with `Overloaded` while pushback is asserted and
    /// with `ShuttingDown` after `close`.
    pub(crate) fn add(&self, entry: Entry) -> IndexFuture {
        if self.inner.closed.load(Ordering::Acquire) {
            return IndexFuture::resolved(Err(AppendError::ShuttingDown));
        }
        if self.inner.pushback.load(Ordering::Relaxed) {
            return IndexFuture::resolved(Err(AppendError::Overloaded));
        }

        let (tx, rx) = oneshot::channel();
        let mut cur = self.inner.current.lock().expect("queue lock poisoned");
        if cur.entries.is_empty() {
            // First entry of a fresh batch: arm its age timer.
            let inner = self.inner.clone();
            let epoch = cur.epoch;
            tokio::spawn(async move {
                tokio::time::sleep(inner.max_age).await;
                inner.flush_if_epoch(epoch);
            });
        }
        cur.entries.push(entry);
        cur.responders.push(tx);
        if cur.entries.len() >= self.inner.max_size {
            self.inner.flush_locked(&mut cur);
        }
        drop(cur);

        IndexFuture { rx }
    }

    /// Refuse new admissions and fail the accumulating batch.
    pub(crate) fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut cur = self.inner.current.lock().expect("queue lock poisoned");
        cur.epoch += 1;
        let batch = Batch {
            entries: std::mem::take(&mut cur.entries),
            responders: std::mem::take(&mut cur.responders),
        };
        drop(cur);
        batch.fail(AppendError::ShuttingDown);
    }
}

//! Sequential single-flight queue
//!
//! Tasks submitted with [`SequentialQueue::enqueue`] run one at a time, in
//! submission order, on a single worker task fed by an unbounded channel.
//! A task starts only once the previous one has settled, whatever its outcome.

use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    task::{Context, Poll},
};

use futures::{future::BoxFuture, FutureExt};
use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};

use crate::{
    core::{SyncError, SyncResult},
    internal_error,
};

type Job = BoxFuture<'static, ()>;

pub struct SequentialQueue {
    sender: mpsc::UnboundedSender<Job>,
    // Taken by the first enqueue, which spawns the worker on the caller's runtime
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    pending: Arc<AtomicUsize>,
}

impl Default for SequentialQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SequentialQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Append a task to the chain.
    ///
    /// The returned ticket resolves with the task's own output. A panicking task
    /// rejects its ticket with [`SyncError::Unknown`] and the chain moves on.
    /// Must be called from within a tokio runtime.
    pub fn enqueue<F, T>(&self, task: F) -> QueueTicket<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        if let Err(e) = self.ensure_worker() {
            let _ = tx.send(Err(e));
            return QueueTicket { receiver: rx };
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        let pending = self.pending.clone();
        let job = async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            release(&pending);
            let result = outcome.map_err(|panic| SyncError::Unknown(panic_message(panic)));
            // The caller may have dropped its ticket
            let _ = tx.send(result);
        }
        .boxed();

        if self.sender.send(job).is_err() {
            release(&self.pending);
            warn!("Sequential queue worker is gone, task dropped");
        }

        QueueTicket { receiver: rx }
    }

    /// Number of tasks enqueued or executing and not yet settled
    pub fn length(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Reset the pending counter to zero.
    ///
    /// Monitoring reset only: queued and running tasks are not cancelled, they
    /// still run and settle their own tickets. Each of those tasks still
    /// decrements the counter when it settles, so tasks enqueued after a clear
    /// are undercounted by `length()` until the older tasks have drained.
    pub fn clear(&self) {
        let previous = self.pending.swap(0, Ordering::SeqCst);
        debug!("Sequential queue counter cleared ({previous} tasks still in the chain)");
    }

    fn ensure_worker(&self) -> SyncResult<()> {
        let mut slot = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            return Ok(());
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| internal_error!("sequential queue needs a tokio runtime: {}", e))?;
        if let Some(receiver) = slot.take() {
            handle.spawn(run_worker(receiver));
        }
        Ok(())
    }
}

async fn run_worker(mut receiver: mpsc::UnboundedReceiver<Job>) {
    debug!("Sequential queue worker started");
    while let Some(job) = receiver.recv().await {
        job.await;
    }
    debug!("Sequential queue worker stopped");
}

// Saturating, clear() may have zeroed the counter under running tasks
fn release(pending: &AtomicUsize) {
    let _ = pending.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("task panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("task panicked: {msg}")
    } else {
        "task panicked".to_string()
    }
}

/// Resolves with the outcome of one enqueued task
pub struct QueueTicket<T> {
    receiver: oneshot::Receiver<SyncResult<T>>,
}

impl<T> Future for QueueTicket<T> {
    type Output = SyncResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(SyncError::Internal(
                    "sequential queue dropped the task".to_string(),
                ))
            })
        })
    }
}

//! Cancellation signalling
//!
//! An [`AbortHandle`] and its [`AbortSignal`] share a tokio watch channel.
//! Aborting is synchronous; observers either poll [`AbortSignal::is_aborted`]
//! or await [`AbortSignal::aborted`] inside a `select!`.

use std::sync::Arc;

use tokio::sync::watch;

/// Create a linked abort handle and signal
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        AbortHandle {
            sender: Arc::new(sender),
        },
        AbortSignal { receiver },
    )
}

/// Owner side of a cancellation signal
#[derive(Clone, Debug)]
pub struct AbortHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Signal cancellation. Calling it again is a no-op.
    pub fn abort(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Observer side of a cancellation signal
#[derive(Clone, Debug)]
pub struct AbortSignal {
    receiver: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the handle aborts. Never resolves if the handle is dropped unaborted.
    pub async fn aborted(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_abort_wakes_waiter() {
        let (handle, signal) = abort_pair();
        let mut waiter = signal.clone();
        let task = tokio::spawn(async move { waiter.aborted().await });

        assert!(!signal.is_aborted());
        handle.abort();
        handle.abort();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(signal.is_aborted());
        assert!(handle.is_aborted());
    }

    #[tokio::test]
    async fn test_dropped_handle_never_aborts() {
        let (handle, mut signal) = abort_pair();
        drop(handle);

        let res = tokio::time::timeout(Duration::from_millis(20), signal.aborted()).await;
        assert!(res.is_err());
        assert!(!signal.is_aborted());
    }
}

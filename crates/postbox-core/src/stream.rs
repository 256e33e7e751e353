//! Result futures and view subscription streams.
//!
//! Both primitives are thin wrappers over channels: a transaction result
//! is a single-shot value delivered once the worker finishes the commit
//! pipeline; a view stream is a push channel of snapshots plus a disposal
//! guard that unregisters the view on drop. The guard holds only the job
//! sender, never the store itself: if the worker is already gone, disposal
//! is a no-op.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::error::{Error, Result};

/// Single-shot future for a transaction result.
pub struct TransactionHandle<T> {
    receiver: Receiver<Result<T>>,
}

impl<T> TransactionHandle<T> {
    pub(crate) fn new() -> (ResultSink<T>, Self) {
        let (sender, receiver) = bounded(1);
        (ResultSink { sender }, Self { receiver })
    }

    /// Block until the worker delivers the result.
    pub fn wait(self) -> Result<T> {
        self.receiver
            .recv()
            .unwrap_or(Err(Error::Disconnected))
    }
}

/// Worker-side end of a [`TransactionHandle`].
pub(crate) struct ResultSink<T> {
    sender: Sender<Result<T>>,
}

impl<T> ResultSink<T> {
    /// Deliver the result; the caller may have dropped its handle.
    pub fn deliver(self, result: Result<T>) {
        let _ = self.sender.send(result);
    }
}

/// Stream of view snapshots: the initial snapshot followed by one
/// snapshot per committed transaction whose replay changed the view.
pub struct ViewStream<T> {
    receiver: Receiver<T>,
    _guard: SubscriptionGuard,
}

impl<T> ViewStream<T> {
    pub(crate) fn new(receiver: Receiver<T>, guard: SubscriptionGuard) -> Self {
        Self {
            receiver,
            _guard: guard,
        }
    }

    /// Block until the next snapshot.
    pub fn recv(&self) -> Result<T> {
        self.receiver.recv().map_err(|_| Error::Disconnected)
    }

    /// The next snapshot if one is already queued.
    pub fn try_recv(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Block for at most `timeout`; `None` on timeout or disconnect.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

/// Worker-side end of a [`ViewStream`].
pub(crate) struct ViewSink<T> {
    sender: Sender<T>,
}

impl<T> ViewSink<T> {
    pub(crate) fn channel() -> (Self, Receiver<T>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    /// Emit a snapshot; subscribers that already went away are ignored.
    pub fn emit(&self, snapshot: T) {
        let _ = self.sender.send(snapshot);
    }
}

impl<T> Clone for ViewSink<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Runs its disposal action exactly once, when the stream is dropped.
pub(crate) struct SubscriptionGuard {
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub(crate) fn new(on_drop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_drop: Some(Box::new(on_drop)),
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(dispose) = self.on_drop.take() {
            dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_transaction_handle_delivers_result() {
        let (sink, handle) = TransactionHandle::new();
        sink.deliver(Ok(42));
        assert_eq!(handle.wait().unwrap(), 42);
    }

    #[test]
    fn test_dropped_sink_yields_disconnected() {
        let (sink, handle) = TransactionHandle::<u32>::new();
        drop(sink);
        assert!(matches!(handle.wait(), Err(Error::Disconnected)));
    }

    #[test]
    fn test_view_stream_receives_in_order() {
        let (sink, receiver) = ViewSink::channel();
        let stream = ViewStream::new(receiver, SubscriptionGuard::new(|| {}));
        sink.emit(1);
        sink.emit(2);
        assert_eq!(stream.recv().unwrap(), 1);
        assert_eq!(stream.recv().unwrap(), 2);
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_guard_runs_disposal_on_drop() {
        let disposed = Arc::new(AtomicBool::new(false));
        let flag = disposed.clone();
        let (_sink, receiver) = ViewSink::<u32>::channel();
        let stream = ViewStream::new(
            receiver,
            SubscriptionGuard::new(move || flag.store(true, Ordering::SeqCst)),
        );
        assert!(!disposed.load(Ordering::SeqCst));
        drop(stream);
        assert!(disposed.load(Ordering::SeqCst));
    }
}

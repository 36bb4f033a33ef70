//! Future that is completed at creation time.

use crate::*;

/// An already-resolved asynchronous result.
///
/// Used as the uniform result type for operations that may resolve
/// immediately (e.g. a cache hit) or asynchronously (a network round
/// trip), so upstream code cannot observe the difference. Polling is
/// immediately ready; [FinishedFuture::get] never blocks.
///
/// Failures are carried as typed [MeshError] values, never as silent
/// empty results.
#[derive(Debug, Clone)]
pub struct FinishedFuture<T> {
    result: MeshResult<T>,
    sync_notify: bool,
}

impl<T: Clone + Send + 'static> FinishedFuture<T> {
    /// Construct a finished future from a result.
    pub fn new(result: MeshResult<T>) -> Self {
        Self {
            result,
            sync_notify: true,
        }
    }

    /// Construct a finished future resolved with a value.
    pub fn ok(value: T) -> Self {
        Self::new(Ok(value))
    }

    /// Construct a finished future resolved with an error.
    pub fn err(err: MeshError) -> Self {
        Self::new(Err(err))
    }

    /// Set the synchronous notification flag, builder style.
    ///
    /// When set (the default), [FinishedFuture::listen] invokes the
    /// callback on the calling thread; when cleared, the callback is
    /// scheduled on the tokio runtime instead. Never both.
    pub fn with_sync_notify(mut self, sync_notify: bool) -> Self {
        self.sync_notify = sync_notify;
        self
    }

    /// Always `true`: this future is resolved at creation time.
    pub fn is_done(&self) -> bool {
        true
    }

    /// Get the result. Returns immediately.
    pub fn get(&self) -> MeshResult<T> {
        self.result.clone()
    }

    /// Get the result. The timeout is irrelevant for an already-resolved
    /// future; returns immediately.
    pub fn get_timeout(&self, _timeout: std::time::Duration) -> MeshResult<T> {
        self.get()
    }

    /// Register a completion callback.
    ///
    /// The callback is invoked exactly once: synchronously on the calling
    /// thread when sync-notify is set, otherwise scheduled for
    /// asynchronous execution. A registered callback is never silently
    /// dropped.
    ///
    /// The asynchronous path requires a running tokio runtime.
    pub fn listen<F>(&self, cb: F)
    where
        F: FnOnce(MeshResult<T>) + Send + 'static,
    {
        let result = self.result.clone();
        if self.sync_notify {
            cb(result);
        } else {
            tokio::spawn(async move { cb(result) });
        }
    }
}

impl<T: Clone> std::future::Future for FinishedFuture<T> {
    type Output = MeshResult<T>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        std::task::Poll::Ready(self.result.clone())
    }
}

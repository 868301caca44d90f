//! Deferred operation results
//!
//! Session operations return immediately with a [`Deferred`] that resolves
//! once the board has answered (or the wait has failed). A `Deferred` can be
//! awaited, or polled without an async runtime through
//! [`Deferred::try_result`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{SessionError, SessionResult};

/// Pending result of a session operation.
#[derive(Debug)]
pub struct Deferred<T> {
    rx: oneshot::Receiver<SessionResult<T>>,
}

/// Completing half of a [`Deferred`].
#[derive(Debug)]
pub(crate) struct Resolver<T> {
    tx: oneshot::Sender<SessionResult<T>>,
}

/// Create a linked resolver and deferred result.
pub(crate) fn deferred<T>() -> (Resolver<T>, Deferred<T>) {
    let (tx, rx) = oneshot::channel();
    (Resolver { tx }, Deferred { rx })
}

impl<T> Resolver<T> {
    /// Complete the operation. A dropped `Deferred` is ignored.
    pub(crate) fn resolve(self, result: SessionResult<T>) {
        let _ = self.tx.send(result);
    }
}

impl<T> Deferred<T> {
    /// A result that is already known.
    #[must_use]
    pub fn ready(result: SessionResult<T>) -> Self {
        let (resolver, deferred) = deferred();
        resolver.resolve(result);
        deferred
    }

    /// A failure that is already known.
    #[must_use]
    pub fn failed(error: impl Into<SessionError>) -> Self {
        Self::ready(Err(error.into()))
    }

    /// Take the result if the operation has finished.
    ///
    /// Returns `None` while still pending. Once taken, later calls report
    /// the operation as aborted.
    pub fn try_result(&mut self) -> Option<SessionResult<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(dropped())),
        }
    }
}

impl<T> Future for Deferred<T> {
    type Output = SessionResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(dropped())))
    }
}

fn dropped() -> SessionError {
    SessionError::Aborted { operation: "session dropped" }
}

//! Eagerly running, shareable results.

use std::future::Future;

use futures_util::future::{self, FutureExt, LocalBoxFuture, Shared};

use crate::error::WidgetError;

/// A result that is being computed on the local task set and may be awaited
/// by any number of holders.
pub type Deferred<T> = Shared<LocalBoxFuture<'static, Result<T, WidgetError>>>;

/// Spawns `fut` on the current `LocalSet` and returns a shared handle to its
/// outcome. The work starts whether or not the handle is ever polled.
///
/// Must be called from within a `tokio::task::LocalSet`.
pub fn spawn_deferred<T, F>(fut: F) -> Deferred<T>
where
    T: Clone + 'static,
    F: Future<Output = Result<T, WidgetError>> + 'static,
{
    let handle = tokio::task::spawn_local(fut);
    async move {
        match handle.await {
            Ok(result) => result,
            Err(err) => Err(WidgetError::TaskCancelled(err.to_string())),
        }
    }
    .boxed_local()
    .shared()
}

/// A deferred that is already settled.
pub fn settled<T: Clone + 'static>(result: Result<T, WidgetError>) -> Deferred<T> {
    future::ready(result).boxed_local().shared()
}

/// Wraps a oneshot receiver fed by some other task.
pub(crate) fn from_receiver<T: Clone + 'static>(
    rx: tokio::sync::oneshot::Receiver<Result<T, WidgetError>>,
) -> Deferred<T> {
    async move {
        rx.await
            .unwrap_or_else(|_| Err(WidgetError::TaskCancelled("producer dropped".to_owned())))
    }
    .boxed_local()
    .shared()
}

/// The settled value of `deferred`, if it has already succeeded.
pub fn peek_ok<T: Clone>(deferred: &Deferred<T>) -> Option<T> {
    match deferred.peek() {
        Some(Ok(value)) => Some(value.clone()),
        _ => None,
    }
}

//! Composition helpers for storage futures.

use std::future::Future;
use std::panic;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::join_all;
use tokio::task::{JoinError, JoinHandle};

use super::errors::StorageError;
use super::statement::ResultSet;

/// Handle to a storage operation already running on the runtime.
///
/// Resolves to the operation's own result: a panic inside the task is resumed
/// on the awaiting task, cancellation becomes `StorageError::Cancelled`.
#[derive(Debug)]
pub struct ResultFuture<T> {
    handle: JoinHandle<Result<T, StorageError>>,
}

impl<T: Send + 'static> ResultFuture<T> {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, StorageError>> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for ResultFuture<T> {
    type Output = Result<T, StorageError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.handle).poll(cx) {
            Poll::Ready(joined) => Poll::Ready(unwrap_join(joined)),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn unwrap_join<T>(joined: Result<Result<T, StorageError>, JoinError>) -> Result<T, StorageError> {
    match joined {
        Ok(result) => result,
        Err(error) if error.is_panic() => panic::resume_unwind(error.into_panic()),
        Err(_) => Err(StorageError::Cancelled),
    }
}

/// Await a spawned storage task, giving back the operation's own error
pub async fn join_result<T>(handle: JoinHandle<Result<T, StorageError>>) -> Result<T, StorageError> {
    unwrap_join(handle.await)
}

/// Wait for every future, then report the first failure in input order
pub async fn wait_for_all<T, I>(futures: I) -> Result<Vec<T>, StorageError>
where
    I: IntoIterator,
    I::Item: Future<Output = Result<T, StorageError>>,
{
    join_all(futures).await.into_iter().collect()
}

/// Chain an async step onto a successful result
pub async fn transform_async<T, U, F, Fut>(
    future: impl Future<Output = Result<T, StorageError>>,
    f: F,
) -> Result<U, StorageError>
where
    F: FnOnce(T) -> Fut,
    Fut: Future<Output = Result<U, StorageError>>,
{
    let value = future.await?;
    f(value).await
}

/// Run a rollup step over the rows of a read, skipping it when nothing was read
pub async fn rollup_async<F, Fut>(
    read: impl Future<Output = Result<ResultSet, StorageError>>,
    do_rollup: F,
) -> Result<(), StorageError>
where
    F: FnOnce(ResultSet) -> Fut,
    Fut: Future<Output = Result<(), StorageError>>,
{
    let results = read.await?;
    if results.is_empty() {
        return Ok(());
    }
    do_rollup(results).await
}

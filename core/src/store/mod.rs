pub mod memory;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tokio::sync::oneshot;

use crate::errors::{ConfigError, StoreError};

/// A primary-key table store that can open write sessions.
///
/// The store client owns networking, batching and retries. This crate only
/// submits operations in order and observes their acknowledgements.
pub trait TableStore: Send + Sync {
    type Session: WriteSession;

    /// Opens a new write session. When `partial_update` is given, every upsert
    /// issued through the session only touches the projected columns.
    fn open_write_session(
        &self,
        partial_update: Option<&PartialUpdate>,
    ) -> impl Future<Output = Result<Self::Session, StoreError>> + Send;
}

/// An open write session against one table.
pub trait WriteSession: Send {
    /// Row representation the store client understands. Opaque to this crate.
    type Row: Send + 'static;

    /// Submits an insert-or-replace. The handle resolves once the store has
    /// acknowledged the write.
    fn upsert(&mut self, row: Self::Row) -> WriteHandle;

    /// Submits a delete by primary key.
    fn delete(&mut self, row: Self::Row) -> WriteHandle;

    /// Waits until every write accepted so far is durably acknowledged.
    fn drain(&mut self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Releases the session. Writes still in flight may be abandoned, but
    /// their handles must then resolve, with [`StoreError::AckLost`] if
    /// nothing else.
    fn close(&mut self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Asynchronous completion token for a single submitted write.
pub struct WriteHandle {
    inner: BoxFuture<'static, Result<(), StoreError>>,
}

impl WriteHandle {
    /// A handle that is already acknowledged. Used for no-op writes.
    pub fn completed() -> Self {
        Self {
            inner: future::ready(Ok(())).boxed(),
        }
    }

    pub fn failed(error: StoreError) -> Self {
        Self {
            inner: future::ready(Err(error)).boxed(),
        }
    }

    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        Self { inner: fut.boxed() }
    }

    /// Creates a handle completed through the returned [`WriteAck`]. Dropping
    /// the ack without completing it resolves the handle with
    /// [`StoreError::AckLost`].
    pub fn channel() -> (WriteAck, WriteHandle) {
        let (tx, rx) = oneshot::channel();
        let handle = Self::from_future(async move { rx.await.unwrap_or(Err(StoreError::AckLost)) });
        (WriteAck { tx }, handle)
    }
}

impl Future for WriteHandle {
    type Output = Result<(), StoreError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl fmt::Debug for WriteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteHandle").finish_non_exhaustive()
    }
}

/// Completion side of a [`WriteHandle`], held by the store client.
#[derive(Debug)]
pub struct WriteAck {
    tx: oneshot::Sender<Result<(), StoreError>>,
}

impl WriteAck {
    pub fn succeed(self) {
        self.complete(Ok(()));
    }

    pub fn fail(self, error: StoreError) {
        self.complete(Err(error));
    }

    pub fn complete(self, result: Result<(), StoreError>) {
        // the writer may have abandoned the handle already
        let _ = self.tx.send(result);
    }
}

/// Column projection applied to every upsert of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialUpdate {
    columns: Vec<usize>,
}

impl PartialUpdate {
    pub fn new(columns: Vec<usize>) -> Result<Self, ConfigError> {
        if columns.is_empty() {
            return Err(ConfigError::Invalid {
                message: "target columns for partial update cannot be empty".to_string(),
            });
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].contains(column) {
                return Err(ConfigError::Invalid {
                    message: format!("duplicate target column index {}", column),
                });
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[usize] {
        &self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completed_handle_resolves_ok() {
        assert_eq!(WriteHandle::completed().await, Ok(()));
    }

    #[tokio::test]
    async fn test_channel_handle_reports_failure() {
        let (ack, handle) = WriteHandle::channel();
        ack.fail(StoreError::WriteRejected {
            reason: "schema mismatch".to_string(),
        });
        assert!(matches!(
            handle.await,
            Err(StoreError::WriteRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_ack_resolves_as_lost() {
        let (ack, handle) = WriteHandle::channel();
        drop(ack);
        assert_eq!(handle.await, Err(StoreError::AckLost));
    }

    #[tokio::test]
    async fn test_ack_after_handle_dropped_is_ignored() {
        let (ack, handle) = WriteHandle::channel();
        drop(handle);
        ack.succeed();
    }

    #[test]
    fn test_partial_update_validation() {
        assert_eq!(
            PartialUpdate::new(vec![0, 2]).unwrap().columns(),
            &[0, 2]
        );

        let err = PartialUpdate::new(vec![]).unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));

        let err = PartialUpdate::new(vec![1, 3, 1]).unwrap_err();
        assert!(err.to_string().contains("duplicate target column index 1"));
    }
}

use tracing::trace;

use crate::change::WriteOperation;
use crate::store::{WriteHandle, WriteSession};

/// Issues resolved operations against an open write session, in the order
/// they are handed in.
#[derive(Debug, Default)]
pub struct WriteDispatcher {
    upserts: u64,
    deletes: u64,
    skipped: u64,
}

impl WriteDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// One outbound store call per upsert or delete. `Skip` yields an
    /// already completed handle and never reaches the store.
    pub fn dispatch<S: WriteSession>(
        &mut self,
        session: &mut S,
        op: WriteOperation<S::Row>,
    ) -> WriteHandle {
        match op {
            WriteOperation::Upsert(row) => {
                self.upserts += 1;
                trace!("Dispatching upsert");
                session.upsert(row)
            }
            WriteOperation::Delete(row) => {
                self.deletes += 1;
                trace!("Dispatching delete");
                session.delete(row)
            }
            WriteOperation::Skip => {
                self.skipped += 1;
                WriteHandle::completed()
            }
        }
    }

    pub fn upserts(&self) -> u64 {
        self.upserts
    }

    pub fn deletes(&self) -> u64 {
        self.deletes
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TableStore;
    use crate::store::memory::{MemoryTableStore, StoreOp};

    #[tokio::test]
    async fn test_dispatch_preserves_order() {
        let store = MemoryTableStore::new();
        let mut session = store.open_write_session(None).await.unwrap();
        let mut dispatcher = WriteDispatcher::new();

        let _a = dispatcher.dispatch(&mut session, WriteOperation::Upsert("r1"));
        let _b = dispatcher.dispatch(&mut session, WriteOperation::Delete("r2"));
        let _c = dispatcher.dispatch(&mut session, WriteOperation::Upsert("r2'"));

        assert_eq!(
            store.operations(),
            vec![
                StoreOp::Upsert("r1"),
                StoreOp::Delete("r2"),
                StoreOp::Upsert("r2'")
            ]
        );
        assert_eq!(dispatcher.upserts(), 2);
        assert_eq!(dispatcher.deletes(), 1);
    }

    #[tokio::test]
    async fn test_skip_does_not_reach_store() {
        let store: MemoryTableStore<&str> = MemoryTableStore::new();
        let mut session = store.open_write_session(None).await.unwrap();
        let mut dispatcher = WriteDispatcher::new();

        let handle = dispatcher.dispatch(&mut session, WriteOperation::Skip);

        assert_eq!(handle.await, Ok(()));
        assert!(store.operations().is_empty());
        assert_eq!(store.in_flight(), 0);
        assert_eq!(dispatcher.skipped(), 1);
    }
}

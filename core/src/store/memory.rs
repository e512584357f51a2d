//! In-memory table store.
//!
//! Records every submitted operation in submission order and holds the
//! acknowledgements back until the session is drained or
//! [`MemoryTableStore::acknowledge_pending`] is called, so write handles
//! really are asynchronous. Failures can be injected for opening, for
//! individual writes and for draining.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::errors::StoreError;
use crate::store::{PartialUpdate, TableStore, WriteAck, WriteHandle, WriteSession};

/// An operation as received by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp<R> {
    Upsert(R),
    Delete(R),
}

struct InFlight {
    seq: u64,
    ack: WriteAck,
}

struct State<R> {
    operations: Vec<StoreOp<R>>,
    in_flight: Vec<InFlight>,
    write_failures: HashMap<u64, StoreError>,
    drain_failure: Option<StoreError>,
    open_failure: Option<StoreError>,
    projections: Vec<Option<Vec<usize>>>,
    sessions_closed: usize,
}

impl<R> Default for State<R> {
    fn default() -> Self {
        Self {
            operations: Vec::new(),
            in_flight: Vec::new(),
            write_failures: HashMap::new(),
            drain_failure: None,
            open_failure: None,
            projections: Vec::new(),
            sessions_closed: 0,
        }
    }
}

impl<R> State<R> {
    /// Completes every in-flight write, applying injected failures.
    fn take_completions(&mut self) -> Vec<(WriteAck, Result<(), StoreError>)> {
        let in_flight = std::mem::take(&mut self.in_flight);
        in_flight
            .into_iter()
            .map(|InFlight { seq, ack }| {
                let outcome = match self.write_failures.remove(&seq) {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
                (ack, outcome)
            })
            .collect()
    }
}

pub struct MemoryTableStore<R> {
    state: Arc<Mutex<State<R>>>,
}

impl<R> Clone for MemoryTableStore<R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<R> Default for MemoryTableStore<R> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }
}

fn lock<R>(state: &Mutex<State<R>>) -> MutexGuard<'_, State<R>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<R> MemoryTableStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent session open fail with `error`.
    pub fn fail_open(&self, error: StoreError) {
        lock(&self.state).open_failure = Some(error);
    }

    /// Fails the write with store sequence number `seq` (0-based, counted
    /// across all sessions) when it gets acknowledged.
    pub fn fail_write(&self, seq: u64, error: StoreError) {
        lock(&self.state).write_failures.insert(seq, error);
    }

    /// Makes the next drain fail without acknowledging anything.
    pub fn fail_drain(&self, error: StoreError) {
        lock(&self.state).drain_failure = Some(error);
    }

    /// Acknowledges all in-flight writes, as the store's background I/O would.
    /// Returns how many writes were completed.
    pub fn acknowledge_pending(&self) -> usize {
        let completions = lock(&self.state).take_completions();
        let count = completions.len();
        for (ack, outcome) in completions {
            ack.complete(outcome);
        }
        count
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.state).in_flight.len()
    }

    pub fn sessions_opened(&self) -> usize {
        lock(&self.state).projections.len()
    }

    pub fn sessions_closed(&self) -> usize {
        lock(&self.state).sessions_closed
    }

    /// Projection requested by each opened session, in open order.
    pub fn projections(&self) -> Vec<Option<Vec<usize>>> {
        lock(&self.state).projections.clone()
    }
}

impl<R: Clone> MemoryTableStore<R> {
    pub fn operations(&self) -> Vec<StoreOp<R>> {
        lock(&self.state).operations.clone()
    }
}

impl<R: Send + 'static> TableStore for MemoryTableStore<R> {
    type Session = MemoryWriteSession<R>;

    async fn open_write_session(
        &self,
        partial_update: Option<&PartialUpdate>,
    ) -> Result<Self::Session, StoreError> {
        let mut state = lock(&self.state);
        if let Some(err) = state.open_failure.clone() {
            return Err(err);
        }
        state
            .projections
            .push(partial_update.map(|p| p.columns().to_vec()));
        Ok(MemoryWriteSession {
            state: Arc::clone(&self.state),
            closed: false,
        })
    }
}

pub struct MemoryWriteSession<R> {
    state: Arc<Mutex<State<R>>>,
    closed: bool,
}

impl<R> MemoryWriteSession<R> {
    fn submit(&mut self, op: StoreOp<R>) -> WriteHandle {
        if self.closed {
            return WriteHandle::failed(StoreError::SessionClosed);
        }
        let mut state = lock(&self.state);
        let seq = state.operations.len() as u64;
        state.operations.push(op);
        let (ack, handle) = WriteHandle::channel();
        state.in_flight.push(InFlight { seq, ack });
        debug!(seq, "Accepted write");
        handle
    }
}

impl<R: Send + 'static> WriteSession for MemoryWriteSession<R> {
    type Row = R;

    fn upsert(&mut self, row: R) -> WriteHandle {
        self.submit(StoreOp::Upsert(row))
    }

    fn delete(&mut self, row: R) -> WriteHandle {
        self.submit(StoreOp::Delete(row))
    }

    async fn drain(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::SessionClosed);
        }
        let completions = {
            let mut state = lock(&self.state);
            if let Some(err) = state.drain_failure.take() {
                return Err(err);
            }
            state.take_completions()
        };
        for (ack, outcome) in completions {
            ack.complete(outcome);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = lock(&self.state);
        state.sessions_closed += 1;
        // unacknowledged writes resolve as lost
        state.in_flight.clear();
        Ok(())
    }
}

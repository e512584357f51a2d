use std::fmt;

use tracing::{debug, info, warn};

use crate::change::{ChangeEvent, ChangeKind, ChangeKindResolver, OperationKind};
use crate::config::SinkConfig;
use crate::dispatcher::WriteDispatcher;
use crate::errors::{Result, SinkError};
use crate::flush::FlushCoordinator;
use crate::store::{TableStore, WriteSession};
use crate::telemetry::WriterMetrics;
use crate::tracker::{CapturedFailure, DeferredFailureTracker};

/// Row type accepted by the writer for a given store.
pub type RowOf<T> = <<T as TableStore>::Session as WriteSession>::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Uninitialized,
    Open,
    Flushing,
    Closed,
}

impl WriterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriterState::Uninitialized => "uninitialized",
            WriterState::Open => "open",
            WriterState::Flushing => "flushing",
            WriterState::Closed => "closed",
        }
    }
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holds the writer in `Flushing` and puts it back to `Open` when dropped,
/// including when the flush future is dropped mid-drain.
struct FlushingGuard<'a> {
    state: &'a mut WriterState,
}

impl<'a> FlushingGuard<'a> {
    fn enter(state: &'a mut WriterState) -> Self {
        *state = WriterState::Flushing;
        Self { state }
    }
}

impl Drop for FlushingGuard<'_> {
    fn drop(&mut self) {
        *self.state = WriterState::Open;
    }
}

/// Upsert writer for a primary-key table.
///
/// Driven by a single processing task: `write`, `flush` and `close` take
/// `&mut self` and never run concurrently. Acknowledgements arrive on the
/// store's own execution resources and are observed by the failure tracker.
///
/// Lifecycle:
/// 1. `initialize` opens the write session, projected onto the configured
///    target columns when partial update is enabled.
/// 2. `write` maps each change event onto an upsert, a delete or nothing.
/// 3. `flush` drains the session at checkpoint boundaries and surfaces any
///    deferred write failure.
/// 4. `close` drains on a best-effort basis and releases the session.
///
/// Dropping the writer abandons outstanding writes without awaiting them.
pub struct UpsertSinkWriter<T: TableStore> {
    store: T,
    table: String,
    state: WriterState,
    session: Option<T::Session>,
    resolver: ChangeKindResolver,
    dispatcher: WriteDispatcher,
    tracker: DeferredFailureTracker,
    flusher: FlushCoordinator,
    fail_fast: bool,
    end_of_input: bool,
    records_in: u64,
}

impl<T: TableStore> UpsertSinkWriter<T> {
    pub fn new(store: T) -> Self {
        Self {
            store,
            table: String::new(),
            state: WriterState::Uninitialized,
            session: None,
            resolver: ChangeKindResolver::default(),
            dispatcher: WriteDispatcher::new(),
            tracker: DeferredFailureTracker::new(),
            flusher: FlushCoordinator::new(""),
            fail_fast: false,
            end_of_input: false,
            records_in: 0,
        }
    }

    pub async fn initialize(&mut self, config: &SinkConfig) -> Result<()> {
        if self.state != WriterState::Uninitialized {
            return Err(self.invalid_state("initialize"));
        }
        config.validate()?;
        let partial_update = config.partial_update()?;
        let table = config.table_path();

        let session = self
            .store
            .open_write_session(partial_update.as_ref())
            .await
            .map_err(|source| SinkError::SessionOpen {
                table: table.clone(),
                source,
            })?;

        self.resolver = ChangeKindResolver::new(config.writer.ignore_deletes);
        self.fail_fast = config.writer.fail_fast;
        self.flusher = FlushCoordinator::new(table.clone());
        self.session = Some(session);
        self.state = WriterState::Open;

        info!(
            table = %table,
            target_columns = ?partial_update.as_ref().map(|p| p.columns()),
            ignore_deletes = config.writer.ignore_deletes,
            "Finished opening upsert sink writer"
        );
        self.table = table;
        Ok(())
    }

    /// Writes one change event. Returns the logical sequence of the pending
    /// write, or `None` when the event was skipped.
    ///
    /// A write failure reported by the store does not fail this call; it is
    /// surfaced by the next `flush` or `close` unless `fail_fast` is set.
    ///
    /// Must be called from within a tokio runtime. Outside one the event is
    /// rejected with [`SinkError::MissingRuntime`] before reaching the store.
    pub fn write(&mut self, event: ChangeEvent<RowOf<T>>) -> Result<Option<u64>> {
        if !matches!(self.state, WriterState::Open | WriterState::Flushing) || self.end_of_input {
            return Err(self.invalid_state("write"));
        }
        if self.fail_fast {
            self.tracker.check_poisoned()?;
        }
        self.tracker.ensure_runtime()?;

        let op = self.resolver.to_operation(event)?;
        self.records_in += 1;
        let kind = op.kind();
        let Some(session) = self.session.as_mut() else {
            return Err(self.invalid_state("write"));
        };
        let handle = self.dispatcher.dispatch(session, op);
        if kind == OperationKind::Skip {
            return Ok(None);
        }
        let seq = self.tracker.register(handle)?;
        debug!(table = %self.table, seq, ?kind, "Submitted write");
        Ok(Some(seq))
    }

    pub fn write_row(&mut self, kind: ChangeKind, row: RowOf<T>) -> Result<Option<u64>> {
        self.write(ChangeEvent::new(kind, row))
    }

    /// Drains every accepted write and fails if any of them failed.
    ///
    /// With `end_of_input` set, a successful flush also ends the input: later
    /// writes are rejected.
    pub async fn flush(&mut self, end_of_input: bool) -> Result<()> {
        match self.state {
            WriterState::Open | WriterState::Flushing => {}
            WriterState::Closed => {
                self.tracker.check_poisoned()?;
                return Err(self.invalid_state("flush"));
            }
            WriterState::Uninitialized => return Err(self.invalid_state("flush")),
        }
        let Some(session) = self.session.as_mut() else {
            return Err(self.invalid_state("flush"));
        };

        let flushing = FlushingGuard::enter(&mut self.state);
        let result = self
            .flusher
            .flush(session, &mut self.tracker, end_of_input)
            .await;
        drop(flushing);

        if result.is_ok() && end_of_input {
            self.end_of_input = true;
        }
        result
    }

    /// Drains on a best-effort basis, releases the session, waits for every
    /// registered write to resolve and re-surfaces any captured failure.
    /// Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        match self.state {
            WriterState::Closed => return self.tracker.check_poisoned(),
            WriterState::Uninitialized => {
                self.state = WriterState::Closed;
                return Ok(());
            }
            WriterState::Open | WriterState::Flushing => {}
        }

        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.drain().await {
                warn!(table = %self.table, error = %err, "Final drain failed while closing");
                self.tracker.settle().await;
                self.tracker.capture_drain_failure(err);
            }
            if let Err(err) = session.close().await {
                warn!(table = %self.table, error = %err, "Failed to close write session");
            }
        }

        let unresolved = self.tracker.pending();
        if unresolved > 0 {
            debug!(table = %self.table, unresolved, "Waiting for writes left by the final drain");
        }
        self.tracker.await_completions().await;
        self.state = WriterState::Closed;
        info!(table = %self.table, "Closed upsert sink writer");
        self.tracker.check_poisoned()
    }

    /// Tears the writer down without draining. Outstanding writes are left
    /// to the store; nothing is rolled back. Returns how many were abandoned.
    pub fn abandon(&mut self) -> usize {
        let abandoned = self.tracker.abandon();
        self.session = None;
        self.state = WriterState::Closed;
        warn!(table = %self.table, abandoned, "Writer abandoned");
        abandoned
    }

    pub fn check_poisoned(&self) -> Result<()> {
        self.tracker.check_poisoned()
    }

    pub fn is_poisoned(&self) -> bool {
        self.tracker.is_poisoned()
    }

    pub fn poison(&self) -> Option<&CapturedFailure> {
        self.tracker.poison()
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn pending_writes(&self) -> usize {
        self.tracker.pending()
    }

    pub fn table_path(&self) -> &str {
        &self.table
    }

    pub fn metrics(&self) -> WriterMetrics {
        WriterMetrics {
            records_in: self.records_in,
            upserts: self.dispatcher.upserts(),
            deletes: self.dispatcher.deletes(),
            skipped: self.dispatcher.skipped(),
            pending_writes: self.tracker.pending(),
            flushes: self.flusher.completed(),
            failed_writes: self.tracker.failure_count(),
            suppressed_failures: self.tracker.suppressed_count(),
            poisoned: self.tracker.is_poisoned(),
        }
    }

    fn invalid_state(&self, operation: &'static str) -> SinkError {
        let state = if self.end_of_input && self.state == WriterState::Open {
            "finished"
        } else {
            self.state.as_str()
        };
        SinkError::InvalidState { operation, state }
    }
}

//! Observes asynchronous write handles and turns the first failure into a
//! sticky poison state that later synchronous calls re-raise.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::errors::{Result, SinkError, StoreError};
use crate::store::WriteHandle;

/// Where a captured failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    /// The handle of the write with this sequence failed.
    Write(u64),
    /// The store failed to drain the session.
    Drain,
    /// An observer task panicked.
    Observer,
}

/// The failure that poisoned a writer.
#[derive(Debug, Clone)]
pub struct CapturedFailure {
    pub error: Arc<StoreError>,
    pub origin: FailureOrigin,
    pub captured_at: DateTime<Utc>,
}

impl CapturedFailure {
    /// Sequence of the failed write, if the failure came through a handle.
    pub fn seq(&self) -> Option<u64> {
        match self.origin {
            FailureOrigin::Write(seq) => Some(seq),
            FailureOrigin::Drain | FailureOrigin::Observer => None,
        }
    }

    fn to_sink_error(&self) -> SinkError {
        match self.origin {
            FailureOrigin::Drain => SinkError::DrainFailure(Arc::clone(&self.error)),
            FailureOrigin::Write(_) | FailureOrigin::Observer => {
                SinkError::AsyncWriteFailure(Arc::clone(&self.error))
            }
        }
    }
}

/// Single-assignment, thread-safe poison state.
///
/// Written from completion tasks, read from the processing task. Reads never
/// block once the cell is set.
#[derive(Debug, Default)]
pub struct PoisonCell {
    first: OnceLock<CapturedFailure>,
    failures: AtomicU64,
}

impl PoisonCell {
    /// Records a failure. Returns `true` if it became the poison value.
    pub fn capture(&self, origin: FailureOrigin, err: StoreError) -> bool {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let err = Arc::new(err);
        let failure = CapturedFailure {
            error: Arc::clone(&err),
            origin,
            captured_at: Utc::now(),
        };
        if self.first.set(failure).is_ok() {
            error!(?origin, error = %err, "Write failed, writer is poisoned");
            true
        } else {
            warn!(?origin, error = %err, "Additional write failure after poisoning");
            false
        }
    }

    pub fn get(&self) -> Option<&CapturedFailure> {
        self.first.get()
    }

    pub fn is_poisoned(&self) -> bool {
        self.first.get().is_some()
    }

    /// Total failures observed, including the poisoning one.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Failures observed after the poison value was set.
    pub fn suppressed_count(&self) -> u64 {
        self.failure_count().saturating_sub(u64::from(self.is_poisoned()))
    }
}

pub struct DeferredFailureTracker {
    poison: Arc<PoisonCell>,
    in_flight: JoinSet<()>,
    next_seq: u64,
}

impl Default for DeferredFailureTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredFailureTracker {
    pub fn new() -> Self {
        Self {
            poison: Arc::new(PoisonCell::default()),
            in_flight: JoinSet::new(),
            next_seq: 0,
        }
    }

    /// Fails unless observers can be spawned from the calling context.
    pub fn ensure_runtime(&self) -> Result<Handle> {
        Handle::try_current().map_err(|_| SinkError::MissingRuntime)
    }

    /// Starts observing a submitted write and returns its logical sequence.
    pub fn register(&mut self, handle: WriteHandle) -> Result<u64> {
        let runtime = self.ensure_runtime()?;
        self.reap();
        let seq = self.next_seq;
        self.next_seq += 1;
        let poison = Arc::clone(&self.poison);
        self.in_flight.spawn_on(
            async move {
                if let Err(err) = handle.await {
                    poison.capture(FailureOrigin::Write(seq), err);
                }
            },
            &runtime,
        );
        Ok(seq)
    }

    /// Fails with the captured error if the writer is poisoned. The poison
    /// value is left in place for later checks.
    pub fn check_poisoned(&self) -> Result<()> {
        match self.poison.get() {
            Some(failure) => Err(failure.to_sink_error()),
            None => Ok(()),
        }
    }

    /// Records a failed drain of the write session.
    pub fn capture_drain_failure(&self, error: StoreError) -> bool {
        self.poison.capture(FailureOrigin::Drain, error)
    }

    /// Joins observers whose handles have already resolved, so failures
    /// that happened before this point are captured before anything later.
    pub async fn settle(&mut self) {
        tokio::task::yield_now().await;
        self.reap();
    }

    /// Waits for every registered handle to resolve.
    pub async fn await_completions(&mut self) {
        while let Some(joined) = self.in_flight.join_next().await {
            self.observe_join(joined);
        }
    }

    /// Drops all outstanding handles without awaiting them. Returns how many
    /// were still unresolved.
    pub fn abandon(&mut self) -> usize {
        self.reap();
        let abandoned = self.in_flight.len();
        self.in_flight.abort_all();
        self.in_flight = JoinSet::new();
        abandoned
    }

    /// Registered writes whose completion has not been joined yet.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn issued(&self) -> u64 {
        self.next_seq
    }

    pub fn is_poisoned(&self) -> bool {
        self.poison.is_poisoned()
    }

    pub fn poison(&self) -> Option<&CapturedFailure> {
        self.poison.get()
    }

    pub fn failure_count(&self) -> u64 {
        self.poison.failure_count()
    }

    pub fn suppressed_count(&self) -> u64 {
        self.poison.suppressed_count()
    }

    fn reap(&mut self) {
        while let Some(joined) = self.in_flight.try_join_next() {
            self.observe_join(joined);
        }
    }

    fn observe_join(&self, joined: std::result::Result<(), tokio::task::JoinError>) {
        match joined {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => debug!("Write observer cancelled"),
            Err(err) => {
                self.poison.capture(
                    FailureOrigin::Observer,
                    StoreError::WriteRejected {
                        reason: format!("write observer panicked: {}", err),
                    },
                );
            }
        }
    }
}

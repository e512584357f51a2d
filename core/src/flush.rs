//! Synchronous drain boundary aligned with pipeline checkpoints.

use std::time::Instant;

use tracing::{debug, error, info};

use crate::errors::Result;
use crate::store::WriteSession;
use crate::tracker::DeferredFailureTracker;

#[derive(Debug)]
pub struct FlushCoordinator {
    table: String,
    flushes: u64,
}

impl FlushCoordinator {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            flushes: 0,
        }
    }

    /// Blocks until the session has acknowledged every accepted write, then
    /// surfaces any deferred failure.
    ///
    /// On success no registered write is left unresolved. A failing drain is
    /// captured only after observers that already resolved have been joined,
    /// so an earlier write failure still wins. Writes the drain left
    /// unresolved stay registered for the next flush or close.
    pub async fn flush<S: WriteSession>(
        &mut self,
        session: &mut S,
        tracker: &mut DeferredFailureTracker,
        end_of_input: bool,
    ) -> Result<()> {
        let started = Instant::now();
        let pending = tracker.pending();
        debug!(table = %self.table, pending, end_of_input, "Flushing write session");

        match session.drain().await {
            Ok(()) => tracker.await_completions().await,
            Err(err) => {
                tracker.settle().await;
                tracker.capture_drain_failure(err);
            }
        }

        if let Err(err) = tracker.check_poisoned() {
            error!(table = %self.table, error = %err, "Flush failed");
            return Err(err);
        }

        self.flushes += 1;
        info!(
            table = %self.table,
            pending,
            end_of_input,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Flush completed"
        );
        Ok(())
    }

    /// Number of flushes that completed successfully.
    pub fn completed(&self) -> u64 {
        self.flushes
    }
}

use serde::Serialize;

use crate::errors::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upsert_sink_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Point-in-time counters of a writer. Emission is left to the host.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct WriterMetrics {
    pub records_in: u64,
    pub upserts: u64,
    pub deletes: u64,
    pub skipped: u64,
    pub pending_writes: usize,
    pub flushes: u64,
    pub failed_writes: u64,
    pub suppressed_failures: u64,
    pub poisoned: bool,
}

impl WriterMetrics {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

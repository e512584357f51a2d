//! Upsert writer for primary-key table stores.
//!
//! Translates changelog events into upserts and deletes against a table store
//! session, tracks their asynchronous acknowledgements and provides a flush
//! boundary at which every submitted write is either acknowledged or reported
//! as a failure.

pub mod change;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod flush;
pub mod store;
pub mod telemetry;
pub mod tracker;
pub mod writer;

pub use change::{ChangeEvent, ChangeKind, ChangeKindResolver, OperationKind, WriteOperation};
pub use config::SinkConfig;
pub use errors::{Result, SinkError, StoreError};
pub use store::{PartialUpdate, TableStore, WriteAck, WriteHandle, WriteSession};
pub use writer::{UpsertSinkWriter, WriterState};

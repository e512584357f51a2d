//! Changelog events and their mapping onto table store operations.

use std::fmt;

use crate::errors::{Result, SinkError};

/// Kind of row-level modification carried by a [`ChangeEvent`].
///
/// Known kinds use the changelog byte codes `0..=3`; anything else a producer
/// emits is preserved as `Other` so it can be reported back verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    UpdateBefore,
    UpdateAfter,
    Delete,
    Other(u8),
}

impl ChangeKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ChangeKind::Insert,
            1 => ChangeKind::UpdateBefore,
            2 => ChangeKind::UpdateAfter,
            3 => ChangeKind::Delete,
            other => ChangeKind::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ChangeKind::Insert => 0,
            ChangeKind::UpdateBefore => 1,
            ChangeKind::UpdateAfter => 2,
            ChangeKind::Delete => 3,
            ChangeKind::Other(code) => *code,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Insert => f.write_str("+I"),
            ChangeKind::UpdateBefore => f.write_str("-U"),
            ChangeKind::UpdateAfter => f.write_str("+U"),
            ChangeKind::Delete => f.write_str("-D"),
            ChangeKind::Other(code) => write!(f, "?{}", code),
        }
    }
}

/// A single row-level notification from the changelog stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent<R> {
    pub kind: ChangeKind,
    pub row: R,
}

impl<R> ChangeEvent<R> {
    pub fn new(kind: ChangeKind, row: R) -> Self {
        Self { kind, row }
    }

    pub fn insert(row: R) -> Self {
        Self::new(ChangeKind::Insert, row)
    }

    pub fn update_before(row: R) -> Self {
        Self::new(ChangeKind::UpdateBefore, row)
    }

    pub fn update_after(row: R) -> Self {
        Self::new(ChangeKind::UpdateAfter, row)
    }

    pub fn delete(row: R) -> Self {
        Self::new(ChangeKind::Delete, row)
    }
}

/// Store operation selected for a change kind, before the row is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Upsert,
    Delete,
    Skip,
}

/// Write issued against the table store for one event. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation<R> {
    Upsert(R),
    Delete(R),
    Skip,
}

impl<R> WriteOperation<R> {
    pub fn kind(&self) -> OperationKind {
        match self {
            WriteOperation::Upsert(_) => OperationKind::Upsert,
            WriteOperation::Delete(_) => OperationKind::Delete,
            WriteOperation::Skip => OperationKind::Skip,
        }
    }
}

/// Pure mapping from change kinds to store operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeKindResolver {
    ignore_deletes: bool,
}

impl ChangeKindResolver {
    pub fn new(ignore_deletes: bool) -> Self {
        Self { ignore_deletes }
    }

    pub fn ignore_deletes(&self) -> bool {
        self.ignore_deletes
    }

    /// Retractions become deletes unless deletes are ignored, in which case
    /// they are skipped without error. Unknown kinds are a producer contract
    /// violation and fail immediately.
    pub fn resolve(&self, kind: ChangeKind) -> Result<OperationKind> {
        match kind {
            ChangeKind::Insert | ChangeKind::UpdateAfter => Ok(OperationKind::Upsert),
            ChangeKind::Delete | ChangeKind::UpdateBefore => {
                if self.ignore_deletes {
                    Ok(OperationKind::Skip)
                } else {
                    Ok(OperationKind::Delete)
                }
            }
            ChangeKind::Other(_) => Err(SinkError::UnsupportedChangeKind(kind)),
        }
    }

    pub fn to_operation<R>(&self, event: ChangeEvent<R>) -> Result<WriteOperation<R>> {
        let op = match self.resolve(event.kind)? {
            OperationKind::Upsert => WriteOperation::Upsert(event.row),
            OperationKind::Delete => WriteOperation::Delete(event.row),
            OperationKind::Skip => WriteOperation::Skip,
        };
        Ok(op)
    }
}

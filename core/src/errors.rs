use std::sync::Arc;

use thiserror::Error;

use crate::change::ChangeKind;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Unsupported change kind: {0}")]
    UnsupportedChangeKind(ChangeKind),

    #[error("Asynchronous write failed: {0}")]
    AsyncWriteFailure(Arc<StoreError>),

    #[error("Pending writes could not be confirmed: {0}")]
    DrainFailure(Arc<StoreError>),

    #[error("Failed to open write session for table {table}: {source}")]
    SessionOpen {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cannot {operation} while writer is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Writes must be submitted from within a tokio runtime")]
    MissingRuntime,
}

/// Failures reported by the table store client, either synchronously or
/// through a write handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Table store is unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Write rejected by table store: {reason}")]
    WriteRejected { reason: String },

    #[error("Write acknowledgement was dropped before completion")]
    AckLost,

    #[error("Write session is closed")]
    SessionClosed,

    #[error("Failed to drain write session: {reason}")]
    Drain { reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON serialization failed: {reason}")]
    Json { reason: String },

    #[error("YAML serialization failed: {reason}")]
    Yaml { reason: String },
}

pub type Result<T> = std::result::Result<T, SinkError>;

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(SerializationError::Json {
            reason: err.to_string(),
        })
    }
}

impl From<serde_yaml::Error> for SinkError {
    fn from(err: serde_yaml::Error) -> Self {
        SinkError::Serialization(SerializationError::Yaml {
            reason: err.to_string(),
        })
    }
}

impl SinkError {
    /// Whether the hosting pipeline can recover by failing the task and
    /// replaying from its last checkpoint. This layer never retries itself.
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::AsyncWriteFailure(_) => true,
            SinkError::DrainFailure(_) => true,
            SinkError::SessionOpen { .. } => true,
            SinkError::UnsupportedChangeKind(_) => false,
            SinkError::Config(_) => false,
            SinkError::InvalidState { .. } => false,
            SinkError::Serialization(_) => false,
            SinkError::MissingRuntime => false,
        }
    }

    /// True for a deferred failure surfaced from a poisoned writer.
    pub fn is_poison(&self) -> bool {
        matches!(
            self,
            SinkError::AsyncWriteFailure(_) | SinkError::DrainFailure(_)
        )
    }

    /// The captured store failure, if this error carries one.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            SinkError::AsyncWriteFailure(err) | SinkError::DrainFailure(err) => Some(&**err),
            SinkError::SessionOpen { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::Invalid {
            message: "Test message".to_string(),
        };
        assert_eq!(error.to_string(), "Invalid configuration: Test message");
    }

    #[test]
    fn test_unsupported_change_kind_display() {
        let error = SinkError::UnsupportedChangeKind(ChangeKind::Other(9));
        assert_eq!(error.to_string(), "Unsupported change kind: ?9");
    }

    #[test]
    fn test_async_write_failure_display() {
        let error = SinkError::AsyncWriteFailure(Arc::new(StoreError::WriteRejected {
            reason: "duplicate key".to_string(),
        }));
        assert_eq!(
            error.to_string(),
            "Asynchronous write failed: Write rejected by table store: duplicate key"
        );
    }

    #[test]
    fn test_drain_failure_display() {
        let error = SinkError::DrainFailure(Arc::new(StoreError::Drain {
            reason: "timeout".to_string(),
        }));
        assert_eq!(
            error.to_string(),
            "Pending writes could not be confirmed: Failed to drain write session: timeout"
        );
        assert!(!error.to_string().contains("Asynchronous write failed"));
    }

    #[test]
    fn test_session_open_display_and_source() {
        let error = SinkError::SessionOpen {
            table: "db.orders".to_string(),
            source: StoreError::Unreachable {
                reason: "connection refused".to_string(),
            },
        };
        assert!(error.to_string().contains("db.orders"));
        assert!(std::error::Error::source(&error).is_some());
        assert_eq!(
            error.store_error(),
            Some(&StoreError::Unreachable {
                reason: "connection refused".to_string()
            })
        );
    }

    #[test]
    fn test_sink_error_from_config_error() {
        let config_error = ConfigError::MissingField {
            field: "table.name".to_string(),
        };
        let sink_error = SinkError::from(config_error);

        match sink_error {
            SinkError::Config(ConfigError::MissingField { field }) => {
                assert_eq!(field, "table.name");
            }
            _ => panic!("Expected Config error"),
        }
    }

    #[test]
    fn test_sink_error_from_serde_yaml_error() {
        let yaml_str = r#"
invalid yaml content:
  - missing quotes
  - "improper: structure
"#;
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>(yaml_str).unwrap_err();
        let sink_error = SinkError::from(yaml_error);

        match sink_error {
            SinkError::Serialization(SerializationError::Yaml { .. }) => {}
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_sink_error_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        match SinkError::from(json_error) {
            SinkError::Serialization(SerializationError::Json { .. }) => {}
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_is_retryable() {
        let retryable = vec![
            SinkError::AsyncWriteFailure(Arc::new(StoreError::AckLost)),
            SinkError::DrainFailure(Arc::new(StoreError::Drain {
                reason: "test".to_string(),
            })),
            SinkError::SessionOpen {
                table: "db.t".to_string(),
                source: StoreError::Unreachable {
                    reason: "test".to_string(),
                },
            },
        ];
        for error in retryable {
            assert!(error.is_retryable(), "Error should be retryable: {:?}", error);
        }

        let non_retryable = vec![
            SinkError::UnsupportedChangeKind(ChangeKind::Other(7)),
            SinkError::Config(ConfigError::MissingField {
                field: "table.name".to_string(),
            }),
            SinkError::InvalidState {
                operation: "write",
                state: "closed",
            },
            SinkError::MissingRuntime,
        ];
        for error in non_retryable {
            assert!(
                !error.is_retryable(),
                "Error should not be retryable: {:?}",
                error
            );
        }
    }

    #[test]
    fn test_is_poison() {
        assert!(SinkError::AsyncWriteFailure(Arc::new(StoreError::SessionClosed)).is_poison());
        assert!(SinkError::DrainFailure(Arc::new(StoreError::SessionClosed)).is_poison());
        assert!(!SinkError::MissingRuntime.is_poison());
        assert!(!SinkError::UnsupportedChangeKind(ChangeKind::Other(4)).is_poison());
    }
}

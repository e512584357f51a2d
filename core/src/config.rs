use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::{self, ConfigError};
use crate::store::PartialUpdate;

pub const CONFIG_ENV_VAR: &str = "UPSERT_SINK_CONFIG";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    pub table: TableConfig,
    #[serde(default)]
    pub writer: WriterOptions,
    /// Passed through untouched to the table store client.
    #[serde(default)]
    pub client: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TableConfig {
    pub database: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WriterOptions {
    /// Skip `Delete` and `UpdateBefore` events instead of deleting.
    #[serde(default)]
    pub ignore_deletes: bool,
    /// Column indexes for partial update. `None` writes full rows.
    #[serde(default)]
    pub target_columns: Option<Vec<usize>>,
    /// Reject writes as soon as the writer is poisoned rather than waiting
    /// for the next flush or close.
    #[serde(default)]
    pub fail_fast: bool,
}

pub async fn load_config(config_path: Option<&str>) -> anyhow::Result<SinkConfig> {
    match config_path {
        Some(path) => SinkConfig::from_file(path),
        None => SinkConfig::from_env(),
    }
}

impl SinkConfig {
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: TableConfig {
                database: database.into(),
                name: name.into(),
            },
            writer: WriterOptions::default(),
            client: HashMap::new(),
        }
    }

    pub fn with_ignore_deletes(mut self, ignore_deletes: bool) -> Self {
        self.writer.ignore_deletes = ignore_deletes;
        self
    }

    pub fn with_target_columns(mut self, columns: Vec<usize>) -> Self {
        self.writer.target_columns = Some(columns);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.writer.fail_fast = fail_fast;
        self
    }

    pub fn from_yaml_str(content: &str) -> errors::Result<Self> {
        let config: SinkConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml_str(&content)?)
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let config_str = std::env::var(CONFIG_ENV_VAR)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", CONFIG_ENV_VAR))?;
        Ok(Self::from_yaml_str(&config_str)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.database.is_empty() {
            return Err(ConfigError::MissingField {
                field: "table.database".to_string(),
            });
        }
        if self.table.name.is_empty() {
            return Err(ConfigError::MissingField {
                field: "table.name".to_string(),
            });
        }
        self.partial_update()?;
        Ok(())
    }

    pub fn partial_update(&self) -> Result<Option<PartialUpdate>, ConfigError> {
        self.writer
            .target_columns
            .clone()
            .map(PartialUpdate::new)
            .transpose()
    }

    pub fn table_path(&self) -> String {
        format!("{}.{}", self.table.database, self.table.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_config() -> SinkConfig {
        SinkConfig::new("warehouse", "orders")
    }

    #[test]
    fn test_config_validation_success() {
        let config = create_test_config();
        assert!(config.validate().is_ok());
        assert!(config.partial_update().unwrap().is_none());
    }

    #[test]
    fn test_config_validation_empty_table_name() {
        let mut config = create_test_config();
        config.table.name = "".to_string();

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Missing required field: table.name")
        );
    }

    #[test]
    fn test_config_validation_empty_database() {
        let mut config = create_test_config();
        config.table.database = "".to_string();

        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("table.database")
        );
    }

    #[test]
    fn test_config_validation_bad_target_columns() {
        let config = create_test_config().with_target_columns(vec![]);
        assert!(config.validate().is_err());

        let config = create_test_config().with_target_columns(vec![0, 1, 0]);
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("duplicate target column")
        );
    }

    #[test]
    fn test_partial_update_from_target_columns() {
        let config = create_test_config().with_target_columns(vec![0, 2]);
        let partial = config.partial_update().unwrap().unwrap();
        assert_eq!(partial.columns(), &[0, 2]);
    }

    #[test]
    fn test_malformed_yaml_is_a_serialization_error() {
        let err = SinkConfig::from_yaml_str("table: [unclosed").unwrap_err();
        assert!(matches!(
            err,
            errors::SinkError::Serialization(errors::SerializationError::Yaml { .. })
        ));
    }

    #[test]
    fn test_table_path() {
        assert_eq!(create_test_config().table_path(), "warehouse.orders");
    }

    #[test]
    fn test_config_from_yaml_file() {
        let yaml_content = r#"
table:
  database: "warehouse"
  name: "orders"

writer:
  ignore_deletes: true
  target_columns: [0, 3]

client:
  bootstrap.servers: "localhost:9123"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = SinkConfig::from_file(temp_file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.table.database, "warehouse");
        assert_eq!(config.table.name, "orders");
        assert!(config.writer.ignore_deletes);
        assert!(!config.writer.fail_fast);
        assert_eq!(config.writer.target_columns, Some(vec![0, 3]));
        assert_eq!(
            config.client.get("bootstrap.servers").map(String::as_str),
            Some("localhost:9123")
        );
    }

    #[test]
    fn test_writer_section_defaults() {
        let config: SinkConfig = serde_yaml::from_str(
            r#"
table:
  database: "db"
  name: "t"
"#,
        )
        .unwrap();

        assert!(!config.writer.ignore_deletes);
        assert!(config.writer.target_columns.is_none());
        assert!(config.client.is_empty());
    }

    // Both env cases share one test so they cannot race on the variable.
    #[test]
    fn test_config_from_env() {
        unsafe {
            std::env::remove_var(CONFIG_ENV_VAR);
        }
        let result = SinkConfig::from_env();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("UPSERT_SINK_CONFIG environment variable not set")
        );

        let yaml_content = r#"
table:
  database: "env_db"
  name: "env_table"
writer:
  fail_fast: true
"#;
        unsafe {
            std::env::set_var(CONFIG_ENV_VAR, yaml_content);
        }

        let config = SinkConfig::from_env().unwrap();
        assert_eq!(config.table_path(), "env_db.env_table");
        assert!(config.writer.fail_fast);

        unsafe {
            std::env::remove_var(CONFIG_ENV_VAR);
        }
    }

    #[tokio::test]
    async fn test_load_config_from_path() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"table:\n  database: a\n  name: b\n")
            .unwrap();

        let config = load_config(temp_file.path().to_str()).await.unwrap();
        assert_eq!(config.table_path(), "a.b");
    }
}

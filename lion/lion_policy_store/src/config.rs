//! Configuration for the policy store
//!
//! Handles loading and validating adapter configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::error::{AdapterError, Result};
use crate::schema::{validate_identifier, DEFAULT_TABLE};

/// Adapter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// SQLite connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Rule table name
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Boolean column used for soft deletion, if any
    #[serde(default)]
    pub soft_delete_column: Option<String>,

    /// Initial value of the filtered marker
    #[serde(default)]
    pub filtered: bool,

    /// Maximum pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Whether to create the rule table on connect
    #[serde(default = "default_create_table")]
    pub create_table: bool,
}

fn default_database_url() -> String {
    "sqlite::memory:".to_string()
}

fn default_table_name() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_create_table() -> bool {
    true
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            table_name: default_table_name(),
            soft_delete_column: None,
            filtered: false,
            max_connections: default_max_connections(),
            create_table: default_create_table(),
        }
    }
}

impl AdapterConfig {
    /// Load configuration from a JSON file
    pub async fn load(path: Option<&str>) -> Result<Self> {
        let mut config = AdapterConfig::default();

        if let Some(path) = path {
            info!("Loading policy store configuration from {}", path);

            if !Path::new(path).exists() {
                warn!("Configuration file not found: {}", path);
                return Ok(config);
            }

            let content = fs::read_to_string(path).await?;
            config = serde_json::from_str(&content)?;
        } else {
            info!("No configuration file specified, using defaults");
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(AdapterError::Config(
                "Database URL cannot be empty".to_string(),
            ));
        }

        validate_identifier(&self.table_name)?;

        if let Some(column) = &self.soft_delete_column {
            validate_identifier(column)?;
        }

        if self.max_connections == 0 {
            return Err(AdapterError::Config(
                "Max connections cannot be zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether the database lives in memory.
    ///
    /// Every connection to an in-memory SQLite database sees its own
    /// database, so such pools are limited to one connection.
    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_load_config() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();

        let config_json = r#"
        {
            "database_url": "sqlite://rules.db",
            "table_name": "casbin_rule",
            "soft_delete_column": "is_deleted",
            "max_connections": 2
        }
        "#;

        fs::write(path, config_json).await.unwrap();

        let config = AdapterConfig::load(Some(path)).await.unwrap();

        assert_eq!(config.database_url, "sqlite://rules.db");
        assert_eq!(config.table_name, "casbin_rule");
        assert_eq!(config.soft_delete_column, Some("is_deleted".to_string()));
        assert_eq!(config.max_connections, 2);
        assert!(!config.filtered);
        assert!(config.create_table);
        assert!(!config.is_in_memory());
    }

    #[tokio::test]
    async fn test_default_config() {
        let config = AdapterConfig::load(None).await.unwrap();

        assert_eq!(config, AdapterConfig::default());
        assert_eq!(config.table_name, "policy_rule");
        assert_eq!(config.max_connections, 5);
        assert!(config.is_in_memory());
    }

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let config = AdapterConfig::load(Some("/nonexistent/policy_store.json"))
            .await
            .unwrap();
        assert_eq!(config, AdapterConfig::default());
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        fs::write(path, "{ not json").await.unwrap();

        let result = AdapterConfig::load(Some(path)).await;
        assert!(matches!(result, Err(AdapterError::Serialization(_))));
    }

    #[test]
    fn test_validate() {
        let mut config = AdapterConfig::default();
        config.max_connections = 0;
        assert!(matches!(config.validate(), Err(AdapterError::Config(_))));

        let mut config = AdapterConfig::default();
        config.table_name = "rules; --".to_string();
        assert!(matches!(
            config.validate(),
            Err(AdapterError::InvalidIdentifier(_))
        ));

        let mut config = AdapterConfig::default();
        config.soft_delete_column = Some(String::new());
        assert!(config.validate().is_err());
    }
}

//! File configuration for embedding applications and the CLI

use crate::error::TreeError;
use crate::path::{PathCodec, PathConfig};
use crate::store::SqliteStoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the database file, overriding the TOML value
pub const DATABASE_ENV: &str = "LINEAGE_DB";

/// Environment variable naming the TOML configuration file
pub const CONFIG_ENV: &str = "LINEAGE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Path(#[from] TreeError),
}

/// ```toml
/// database = "family.db"
///
/// [path]
/// separator = "."
/// alphabet = "chars"
/// segment_length = 3
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineageConfig {
    /// SQLite database file
    pub database: PathBuf,

    pub path: PathConfig,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("lineage.db"),
            path: PathConfig::default(),
        }
    }
}

impl LineageConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.path.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `LINEAGE_DB` if it is set
    pub fn merge_env(&mut self) {
        if let Ok(database) = std::env::var(DATABASE_ENV) {
            if !database.is_empty() {
                self.database = PathBuf::from(database);
            }
        }
    }

    pub fn codec(&self) -> Result<PathCodec, TreeError> {
        PathCodec::new(self.path.clone())
    }

    pub fn store_config(&self) -> SqliteStoreConfig {
        SqliteStoreConfig {
            db_path: self.database.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Alphabet;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = LineageConfig::from_toml_str("").unwrap();
        assert_eq!(config, LineageConfig::default());

        let config = LineageConfig::from_toml_str("database = \"family.db\"").unwrap();
        assert_eq!(config.database, PathBuf::from("family.db"));
        assert_eq!(config.path, PathConfig::default());
    }

    #[test]
    fn reads_path_section() {
        let config = LineageConfig::from_toml_str(
            r#"
            [path]
            separator = "/"
            alphabet = "digits"
            segment_length = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.path.separator, '/');
        assert_eq!(config.path.alphabet, Alphabet::Digits);
        assert_eq!(config.codec().unwrap().first_possible_segment(), "0000");
    }

    #[test]
    fn rejects_invalid_path_config() {
        let err = LineageConfig::from_toml_str("[path]\nsegment_length = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Path(TreeError::InvalidConfig(_))));

        let err = LineageConfig::from_toml_str("[path]\nseparator = \"a\"").unwrap_err();
        assert!(matches!(err, ConfigError::Path(_)));

        assert!(matches!(
            LineageConfig::from_toml_str("database = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lineage.toml");
        std::fs::write(&file, "database = \"smiths.db\"\n").unwrap();
        let config = LineageConfig::from_toml_file(&file).unwrap();
        assert_eq!(config.store_config().db_path, PathBuf::from("smiths.db"));

        let missing = LineageConfig::from_toml_file(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}

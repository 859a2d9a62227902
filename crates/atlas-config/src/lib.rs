//! Configuration management for Atlas
//!
//! Handles catalog paths, importer defaults and the logging level.
//! Settings live in a single TOML file; every field has a default so a
//! partial (or missing) file still yields a usable configuration.

mod importer;
mod paths;

pub use importer::{DEFAULT_PATH_PATTERN, ImporterConfig, LoggingConfig};
pub use paths::PathsConfig;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Default location of the user configuration file
pub const CONFIG_FILE: &str = "./data/config.toml";

/// Main Atlas configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtlasConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub importer: ImporterConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AtlasConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> Result<Self, ConfigError> {
        let user_config = Path::new(CONFIG_FILE);
        if user_config.exists() {
            return Self::load(user_config);
        }

        tracing::warn!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        tracing::info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject settings the importer cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.importer.validate()
    }
}

/// Helper function to merge TOML values
pub fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                if let Some(base_value) = base_table.get_mut(&key) {
                    merge_toml(base_value, value);
                } else {
                    base_table.insert(key, value);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = AtlasConfig::default();
        assert_eq!(config.paths.database, PathBuf::from("./data/atlas.db"));
        assert!(config.importer.move_imported);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let config_content = r#"
[paths]
games = "/srv/games"

[importer]
move_imported = false
"#;
        write!(temp_file, "{}", config_content).unwrap();

        let config = AtlasConfig::load(temp_file.path()).unwrap();
        assert_eq!(config.paths.games, PathBuf::from("/srv/games"));
        assert!(!config.importer.move_imported);
        // Untouched sections fall back to defaults
        assert_eq!(config.paths.images, PathBuf::from("./data/images"));
        assert_eq!(config.importer.path_pattern, DEFAULT_PATH_PATTERN);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = AtlasConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_rejects_bad_pattern() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "[importer]\npath_pattern = \"{{creator}}/{{version}}\"\n").unwrap();

        let err = AtlasConfig::load(temp_file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_save_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AtlasConfig::default();
        config.importer.skip_filesize = true;

        config.save(&path).unwrap();

        let loaded = AtlasConfig::load(&path).unwrap();
        assert!(loaded.importer.skip_filesize);
        assert_eq!(loaded.paths.games, config.paths.games);
    }

    #[test]
    fn test_merge_toml_tables() {
        let base_table = toml::toml! {
            [importer]
            move_imported = true
            skip_filesize = false
        };
        let mut base = toml::Value::Table(base_table);

        let overlay_table = toml::toml! {
            [importer]
            skip_filesize = true
        };
        let overlay = toml::Value::Table(overlay_table);

        merge_toml(&mut base, overlay);

        let table = base.as_table().unwrap();
        let importer = table.get("importer").unwrap().as_table().unwrap();
        assert_eq!(importer.get("move_imported").unwrap().as_bool(), Some(true));
        assert_eq!(importer.get("skip_filesize").unwrap().as_bool(), Some(true));
    }

    #[test]
    fn test_merge_toml_replaces_non_tables() {
        let mut base = toml::Value::Integer(42);
        merge_toml(&mut base, toml::Value::Integer(100));
        assert_eq!(base.as_integer(), Some(100));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::NotFound(PathBuf::from("./data/config.toml"));
        assert!(format!("{}", err).contains("not found"));

        let err = ConfigError::Invalid("test error".to_string());
        assert!(format!("{}", err).contains("Invalid"));
    }
}

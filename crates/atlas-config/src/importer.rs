//! Importer and logging settings

use crate::ConfigError;
use serde::{Deserialize, Serialize};

/// Folder layout the scanner expects below a source root
pub const DEFAULT_PATH_PATTERN: &str = "{creator}/{title}/{version}";

/// Import behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImporterConfig {
    /// Folder layout, built from `{creator}`, `{title}` and `{version}`
    #[serde(default = "default_path_pattern")]
    pub path_pattern: String,

    /// Do not measure folder sizes while scanning
    #[serde(default)]
    pub skip_filesize: bool,

    /// Move imported games into the games directory
    #[serde(default = "default_true")]
    pub move_imported: bool,
}

fn default_path_pattern() -> String {
    DEFAULT_PATH_PATTERN.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            path_pattern: default_path_pattern(),
            skip_filesize: false,
            move_imported: true,
        }
    }
}

impl ImporterConfig {
    /// Path pattern split into its components
    pub fn pattern_components(&self) -> Vec<&str> {
        self.path_pattern
            .split('/')
            .filter(|c| !c.is_empty())
            .collect()
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let components = self.pattern_components();
        for required in ["{title}", "{version}"] {
            if !components.contains(&required) {
                return Err(ConfigError::Invalid(format!(
                    "path pattern '{}' is missing {}",
                    self.path_pattern, required
                )));
            }
        }
        Ok(())
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

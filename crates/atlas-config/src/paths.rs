//! Filesystem locations used by the catalog

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the catalog keeps its data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root data directory
    #[serde(default = "default_data")]
    pub data: PathBuf,

    /// SQLite database file
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Destination root for games moved into the library
    #[serde(default = "default_games")]
    pub games: PathBuf,

    /// Downloaded and imported artwork
    #[serde(default = "default_images")]
    pub images: PathBuf,
}

fn default_data() -> PathBuf {
    PathBuf::from("./data")
}

fn default_database() -> PathBuf {
    PathBuf::from("./data/atlas.db")
}

fn default_games() -> PathBuf {
    PathBuf::from("./data/games")
}

fn default_images() -> PathBuf {
    PathBuf::from("./data/images")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data: default_data(),
            database: default_database(),
            games: default_games(),
            images: default_images(),
        }
    }
}

impl PathsConfig {
    /// Create every directory the catalog writes into
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data)?;
        std::fs::create_dir_all(&self.games)?;
        std::fs::create_dir_all(&self.images)?;
        if let Some(parent) = self.database.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_values() {
        let paths = PathsConfig::default();
        assert_eq!(paths.data, PathBuf::from("./data"));
        assert_eq!(paths.games, PathBuf::from("./data/games"));
    }

    #[test]
    fn test_ensure_dirs() {
        let dir = TempDir::new().unwrap();
        let paths = PathsConfig {
            data: dir.path().join("data"),
            database: dir.path().join("db").join("atlas.db"),
            games: dir.path().join("data").join("games"),
            images: dir.path().join("data").join("images"),
        };

        paths.ensure_dirs().unwrap();

        assert!(paths.games.is_dir());
        assert!(paths.images.is_dir());
        assert!(dir.path().join("db").is_dir());
    }
}

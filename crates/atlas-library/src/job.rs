//! Import job descriptions

use crate::LibraryError;
use atlas_config::AtlasConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One game folder to import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportJob {
    /// Folder relative to the import source root
    pub path: PathBuf,
    pub title: String,
    pub creator: String,
    pub engine: String,
    pub version: String,
    /// Declared size in bytes; measured at import time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Executable candidates relative to the folder
    #[serde(default)]
    pub executables: Vec<PathBuf>,
    /// Chosen executable relative to the folder
    pub executable: PathBuf,
}

/// What the pipeline does after a job fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Hold at the next job boundary until unpaused or aborted. Skipped
    /// when no other handle to the processor exists to resume the run.
    #[default]
    Pause,
    /// Report the failure and go on with the next job
    Continue,
    /// Report the failure and stop the run
    Abort,
}

/// Where imported files come from and where they end up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    pub source_root: PathBuf,
    /// Games root that relocated versions are copied into
    pub destination_root: PathBuf,
    /// Copy into the library and remove the source folder afterwards;
    /// otherwise versions point at their source folders
    pub move_after_import: bool,
    pub on_failure: FailurePolicy,
}

impl ImportOptions {
    /// Leave files where they are
    pub fn in_place(source_root: impl Into<PathBuf>) -> Self {
        let source_root = source_root.into();
        Self {
            destination_root: source_root.clone(),
            source_root,
            move_after_import: false,
            on_failure: FailurePolicy::default(),
        }
    }

    /// Copy files under `destination_root` and remove the originals
    pub fn relocate(source_root: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            move_after_import: true,
            on_failure: FailurePolicy::default(),
        }
    }

    /// Games root and move policy from the configuration
    pub fn from_config(source_root: impl Into<PathBuf>, config: &AtlasConfig) -> Self {
        Self {
            source_root: source_root.into(),
            destination_root: config.paths.games.clone(),
            move_after_import: config.importer.move_imported,
            on_failure: FailurePolicy::default(),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }
}

#[derive(Debug, Deserialize)]
struct JobFile {
    #[serde(default)]
    jobs: Vec<ImportJob>,
}

/// Read a job list written as TOML `[[jobs]]` tables
pub fn load_jobs(path: &Path) -> Result<Vec<ImportJob>, LibraryError> {
    let content = std::fs::read_to_string(path).map_err(LibraryError::fs(path))?;
    let file: JobFile = toml::from_str(&content)?;
    tracing::debug!("Loaded {} import jobs from {}", file.jobs.len(), path.display());
    Ok(file.jobs)
}

//! Record catalog for Atlas
//!
//! Keeps one shared in-memory instance per catalog record, persists every
//! change through scoped SQLite transactions and imports game folders on a
//! pausable background worker.

mod database;
mod engine;
mod files;
mod import;
mod job;
mod record;
mod scanner;
mod store;
mod transaction;

pub use database::Database;
pub use engine::Engine;
pub use files::{IMAGE_EXTENSIONS, collect_files, copy_tree, find_banners, folder_size};
pub use import::{
    FailureKind, ImportEvent, ImportFailure, ImportHandle, ImportObserver, ImportProcessor,
    ImportState, ImportSummary,
};
pub use job::{FailurePolicy, ImportJob, ImportOptions, load_jobs};
pub use record::{BannerType, Record, RecordData, RecordId, Version};
pub use scanner::{EngineClassifier, ImportScanner, NoClassifier, ScanConfig, ScanResult};
pub use store::RecordStore;
pub use transaction::{Transaction, TransactionMode};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error(
        "Record already exists: '{}' by '{}' ({}) has id {}",
        .existing.title(),
        .existing.creator(),
        .existing.engine(),
        .existing.id()
    )]
    IdentityConflict { existing: Record },

    #[error("Transaction rejected: {0}")]
    Transaction(#[source] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("Record {record} already has a version named '{version}'")]
    DuplicateVersion { record: RecordId, version: String },

    #[error("Record {record} has no version named '{version}'")]
    VersionNotFound { record: RecordId, version: String },

    #[error("New preview order must contain exactly the current previews")]
    InvalidPreviewOrder,

    #[error("Filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Invalid job file: {0}")]
    JobFile(#[from] toml::de::Error),

    #[error("An import is already running")]
    AlreadyRunning,

    #[error("Unexpected failure: {0}")]
    Anomaly(String),
}

impl LibraryError {
    pub(crate) fn fs(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Filesystem { path, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LibraryError::DuplicateVersion {
            record: RecordId::new(7),
            version: "1.0".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Record 7 already has a version named '1.0'"
        );

        let err = LibraryError::fs("/games/x")(std::io::Error::other("disk full"));
        assert!(err.to_string().contains("/games/x"));
        assert!(err.to_string().contains("disk full"));
    }
}

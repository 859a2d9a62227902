//! Background import of game folders into the catalog

use crate::LibraryError;
use crate::database::Database;
use crate::files::{copy_tree, find_banners, folder_size};
use crate::job::{FailurePolicy, ImportJob, ImportOptions};
use crate::record::{RecordId, Version};
use crate::transaction::TransactionMode;
use std::any::Any;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Lifecycle of one import run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportState {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Aborted,
}

impl ImportState {
    /// Running or paused
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

/// Category of a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    IdentityConflict,
    Transaction,
    Storage,
    Filesystem,
    Anomaly,
}

impl FailureKind {
    pub fn of(error: &LibraryError) -> Self {
        match error {
            LibraryError::IdentityConflict { .. } => Self::IdentityConflict,
            LibraryError::Transaction(_) => Self::Transaction,
            LibraryError::Storage(_) | LibraryError::RecordNotFound(_) => Self::Storage,
            LibraryError::Filesystem { .. } | LibraryError::Walk(_) => Self::Filesystem,
            _ => Self::Anomaly,
        }
    }
}

/// Report for one failed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFailure {
    /// Position of the job in the batch
    pub index: usize,
    pub title: String,
    pub kind: FailureKind,
    pub message: String,
    /// Record that already holds the job's identity, for conflicts
    pub existing: Option<RecordId>,
}

impl ImportFailure {
    fn new(index: usize, job: &ImportJob, error: &LibraryError) -> Self {
        let existing = match error {
            LibraryError::IdentityConflict { existing } => Some(existing.id()),
            _ => None,
        };
        Self {
            index,
            title: job.title.clone(),
            kind: FailureKind::of(error),
            message: error.to_string(),
            existing,
        }
    }
}

/// Progress notifications sent from the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportEvent {
    Started { total: usize },
    Processing { index: usize, total: usize, title: String },
    Copying {
        index: usize,
        current: usize,
        total: usize,
        file: PathBuf,
    },
    Imported { index: usize, id: RecordId },
    Failed(ImportFailure),
    Paused,
    Resumed,
    Completed { imported: usize, failed: usize },
    Aborted { imported: usize },
}

/// Receives progress events. Called on the worker thread; must not block
/// for long.
pub trait ImportObserver {
    fn on_event(&self, event: ImportEvent);
}

impl ImportObserver for Sender<ImportEvent> {
    fn on_event(&self, event: ImportEvent) {
        // Receiver gone means nobody is listening, not a failure
        let _ = self.send(event);
    }
}

impl ImportObserver for () {
    fn on_event(&self, _event: ImportEvent) {}
}

/// Outcome of a finished run
#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub state: ImportState,
    pub completed: Vec<RecordId>,
    pub failures: Vec<ImportFailure>,
}

#[derive(Debug, Default)]
struct Control {
    abort: AtomicBool,
    pause: AtomicBool,
    gate: Mutex<()>,
    wake: Condvar,
    state: Mutex<ImportState>,
    completed: Mutex<Vec<RecordId>>,
}

impl Control {
    fn state(&self) -> MutexGuard<'_, ImportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn completed(&self) -> MutexGuard<'_, Vec<RecordId>> {
        self.completed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.wake.notify_all();
    }
}

/// Control handle for the import worker.
///
/// Clones share the same run: any clone may pause, resume or abort it from
/// any thread. Jobs are processed one at a time; a job's transaction is
/// committed or rolled back before the next job starts, and pause and abort
/// take effect only between jobs.
#[derive(Debug, Clone, Default)]
pub struct ImportProcessor {
    control: Arc<Control>,
}

impl ImportProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ImportState {
        *self.control.state()
    }

    /// Ids of the records imported so far, in job order
    pub fn completed(&self) -> Vec<RecordId> {
        self.control.completed().clone()
    }

    /// Hold the worker at the next job boundary
    pub fn pause(&self) {
        let mut state = self.control.state();
        if state.is_active() {
            self.control.pause.store(true, Ordering::SeqCst);
            *state = ImportState::Paused;
            tracing::debug!("Pausing import");
        }
    }

    pub fn unpause(&self) {
        let mut state = self.control.state();
        if state.is_active() {
            self.control.pause.store(false, Ordering::SeqCst);
            *state = ImportState::Running;
            drop(state);
            self.control.notify();
            tracing::debug!("Unblocking import");
        }
    }

    /// Stop before the next job. Clears the pause flag so a waiting worker
    /// wakes up to see the abort.
    pub fn abort(&self) {
        self.control.abort.store(true, Ordering::SeqCst);
        self.control.pause.store(false, Ordering::SeqCst);
        self.control.notify();
        tracing::debug!("Aborting import");
    }

    /// Run `jobs` on a dedicated worker thread
    pub fn start<O>(
        &self,
        db: Arc<Database>,
        jobs: Vec<ImportJob>,
        options: ImportOptions,
        observer: O,
    ) -> Result<ImportHandle, LibraryError>
    where
        O: ImportObserver + Send + 'static,
    {
        self.begin()?;

        let processor = self.clone();
        let worker = thread::Builder::new()
            .name("atlas-import".to_string())
            .spawn(move || processor.process(&db, &jobs, &options, &observer));

        match worker {
            Ok(worker) => Ok(ImportHandle {
                worker,
                processor: self.clone(),
            }),
            Err(e) => {
                *self.control.state() = ImportState::Idle;
                Err(LibraryError::Anomaly(format!(
                    "failed to spawn import worker: {e}"
                )))
            }
        }
    }

    /// Run `jobs` on the calling thread.
    ///
    /// With [`FailurePolicy::Pause`] a failed job holds the run only while
    /// another clone of this processor exists (held by the observer or
    /// another thread) to unpause or abort it.
    pub fn run(
        &self,
        db: &Database,
        jobs: &[ImportJob],
        options: &ImportOptions,
        observer: &dyn ImportObserver,
    ) -> Result<ImportSummary, LibraryError> {
        self.begin()?;
        Ok(self.process(db, jobs, options, observer))
    }

    fn begin(&self) -> Result<(), LibraryError> {
        let mut state = self.control.state();
        if state.is_active() {
            return Err(LibraryError::AlreadyRunning);
        }

        self.control.abort.store(false, Ordering::SeqCst);
        self.control.pause.store(false, Ordering::SeqCst);
        self.control.completed().clear();
        *state = ImportState::Running;
        Ok(())
    }

    fn process(
        &self,
        db: &Database,
        jobs: &[ImportJob],
        options: &ImportOptions,
        observer: &dyn ImportObserver,
    ) -> ImportSummary {
        let total = jobs.len();
        let mut failures = Vec::new();

        tracing::info!(
            "Importing {} jobs from {} ({})",
            total,
            options.source_root.display(),
            if options.move_after_import {
                "relocate"
            } else {
                "in place"
            }
        );
        observer.on_event(ImportEvent::Started { total });

        for (index, job) in jobs.iter().enumerate() {
            self.wait_while_paused(observer);

            if self.control.abort.load(Ordering::SeqCst) {
                return self.finish_aborted(failures, observer);
            }

            observer.on_event(ImportEvent::Processing {
                index,
                total,
                title: job.title.clone(),
            });

            match self.import_job(db, index, job, options, observer) {
                Ok(id) => {
                    self.control.completed().push(id);
                    tracing::debug!("Import of '{}' succeeded with id {}", job.title, id);
                    observer.on_event(ImportEvent::Imported { index, id });
                }
                Err(e) => {
                    let failure = ImportFailure::new(index, job, &e);
                    if failure.kind == FailureKind::Anomaly {
                        tracing::error!("Unexpected failure importing '{}': {}", job.title, e);
                    } else {
                        tracing::warn!("Failed to import '{}': {}", job.title, e);
                    }

                    self.after_failure(options.on_failure);
                    observer.on_event(ImportEvent::Failed(failure.clone()));
                    failures.push(failure);
                }
            }
        }

        // A failure on the last job leaves nothing to hold
        self.control.pause.store(false, Ordering::SeqCst);
        let completed = self.completed();
        *self.control.state() = ImportState::Completed;
        tracing::info!(
            "Import finished: {} imported, {} failed",
            completed.len(),
            failures.len()
        );
        observer.on_event(ImportEvent::Completed {
            imported: completed.len(),
            failed: failures.len(),
        });

        ImportSummary {
            state: ImportState::Completed,
            completed,
            failures,
        }
    }

    fn finish_aborted(
        &self,
        failures: Vec<ImportFailure>,
        observer: &dyn ImportObserver,
    ) -> ImportSummary {
        self.control.abort.store(false, Ordering::SeqCst);
        self.control.pause.store(false, Ordering::SeqCst);
        *self.control.state() = ImportState::Aborted;

        let completed = self.completed();
        tracing::info!("Import aborted after {} records", completed.len());
        observer.on_event(ImportEvent::Aborted {
            imported: completed.len(),
        });

        ImportSummary {
            state: ImportState::Aborted,
            completed,
            failures,
        }
    }

    fn after_failure(&self, policy: FailurePolicy) {
        match policy {
            FailurePolicy::Continue => {}
            FailurePolicy::Abort => {
                self.control.abort.store(true, Ordering::SeqCst);
            }
            // Only this handle exists, so nothing could ever unpause
            FailurePolicy::Pause if Arc::strong_count(&self.control) == 1 => {
                tracing::debug!("No other import handle to resume from, continuing");
            }
            FailurePolicy::Pause => self.auto_pause(),
        }
    }

    fn auto_pause(&self) {
        let mut state = self.control.state();
        self.control.pause.store(true, Ordering::SeqCst);
        if *state == ImportState::Running {
            *state = ImportState::Paused;
        }
    }

    fn wait_while_paused(&self, observer: &dyn ImportObserver) {
        if !self.control.pause.load(Ordering::SeqCst) {
            return;
        }

        observer.on_event(ImportEvent::Paused);
        {
            let mut gate = self.control.gate.lock().unwrap_or_else(PoisonError::into_inner);
            while self.control.pause.load(Ordering::SeqCst)
                && !self.control.abort.load(Ordering::SeqCst)
            {
                gate = self
                    .control
                    .wake
                    .wait(gate)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        if !self.control.abort.load(Ordering::SeqCst) {
            observer.on_event(ImportEvent::Resumed);
        }
    }

    fn import_job(
        &self,
        db: &Database,
        index: usize,
        job: &ImportJob,
        options: &ImportOptions,
        observer: &dyn ImportObserver,
    ) -> Result<RecordId, LibraryError> {
        let source_folder = options.source_root.join(&job.path);
        if !source_folder.is_dir() {
            return Err(LibraryError::fs(&source_folder)(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "source folder does not exist",
            )));
        }

        let (stored_path, version_folder) = if options.move_after_import {
            let relative: PathBuf = [&job.creator, &job.title, &job.version].iter().collect();
            let dest_folder = options.destination_root.join(&relative);
            copy_tree(&source_folder, &dest_folder, |current, total, file| {
                observer.on_event(ImportEvent::Copying {
                    index,
                    current,
                    total,
                    file: file.to_path_buf(),
                });
            })?;
            (relative, dest_folder)
        } else {
            (source_folder.clone(), source_folder.clone())
        };

        let size = match job.size {
            Some(size) => size,
            None => folder_size(&version_folder)?,
        };

        let txn = db.transaction(TransactionMode::Deferred)?;
        let record = db
            .records()
            .import(&job.title, &job.creator, &job.engine, &txn)?;
        record.add_version(
            Version {
                name: job.version.clone(),
                path: stored_path,
                executable: job.executable.clone(),
                size,
                in_place: !options.move_after_import,
            },
            &txn,
        )?;
        txn.commit()?;

        // The folder the version now lives in; a relocated source is removed below
        let banners = find_banners(&version_folder)?;
        if !banners.is_empty() {
            let txn = db.transaction(TransactionMode::Deferred)?;
            for (kind, path) in &banners {
                record.set_banner(*kind, path, &txn)?;
            }
            txn.commit()?;
        }

        if options.move_after_import
            && let Err(e) = std::fs::remove_dir_all(&source_folder)
        {
            tracing::warn!(
                "Could not remove imported folder {}: {}",
                source_folder.display(),
                e
            );
        }

        Ok(record.id())
    }
}

/// Worker thread started by [`ImportProcessor::start`]
#[derive(Debug)]
pub struct ImportHandle {
    worker: JoinHandle<ImportSummary>,
    processor: ImportProcessor,
}

impl ImportHandle {
    pub fn processor(&self) -> &ImportProcessor {
        &self.processor
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker. A panic on the worker becomes
    /// [`LibraryError::Anomaly`] and leaves the run aborted.
    pub fn join(self) -> Result<ImportSummary, LibraryError> {
        match self.worker.join() {
            Ok(summary) => Ok(summary),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("Import worker panicked: {}", message);
                *self.processor.control.state() = ImportState::Aborted;
                Err(LibraryError::Anomaly(format!(
                    "import worker panicked: {message}"
                )))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind() {
        let fs_error = LibraryError::fs("/x")(std::io::Error::other("denied"));
        assert_eq!(FailureKind::of(&fs_error), FailureKind::Filesystem);
        assert_eq!(
            FailureKind::of(&LibraryError::RecordNotFound(RecordId::new(1))),
            FailureKind::Storage
        );
        assert_eq!(
            FailureKind::of(&LibraryError::Anomaly("boom".to_string())),
            FailureKind::Anomaly
        );
    }

    #[test]
    fn test_controls_ignored_while_idle() {
        let processor = ImportProcessor::new();
        processor.pause();
        assert_eq!(processor.state(), ImportState::Idle);
        processor.unpause();
        assert_eq!(processor.state(), ImportState::Idle);
    }

    #[test]
    fn test_empty_batch_completes() {
        let db = Database::in_memory().unwrap();
        let processor = ImportProcessor::new();
        let summary = processor
            .run(&db, &[], &ImportOptions::in_place("/nonexistent"), &())
            .unwrap();
        assert_eq!(summary.state, ImportState::Completed);
        assert!(summary.completed.is_empty());
        assert_eq!(processor.state(), ImportState::Completed);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("worker died");
        assert_eq!(panic_message(payload.as_ref()), "worker died");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}

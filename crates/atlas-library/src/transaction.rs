//! Scoped units of work against the catalog database

use crate::LibraryError;
use crate::record::Record;
use crate::store::RecordStore;
use rusqlite::{Connection, Params, Row};
use std::cell::RefCell;
use std::sync::MutexGuard;

/// When statements become durable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Every statement commits on its own
    Autocommit,
    /// Nothing is durable until [`Transaction::commit`]; dropping the
    /// transaction first rolls everything back
    Deferred,
}

type Action<'db> = Box<dyn FnOnce() + 'db>;

/// Exclusive access to the database connection for one unit of work.
///
/// A transaction owns the connection lock for its whole lifetime, so
/// transactions are serialized. Opening a second one on the same thread
/// while the first is alive deadlocks.
pub struct Transaction<'db> {
    conn: MutexGuard<'db, Connection>,
    records: &'db RecordStore,
    mode: TransactionMode,
    open: bool,
    on_rollback: RefCell<Vec<Action<'db>>>,
    on_commit: RefCell<Vec<Action<'db>>>,
}

impl<'db> Transaction<'db> {
    pub(crate) fn begin(
        conn: MutexGuard<'db, Connection>,
        records: &'db RecordStore,
        mode: TransactionMode,
    ) -> Result<Self, LibraryError> {
        let open = mode == TransactionMode::Deferred;
        if open {
            conn.execute_batch("BEGIN DEFERRED")
                .map_err(LibraryError::Transaction)?;
            tracing::trace!("Transaction opened");
        }

        Ok(Self {
            conn,
            records,
            mode,
            open,
            on_rollback: RefCell::new(Vec::new()),
            on_commit: RefCell::new(Vec::new()),
        })
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Record cache of the database this transaction belongs to
    pub fn records(&self) -> &'db RecordStore {
        self.records
    }

    /// Run a parameterized statement, returning the number of changed rows
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize, LibraryError> {
        Ok(self.conn.execute(sql, params)?)
    }

    /// Run a query expected to return exactly one row
    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<T, LibraryError>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        Ok(self.conn.query_row(sql, params, f)?)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `undo` if this transaction rolls back. Autocommit transactions
    /// never roll back, so nothing is kept for them.
    pub(crate) fn on_rollback(&self, undo: impl FnOnce() + 'db) {
        if self.open {
            self.on_rollback.borrow_mut().push(Box::new(undo));
        }
    }

    /// Run `action` once the transaction's writes are durable
    pub(crate) fn on_commit(&self, action: impl FnOnce() + 'db) {
        if self.open {
            self.on_commit.borrow_mut().push(Box::new(action));
        } else {
            action();
        }
    }

    /// Detach a record created in this transaction and forget its cache
    /// slot if the creation is rolled back
    pub(crate) fn release_on_rollback(&self, record: &Record) {
        let records = self.records;
        let record = record.clone();
        self.on_rollback(move || records.release(&record));
    }

    /// Make every statement durable.
    ///
    /// On failure the transaction is rolled back and none of its statements
    /// take effect.
    pub fn commit(mut self) -> Result<(), LibraryError> {
        if !self.open {
            return Ok(());
        }

        match self.conn.execute_batch("COMMIT") {
            Ok(()) => {
                self.open = false;
                self.on_rollback.get_mut().clear();
                for action in std::mem::take(self.on_commit.get_mut()) {
                    action();
                }
                tracing::trace!("Transaction committed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Commit rejected, rolling back: {}", e);
                self.rollback_inner();
                Err(LibraryError::Transaction(e))
            }
        }
    }

    /// Discard every statement made through this transaction
    pub fn rollback(mut self) {
        self.rollback_inner();
    }

    fn rollback_inner(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        // A failed COMMIT may already have ended the transaction
        if !self.conn.is_autocommit()
            && let Err(e) = self.conn.execute_batch("ROLLBACK")
        {
            tracing::error!("Rollback failed: {}", e);
        }

        self.on_commit.get_mut().clear();
        let undo = std::mem::take(self.on_rollback.get_mut());
        for action in undo.into_iter().rev() {
            action();
        }
        tracing::debug!("Transaction rolled back");
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.open {
            tracing::debug!("Dropping uncommitted transaction");
            self.rollback_inner();
        }
    }
}

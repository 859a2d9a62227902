//! Catalog database using SQLite

use crate::LibraryError;
use crate::record::{Record, RecordId, find_record_id};
use crate::store::RecordStore;
use crate::transaction::{Transaction, TransactionMode};
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Catalog storage plus the identity cache of its records
pub struct Database {
    conn: Mutex<Connection>,
    records: RecordStore,
}

impl Database {
    /// Open or create a database
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LibraryError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        tracing::debug!("Opened catalog at {}", path.display());
        Self::with_connection(conn)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self, LibraryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, LibraryError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            records: RecordStore::new(),
        })
    }

    /// Begin a unit of work. Blocks while another transaction is open.
    pub fn transaction(&self, mode: TransactionMode) -> Result<Transaction<'_>, LibraryError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Transaction::begin(conn, &self.records, mode)
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Handle for a stored record
    pub fn record(&self, id: RecordId) -> Result<Record, LibraryError> {
        let txn = self.transaction(TransactionMode::Autocommit)?;
        self.records.get(id, &txn)
    }

    /// Record with this identity triple, if stored
    pub fn find_record(
        &self,
        title: &str,
        creator: &str,
        engine: &str,
        txn: &Transaction<'_>,
    ) -> Result<Option<Record>, LibraryError> {
        find_record_id(title, creator, engine, txn)?
            .map(|id| self.records.get(id, txn))
            .transpose()
    }

    pub fn record_exists(&self, id: RecordId) -> Result<bool, LibraryError> {
        if self.records.lookup(id).is_some() {
            return Ok(true);
        }
        let txn = self.transaction(TransactionMode::Autocommit)?;
        let exists: bool = txn.query_row(
            "SELECT EXISTS(SELECT 1 FROM records WHERE record_id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Get total record count
    pub fn record_count(&self) -> Result<u64, LibraryError> {
        let txn = self.transaction(TransactionMode::Autocommit)?;
        let count: i64 = txn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Ids of every record, ordered by title
    pub fn record_ids(&self) -> Result<Vec<RecordId>, LibraryError> {
        let txn = self.transaction(TransactionMode::Autocommit)?;
        let mut stmt = txn
            .conn()
            .prepare("SELECT record_id FROM records ORDER BY title, creator, record_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Search records by title or creator
    pub fn search(&self, query: &str) -> Result<Vec<Record>, LibraryError> {
        let txn = self.transaction(TransactionMode::Autocommit)?;
        let ids = {
            let mut stmt = txn.conn().prepare(
                "SELECT record_id FROM records
                 WHERE title LIKE ?1 OR creator LIKE ?1
                 ORDER BY title, creator, record_id",
            )?;
            let pattern = format!("%{}%", query);
            stmt.query_map(params![pattern], |row| row.get::<_, RecordId>(0))?
                .collect::<Result<Vec<_>, _>>()?
        };

        ids.into_iter()
            .map(|id| self.records.get(id, &txn))
            .collect()
    }

    /// Delete a record and everything attached to it
    pub fn delete_record(&self, id: RecordId) -> Result<(), LibraryError> {
        let txn = self.transaction(TransactionMode::Deferred)?;
        let record = self.records.get(id, &txn)?;
        self.records.delete(&record, &txn)?;
        txn.commit()?;

        tracing::info!("Deleted record {} ('{}')", id, record.title());
        Ok(())
    }
}

/// Initialize database schema
fn init_schema(conn: &Connection) -> Result<(), LibraryError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            record_id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            creator TEXT NOT NULL,
            engine TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (title, creator, engine)
        );

        CREATE TABLE IF NOT EXISTS versions (
            record_id INTEGER NOT NULL,
            version TEXT NOT NULL,
            game_path TEXT NOT NULL,
            exec_path TEXT NOT NULL,
            folder_size INTEGER NOT NULL DEFAULT 0,
            in_place INTEGER NOT NULL DEFAULT 0,
            added_at TEXT DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (record_id, version),
            FOREIGN KEY (record_id) REFERENCES records(record_id)
                ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED
        );

        CREATE TABLE IF NOT EXISTS banners (
            record_id INTEGER NOT NULL,
            kind INTEGER NOT NULL,
            path TEXT NOT NULL,
            UNIQUE (record_id, kind),
            FOREIGN KEY (record_id) REFERENCES records(record_id)
                ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED
        );

        CREATE TABLE IF NOT EXISTS previews (
            record_id INTEGER NOT NULL,
            path TEXT NOT NULL,
            position INTEGER NOT NULL,
            UNIQUE (record_id, path),
            FOREIGN KEY (record_id) REFERENCES records(record_id)
                ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED
        );

        CREATE TABLE IF NOT EXISTS user_tags (
            record_id INTEGER NOT NULL,
            tag TEXT NOT NULL,
            PRIMARY KEY (record_id, tag),
            FOREIGN KEY (record_id) REFERENCES records(record_id)
                ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED
        );

        CREATE INDEX IF NOT EXISTS idx_records_title ON records(title);
        CREATE INDEX IF NOT EXISTS idx_versions_record ON versions(record_id);
        CREATE INDEX IF NOT EXISTS idx_previews_record ON previews(record_id, position);
        CREATE INDEX IF NOT EXISTS idx_user_tags_tag ON user_tags(tag);
    "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Version;
    use std::path::PathBuf;

    fn version(name: &str) -> Version {
        Version {
            name: name.to_string(),
            path: PathBuf::from(format!("Creator/Game/{name}")),
            executable: PathBuf::from("game.exe"),
            size: 1024,
            in_place: false,
        }
    }

    #[test]
    fn test_database_creation() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.record_count().unwrap(), 0);
        assert!(db.record_ids().unwrap().is_empty());
    }

    #[test]
    fn test_import_and_reload() {
        let db = Database::in_memory().unwrap();

        let id = {
            let txn = db.transaction(TransactionMode::Deferred).unwrap();
            let record = db.records().import("Game", "Creator", "RenPy", &txn).unwrap();
            record.add_version(version("1.0"), &txn).unwrap();
            record.add_user_tag("favorite", &txn).unwrap();
            txn.commit().unwrap();
            record.id()
        };

        // Last handle dropped, next access reads from storage
        assert_eq!(db.records().cached_count(), 0);
        let record = db.record(id).unwrap();
        assert_eq!(record.title(), "Game");
        assert_eq!(record.versions(), vec![version("1.0")]);
        assert!(record.user_tags().contains("favorite"));
        assert_eq!(db.record_count().unwrap(), 1);
    }

    #[test]
    fn test_search() {
        let db = Database::in_memory().unwrap();
        {
            let txn = db.transaction(TransactionMode::Autocommit).unwrap();
            db.records().import("Summer Days", "Studio A", "RenPy", &txn).unwrap();
            db.records().import("Winter Nights", "Studio B", "Unity", &txn).unwrap();
        }

        let results = db.search("summer").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title(), "Summer Days");

        let results = db.search("Studio").unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].title(), "Winter Nights");
    }

    #[test]
    fn test_delete_cascades() {
        let db = Database::in_memory().unwrap();
        let record = {
            let txn = db.transaction(TransactionMode::Autocommit).unwrap();
            let record = db.records().import("Game", "Creator", "RenPy", &txn).unwrap();
            record.add_version(version("1.0"), &txn).unwrap();
            record
        };

        db.delete_record(record.id()).unwrap();

        assert_eq!(db.record_count().unwrap(), 0);
        assert!(db.records().lookup(record.id()).is_none());
        assert!(matches!(
            db.record(record.id()),
            Err(LibraryError::RecordNotFound(_))
        ));

        let txn = db.transaction(TransactionMode::Autocommit).unwrap();
        let orphans: i64 = txn
            .query_row("SELECT COUNT(*) FROM versions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn test_find_by_identity() {
        let db = Database::in_memory().unwrap();
        let created = {
            let txn = db.transaction(TransactionMode::Autocommit).unwrap();
            db.records().import("Game", "Creator", "RenPy", &txn).unwrap()
        };

        let txn = db.transaction(TransactionMode::Autocommit).unwrap();
        let found = db.find_record("Game", "Creator", "RenPy", &txn).unwrap().unwrap();
        assert!(Record::ptr_eq(&created, &found));
        assert!(db.find_record("Game", "Creator", "Unity", &txn).unwrap().is_none());
        drop(txn);

        assert!(db.record_exists(created.id()).unwrap());
        assert!(!db.record_exists(RecordId::new(999)).unwrap());
    }
}

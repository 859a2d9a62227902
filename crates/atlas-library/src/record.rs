//! Catalog records and their shared handles

use crate::LibraryError;
use crate::transaction::Transaction;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Primary key of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToSql for RecordId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = i64::try_from(self.0)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(ToSqlOutput::from(value))
    }
}

impl FromSql for RecordId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = i64::column_result(value)?;
        u64::try_from(raw)
            .map(Self)
            .map_err(|_| FromSqlError::OutOfRange(raw))
    }
}

/// Artwork slots a record can fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BannerType {
    Normal,
    Wide,
    Cover,
    Logo,
}

impl BannerType {
    pub const ALL: [BannerType; 4] = [Self::Normal, Self::Wide, Self::Cover, Self::Logo];

    /// File stem that marks this slot inside a game folder
    pub fn file_stem(self) -> &'static str {
        match self {
            Self::Normal => "banner",
            Self::Wide => "banner_w",
            Self::Cover => "cover",
            Self::Logo => "logo",
        }
    }

    pub fn from_file_stem(stem: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.file_stem() == stem)
    }

    fn as_i64(self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::Wide => 1,
            Self::Cover => 2,
            Self::Logo => 3,
        }
    }

    fn from_i64(value: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_i64() == value)
    }
}

/// One installed version of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub name: String,
    /// Relative to the games directory when moved into the library,
    /// absolute when left in place
    pub path: PathBuf,
    /// Relative to `path`
    pub executable: PathBuf,
    pub size: u64,
    /// Files are owned by the user, not the library
    pub in_place: bool,
}

/// State of one catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordData {
    id: RecordId,
    pub title: String,
    pub creator: String,
    pub engine: String,
    pub description: String,
    pub versions: Vec<Version>,
    pub banners: HashMap<BannerType, PathBuf>,
    pub previews: Vec<PathBuf>,
    pub user_tags: BTreeSet<String>,
    /// Set once the stored row is gone
    #[serde(skip)]
    detached: bool,
}

impl RecordData {
    /// Blank record for an id that already exists in storage
    pub fn new(
        id: RecordId,
        title: impl Into<String>,
        creator: impl Into<String>,
        engine: impl Into<String>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            creator: creator.into(),
            engine: engine.into(),
            description: String::new(),
            versions: Vec::new(),
            banners: HashMap::new(),
            previews: Vec::new(),
            user_tags: BTreeSet::new(),
            detached: false,
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Tags derived from the identity triple
    pub fn processed_tags(&self) -> BTreeSet<String> {
        [
            format!("title:{}", self.title),
            format!("creator:{}", self.creator),
            format!("engine:{}", self.engine),
        ]
        .into_iter()
        .collect()
    }

    /// Read every row belonging to `id`
    pub(crate) fn load(id: RecordId, txn: &Transaction<'_>) -> Result<Self, LibraryError> {
        let conn = txn.conn();

        let mut data = conn
            .query_row(
                "SELECT title, creator, engine, description FROM records WHERE record_id = ?1",
                params![id],
                |row| {
                    let mut data = Self::new(
                        id,
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    );
                    data.description = row.get(3)?;
                    Ok(data)
                },
            )
            .optional()?
            .ok_or(LibraryError::RecordNotFound(id))?;

        let mut stmt = conn.prepare(
            "SELECT version, game_path, exec_path, folder_size, in_place
             FROM versions WHERE record_id = ?1 ORDER BY rowid",
        )?;
        data.versions = stmt
            .query_map(params![id], |row| {
                Ok(Version {
                    name: row.get(0)?,
                    path: PathBuf::from(row.get::<_, String>(1)?),
                    executable: PathBuf::from(row.get::<_, String>(2)?),
                    size: u64::try_from(row.get::<_, i64>(3)?).unwrap_or(0),
                    in_place: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare("SELECT kind, path FROM banners WHERE record_id = ?1")?;
        let banners = stmt
            .query_map(params![id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (kind, path) in banners {
            match BannerType::from_i64(kind) {
                Some(kind) => {
                    data.banners.insert(kind, PathBuf::from(path));
                }
                None => tracing::warn!("Record {} has a banner of unknown kind {}", id, kind),
            }
        }

        let mut stmt = conn
            .prepare("SELECT path FROM previews WHERE record_id = ?1 ORDER BY position")?;
        data.previews = stmt
            .query_map(params![id], |row| row.get::<_, String>(0).map(PathBuf::from))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare("SELECT tag FROM user_tags WHERE record_id = ?1")?;
        data.user_tags = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(data)
    }

    /// Insert a new records row and return its (empty) state
    pub(crate) fn insert(
        title: &str,
        creator: &str,
        engine: &str,
        txn: &Transaction<'_>,
    ) -> Result<Self, LibraryError> {
        let conn = txn.conn();
        conn.execute(
            "INSERT INTO records (title, creator, engine) VALUES (?1, ?2, ?3)",
            params![title, creator, engine],
        )?;
        let id = RecordId::new(u64::try_from(conn.last_insert_rowid()).unwrap_or(0));
        Ok(Self::new(id, title, creator, engine))
    }
}

/// Id of the record with this identity triple, if any
pub(crate) fn find_record_id(
    title: &str,
    creator: &str,
    engine: &str,
    txn: &Transaction<'_>,
) -> Result<Option<RecordId>, LibraryError> {
    let id = txn
        .conn()
        .query_row(
            "SELECT record_id FROM records WHERE title = ?1 AND creator = ?2 AND engine = ?3",
            params![title, creator, engine],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub(crate) type SharedData = Arc<RwLock<RecordData>>;

/// Handle to the single cached instance of a record.
///
/// Clones share state: a change made through one handle is visible through
/// every other handle for the same id. Every mutation writes through the
/// given transaction first and only then updates the cached state; if a
/// deferred transaction rolls back, the cached change is undone as well.
///
/// The internal lock only keeps individual reads and writes sound. Callers
/// performing multi-step edits of one record from several threads must
/// coordinate among themselves.
#[derive(Clone)]
pub struct Record {
    id: RecordId,
    data: SharedData,
}

impl Record {
    pub(crate) fn from_shared(id: RecordId, data: SharedData) -> Self {
        Self { id, data }
    }

    pub(crate) fn is_instance(&self, data: &SharedData) -> bool {
        Arc::ptr_eq(&self.data, data)
    }

    /// Cut this instance loose from storage. Later mutations fail with
    /// [`LibraryError::RecordNotFound`]; reads keep the last state.
    pub(crate) fn detach(&self) {
        self.write().detached = true;
    }

    /// The stored row was deleted (or its creation rolled back)
    pub fn is_detached(&self) -> bool {
        self.read().detached
    }

    /// Both handles view the same instance
    pub fn ptr_eq(a: &Record, b: &Record) -> bool {
        Arc::ptr_eq(&a.data, &b.data)
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn title(&self) -> String {
        self.read().title.clone()
    }

    pub fn creator(&self) -> String {
        self.read().creator.clone()
    }

    pub fn engine(&self) -> String {
        self.read().engine.clone()
    }

    pub fn description(&self) -> String {
        self.read().description.clone()
    }

    pub fn versions(&self) -> Vec<Version> {
        self.read().versions.clone()
    }

    pub fn version(&self, name: &str) -> Option<Version> {
        self.read().versions.iter().find(|v| v.name == name).cloned()
    }

    /// Combined size of all versions
    pub fn total_size(&self) -> u64 {
        self.read().versions.iter().map(|v| v.size).sum()
    }

    pub fn banner(&self, kind: BannerType) -> Option<PathBuf> {
        self.read().banners.get(&kind).cloned()
    }

    pub fn banners(&self) -> HashMap<BannerType, PathBuf> {
        self.read().banners.clone()
    }

    pub fn previews(&self) -> Vec<PathBuf> {
        self.read().previews.clone()
    }

    pub fn user_tags(&self) -> BTreeSet<String> {
        self.read().user_tags.clone()
    }

    pub fn processed_tags(&self) -> BTreeSet<String> {
        self.read().processed_tags()
    }

    /// User and processed tags together
    pub fn all_tags(&self) -> BTreeSet<String> {
        let data = self.read();
        let mut tags = data.processed_tags();
        tags.extend(data.user_tags.iter().cloned());
        tags
    }

    /// Detached copy of the current state
    pub fn snapshot(&self) -> RecordData {
        self.read().clone()
    }

    pub fn set_title(&self, title: &str, txn: &Transaction<'_>) -> Result<(), LibraryError> {
        let (creator, engine) = {
            let data = self.read();
            (data.creator.clone(), data.engine.clone())
        };
        self.rename(title, &creator, &engine, txn)
    }

    pub fn set_creator(&self, creator: &str, txn: &Transaction<'_>) -> Result<(), LibraryError> {
        let (title, engine) = {
            let data = self.read();
            (data.title.clone(), data.engine.clone())
        };
        self.rename(&title, creator, &engine, txn)
    }

    pub fn set_engine(&self, engine: &str, txn: &Transaction<'_>) -> Result<(), LibraryError> {
        let (title, creator) = {
            let data = self.read();
            (data.title.clone(), data.creator.clone())
        };
        self.rename(&title, &creator, engine, txn)
    }

    fn rename(
        &self,
        title: &str,
        creator: &str,
        engine: &str,
        txn: &Transaction<'_>,
    ) -> Result<(), LibraryError> {
        self.ensure_attached()?;
        if let Some(other) = find_record_id(title, creator, engine, txn)?
            && other != self.id
        {
            return Err(LibraryError::IdentityConflict {
                existing: txn.records().get(other, txn)?,
            });
        }

        txn.conn().execute(
            "UPDATE records SET title = ?1, creator = ?2, engine = ?3 WHERE record_id = ?4",
            params![title, creator, engine, self.id],
        )?;

        let previous = {
            let mut data = self.write();
            (
                std::mem::replace(&mut data.title, title.to_string()),
                std::mem::replace(&mut data.creator, creator.to_string()),
                std::mem::replace(&mut data.engine, engine.to_string()),
            )
        };
        self.undo_on_rollback(txn, move |data| {
            (data.title, data.creator, data.engine) = previous;
        });
        Ok(())
    }

    pub fn set_description(
        &self,
        description: &str,
        txn: &Transaction<'_>,
    ) -> Result<(), LibraryError> {
        self.ensure_attached()?;
        txn.conn().execute(
            "UPDATE records SET description = ?1 WHERE record_id = ?2",
            params![description, self.id],
        )?;

        let previous = std::mem::replace(&mut self.write().description, description.to_string());
        self.undo_on_rollback(txn, move |data| data.description = previous);
        Ok(())
    }

    /// Attach a new version; names are unique within a record
    pub fn add_version(&self, version: Version, txn: &Transaction<'_>) -> Result<(), LibraryError> {
        self.ensure_attached()?;
        if self.read().versions.iter().any(|v| v.name == version.name) {
            return Err(LibraryError::DuplicateVersion {
                record: self.id,
                version: version.name,
            });
        }

        txn.conn().execute(
            "INSERT INTO versions (record_id, version, game_path, exec_path, folder_size, in_place)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.id,
                version.name,
                path_text(&version.path),
                path_text(&version.executable),
                i64::try_from(version.size).unwrap_or(i64::MAX),
                version.in_place,
            ],
        )?;

        let name = version.name.clone();
        self.write().versions.push(version);
        self.undo_on_rollback(txn, move |data| data.versions.retain(|v| v.name != name));
        Ok(())
    }

    /// Remove a version, returning how many remain
    pub fn remove_version(&self, name: &str, txn: &Transaction<'_>) -> Result<usize, LibraryError> {
        self.ensure_attached()?;
        let Some(index) = self.read().versions.iter().position(|v| v.name == name) else {
            return Err(LibraryError::VersionNotFound {
                record: self.id,
                version: name.to_string(),
            });
        };

        txn.conn().execute(
            "DELETE FROM versions WHERE record_id = ?1 AND version = ?2",
            params![self.id, name],
        )?;

        let (removed, remaining) = {
            let mut data = self.write();
            let removed = data.versions.remove(index);
            (removed, data.versions.len())
        };
        self.undo_on_rollback(txn, move |data| {
            let at = index.min(data.versions.len());
            data.versions.insert(at, removed);
        });
        Ok(remaining)
    }

    pub fn set_banner(
        &self,
        kind: BannerType,
        path: &Path,
        txn: &Transaction<'_>,
    ) -> Result<(), LibraryError> {
        self.ensure_attached()?;
        txn.conn().execute(
            "INSERT INTO banners (record_id, kind, path) VALUES (?1, ?2, ?3)
             ON CONFLICT(record_id, kind) DO UPDATE SET path = excluded.path",
            params![self.id, kind.as_i64(), path_text(path)],
        )?;

        let previous = self.write().banners.insert(kind, path.to_path_buf());
        self.undo_on_rollback(txn, move |data| match previous {
            Some(path) => {
                data.banners.insert(kind, path);
            }
            None => {
                data.banners.remove(&kind);
            }
        });
        Ok(())
    }

    /// Append a preview; returns false if it was already present
    pub fn add_preview(&self, path: &Path, txn: &Transaction<'_>) -> Result<bool, LibraryError> {
        self.ensure_attached()?;
        let position = {
            let data = self.read();
            if data.previews.iter().any(|p| p == path) {
                return Ok(false);
            }
            data.previews.len()
        };

        txn.conn().execute(
            "INSERT INTO previews (record_id, path, position) VALUES (?1, ?2, ?3)",
            params![self.id, path_text(path), position as i64],
        )?;

        self.write().previews.push(path.to_path_buf());
        let added = path.to_path_buf();
        self.undo_on_rollback(txn, move |data| data.previews.retain(|p| *p != added));
        Ok(true)
    }

    /// Remove a preview; returns false if it was not present
    pub fn remove_preview(&self, path: &Path, txn: &Transaction<'_>) -> Result<bool, LibraryError> {
        self.ensure_attached()?;
        let Some(index) = self.read().previews.iter().position(|p| p == path) else {
            return Ok(false);
        };

        let conn = txn.conn();
        conn.execute(
            "DELETE FROM previews WHERE record_id = ?1 AND path = ?2",
            params![self.id, path_text(path)],
        )?;
        conn.execute(
            "UPDATE previews SET position = position - 1 WHERE record_id = ?1 AND position > ?2",
            params![self.id, index as i64],
        )?;

        let removed = self.write().previews.remove(index);
        self.undo_on_rollback(txn, move |data| {
            let at = index.min(data.previews.len());
            data.previews.insert(at, removed);
        });
        Ok(true)
    }

    /// Replace the preview order; `order` must be a permutation of the
    /// current previews
    pub fn reorder_previews(
        &self,
        order: &[PathBuf],
        txn: &Transaction<'_>,
    ) -> Result<(), LibraryError> {
        self.ensure_attached()?;
        {
            let data = self.read();
            let current: BTreeSet<&PathBuf> = data.previews.iter().collect();
            let proposed: BTreeSet<&PathBuf> = order.iter().collect();
            if order.len() != data.previews.len() || current != proposed {
                return Err(LibraryError::InvalidPreviewOrder);
            }
        }

        let mut stmt = txn.conn().prepare(
            "UPDATE previews SET position = ?1 WHERE record_id = ?2 AND path = ?3",
        )?;
        for (position, path) in order.iter().enumerate() {
            stmt.execute(params![position as i64, self.id, path_text(path)])?;
        }

        let previous = std::mem::replace(&mut self.write().previews, order.to_vec());
        self.undo_on_rollback(txn, move |data| data.previews = previous);
        Ok(())
    }

    /// Returns false if the tag was already set
    pub fn add_user_tag(&self, tag: &str, txn: &Transaction<'_>) -> Result<bool, LibraryError> {
        self.ensure_attached()?;
        if self.read().user_tags.contains(tag) {
            return Ok(false);
        }

        txn.conn().execute(
            "INSERT INTO user_tags (record_id, tag) VALUES (?1, ?2)",
            params![self.id, tag],
        )?;

        self.write().user_tags.insert(tag.to_string());
        let added = tag.to_string();
        self.undo_on_rollback(txn, move |data| {
            data.user_tags.remove(&added);
        });
        Ok(true)
    }

    /// Returns false if the tag was not set
    pub fn remove_user_tag(&self, tag: &str, txn: &Transaction<'_>) -> Result<bool, LibraryError> {
        self.ensure_attached()?;
        if !self.read().user_tags.contains(tag) {
            return Ok(false);
        }

        txn.conn().execute(
            "DELETE FROM user_tags WHERE record_id = ?1 AND tag = ?2",
            params![self.id, tag],
        )?;

        self.write().user_tags.remove(tag);
        let removed = tag.to_string();
        self.undo_on_rollback(txn, move |data| {
            data.user_tags.insert(removed);
        });
        Ok(true)
    }

    fn ensure_attached(&self) -> Result<(), LibraryError> {
        if self.read().detached {
            return Err(LibraryError::RecordNotFound(self.id));
        }
        Ok(())
    }

    fn undo_on_rollback<'db>(
        &self,
        txn: &Transaction<'db>,
        undo: impl FnOnce(&mut RecordData) + 'db,
    ) {
        let data = Arc::clone(&self.data);
        txn.on_rollback(move || undo(&mut write_lock(&data)));
    }

    fn read(&self) -> RwLockReadGuard<'_, RecordData> {
        read_lock(&self.data)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RecordData> {
        write_lock(&self.data)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.read();
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("title", &data.title)
            .field("creator", &data.creator)
            .field("engine", &data.engine)
            .field("versions", &data.versions.len())
            .finish()
    }
}

fn read_lock(data: &SharedData) -> RwLockReadGuard<'_, RecordData> {
    data.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock(data: &SharedData) -> RwLockWriteGuard<'_, RecordData> {
    data.write().unwrap_or_else(PoisonError::into_inner)
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_stems() {
        assert_eq!(BannerType::from_file_stem("banner"), Some(BannerType::Normal));
        assert_eq!(BannerType::from_file_stem("banner_w"), Some(BannerType::Wide));
        assert_eq!(BannerType::from_file_stem("cover"), Some(BannerType::Cover));
        assert_eq!(BannerType::from_file_stem("logo"), Some(BannerType::Logo));
        assert_eq!(BannerType::from_file_stem("Banner"), None);

        for kind in BannerType::ALL {
            assert_eq!(BannerType::from_i64(kind.as_i64()), Some(kind));
        }
    }

    #[test]
    fn test_processed_tags() {
        let data = RecordData::new(RecordId::new(1), "Title", "Creator", "RenPy");
        let tags = data.processed_tags();
        assert!(tags.contains("title:Title"));
        assert!(tags.contains("creator:Creator"));
        assert!(tags.contains("engine:RenPy"));
    }

    #[test]
    fn test_handles_share_state() {
        let data = RecordData::new(RecordId::new(3), "A", "B", "C");
        let record = Record::from_shared(data.id(), Arc::new(RwLock::new(data)));
        let other = record.clone();

        record.write().description = "shared".to_string();

        assert!(Record::ptr_eq(&record, &other));
        assert_eq!(other.description(), "shared");
        assert_eq!(other.id(), RecordId::new(3));
    }
}

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::database::schema::{
    AUDIO_SCHEMA, AUDIO_SCHEMA_NAME, AUDIO_SCHEMA_VERSION, DROP_AUDIO_SCHEMA, DROP_PITCH_SCHEMA,
    PITCH_SCHEMA, PITCH_SCHEMA_NAME, PITCH_SCHEMA_VERSION, VERSION_SCHEMA,
};
use crate::error::{Error, Result};

/// File-backed cache of audio source indexes and pitch accents.
///
/// A connection must never cross threads. Every worker opens its own
/// `CacheStore` (see [`CacheStore::with_session`]) and closes it before
/// returning.
///
/// Tables for audio: `meta`, `headwords`, `files`.
/// Table for pitch accents: `pitch_accents_formatted`.
pub struct CacheStore {
    path: PathBuf,
    conn: Option<Connection>,
}

impl CacheStore {
    /// Creates a handle without opening the database.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: None,
        }
    }

    /// Creates a handle and starts a session right away.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self::new(path);
        store.start_session()?;
        Ok(store)
    }

    /// Opens a session, runs `op`, then commits and closes the connection.
    /// The connection is closed on every exit path, including errors.
    pub fn with_session<T, F>(path: &Path, op: F) -> Result<T>
    where
        F: FnOnce(&mut CacheStore) -> Result<T>,
    {
        let mut store = Self::open(path)?;
        let result = op(&mut store);
        let closed = store.end_session();
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn can_execute(&self) -> bool {
        self.conn.is_some()
    }

    pub fn start_session(&mut self) -> Result<()> {
        if self.can_execute() {
            return Err(Error::Cache("connection is already created".to_string()));
        }
        let conn = Connection::open(&self.path)?;
        debug!("Opened cache session at {:?}", self.path);
        self.conn = Some(conn);
        self.prepare_tables()
    }

    pub fn end_session(&mut self) -> Result<()> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| Error::Cache("there is no connection to close".to_string()))?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        conn.close().map_err(|(_, e)| Error::Database(e))?;
        debug!("Closed cache session at {:?}", self.path);
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or_else(no_session)
    }

    pub(crate) fn conn_mut(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or_else(no_session)
    }

    fn prepare_tables(&mut self) -> Result<()> {
        self.conn()?.execute_batch(VERSION_SCHEMA)?;
        self.prepare_group(
            AUDIO_SCHEMA_NAME,
            AUDIO_SCHEMA_VERSION,
            AUDIO_SCHEMA,
            DROP_AUDIO_SCHEMA,
        )?;
        self.prepare_group(
            PITCH_SCHEMA_NAME,
            PITCH_SCHEMA_VERSION,
            PITCH_SCHEMA,
            DROP_PITCH_SCHEMA,
        )?;
        Ok(())
    }

    /// Creates a table group, rebuilding it first if it was written by an
    /// older layout.
    fn prepare_group(
        &mut self,
        schema_name: &str,
        current: i64,
        create: &str,
        drop: &str,
    ) -> Result<()> {
        let stored = match self.get_db_version(schema_name) {
            Ok(number) => Some(number),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let tx = self.conn_mut()?.transaction()?;
        match stored {
            Some(number) if number == current => {}
            Some(number) => {
                warn!(
                    "Cache tables '{}' are at version {}, expected {}. Rebuilding.",
                    schema_name, number, current
                );
                tx.execute_batch(drop)?;
            }
            None => {
                // Tables from a release that predates versioning are rebuilt too.
                tx.execute_batch(drop)?;
            }
        }
        tx.execute_batch(create)?;
        tx.commit()?;

        if stored != Some(current) {
            self.set_db_version(schema_name, current)?;
        }
        Ok(())
    }

    /// Returns the stored version of a table group.
    /// Fails with `NotFound` if it was never set.
    pub fn get_db_version(&self, schema_name: &str) -> Result<i64> {
        let number: Option<i64> = self
            .conn()?
            .query_row(
                "SELECT number FROM version WHERE schema_name = ?1 LIMIT 1",
                params![schema_name],
                |row| row.get(0),
            )
            .optional()?;
        number.ok_or_else(|| {
            Error::NotFound(format!("version of '{}' was never set", schema_name))
        })
    }

    pub fn set_db_version(&self, schema_name: &str, number: i64) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO version (schema_name, number) VALUES (?1, ?2)
             ON CONFLICT(schema_name) DO UPDATE SET number = excluded.number",
            params![schema_name, number],
        )?;
        Ok(())
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        if self.conn.is_some() {
            if let Err(e) = self.end_session() {
                warn!("Failed to close cache session at {:?}: {}", self.path, e);
            }
        }
    }
}

fn no_session() -> Error {
    Error::Cache("attempted to use the cache before opening a session".to_string())
}

/// `a = ? OR a = ? OR ...` with `count` placeholders.
pub(crate) fn build_or_clause(field_name: &str, count: usize) -> String {
    vec![format!("{} = ?", field_name); count].join(" OR ")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::Result;

    pub(crate) fn tmp_store() -> Result<(tempfile::TempDir, CacheStore)> {
        let dir = tempfile::tempdir()?;
        let store = CacheStore::open(dir.path().join("test.sqlite3"))?;
        Ok((dir, store))
    }

    #[test]
    fn test_version_set_and_get() -> Result<()> {
        let (_dir, store) = tmp_store()?;

        assert!(matches!(
            store.get_db_version("test_schema_1"),
            Err(Error::NotFound(_))
        ));
        store.set_db_version("test_schema_1", 1)?;
        assert_eq!(store.get_db_version("test_schema_1")?, 1);
        store.set_db_version("test_schema_2", 1)?;
        assert_eq!(store.get_db_version("test_schema_2")?, 1);
        store.set_db_version("test_schema_1", 42)?;
        assert_eq!(store.get_db_version("test_schema_1")?, 42);
        Ok(())
    }

    #[test]
    fn test_session_misuse_is_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = CacheStore::new(dir.path().join("test.sqlite3"));

        assert!(matches!(store.get_db_version("audio"), Err(Error::Cache(_))));
        assert!(matches!(store.end_session(), Err(Error::Cache(_))));

        store.start_session()?;
        assert!(matches!(store.start_session(), Err(Error::Cache(_))));
        store.end_session()?;
        assert!(!store.can_execute());
        Ok(())
    }

    #[test]
    fn test_stale_layout_is_rebuilt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.sqlite3");

        CacheStore::with_session(&path, |store| {
            store.conn()?.execute(
                "INSERT INTO meta (source_name, dictionary_name, year, version, media_dir)
                 VALUES ('old', 'Old', 2000, 1, 'media')",
                [],
            )?;
            store.set_db_version(AUDIO_SCHEMA_NAME, AUDIO_SCHEMA_VERSION - 1)
        })?;

        let count = CacheStore::with_session(&path, |store| {
            assert_eq!(store.get_db_version(AUDIO_SCHEMA_NAME)?, AUDIO_SCHEMA_VERSION);
            let count: i64 = store
                .conn()?
                .query_row("SELECT COUNT(*) FROM meta", [], |row| row.get(0))?;
            Ok(count)
        })?;
        assert_eq!(count, 0);
        Ok(())
    }

    #[test]
    fn test_build_or_clause() {
        assert_eq!(build_or_clause("source_name", 2), "source_name = ? OR source_name = ?");
        assert_eq!(build_or_clause("f.source_name", 1), "f.source_name = ?");
    }
}

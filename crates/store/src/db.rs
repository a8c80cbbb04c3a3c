//! The embedded store connection: a single-writer/many-reader `rusqlite`
//! database opened with WAL, a busy timeout, and foreign keys enforced.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bg_domain::error::{Error, Result};
use parking_lot::Mutex;
use rusqlite::Connection;

use crate::migrations;

/// Shared handle to the on-disk database. Cloning shares the same
/// connection and mutex — there is exactly one writer at a time, matching
/// the single-writer/many-reader model the schema is built for.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Db {
    /// Opens (creating if absent) the database at `path`, applies pragmas,
    /// and runs any pending migrations. Safe to call repeatedly — schema
    /// setup is idempotent.
    pub fn open(path: impl AsRef<Path>, busy_timeout_ms: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path).map_err(store_err)?;
        configure(&conn, busy_timeout_ms)?;
        migrations::run(&conn).map_err(store_err)?;

        Ok(Self { conn: Arc::new(Mutex::new(conn)), path })
    }

    /// In-memory database for tests: same pragmas and migrations, no file.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        configure(&conn, 5000)?;
        migrations::run(&conn).map_err(store_err)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)), path: PathBuf::from(":memory:") })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn conn(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Runs a connectivity check used by `bench-gateway doctor` and the
    /// admin health endpoint.
    pub fn ping(&self) -> Result<()> {
        self.conn()
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(store_err)
    }
}

fn configure(conn: &Connection, busy_timeout_ms: u32) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL").map_err(store_err)?;
    conn.pragma_update(None, "busy_timeout", busy_timeout_ms).map_err(store_err)?;
    conn.pragma_update(None, "foreign_keys", "ON").map_err(store_err)?;
    Ok(())
}

pub(crate) fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_enables_foreign_keys() {
        let db = Db::open_in_memory().unwrap();
        let fk: i64 = db.conn().query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn open_on_disk_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bench.db");
        let db1 = Db::open(&path, 5000).unwrap();
        drop(db1);
        let db2 = Db::open(&path, 5000).unwrap();
        db2.ping().unwrap();
    }

    #[test]
    fn ping_succeeds_on_fresh_store() {
        let db = Db::open_in_memory().unwrap();
        assert!(db.ping().is_ok());
    }
}

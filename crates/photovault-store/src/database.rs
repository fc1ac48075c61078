//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.  The connection sits behind a
//! `std::sync::Mutex`: statements are short and never held across an `.await`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Which schema a database file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// The deployment-wide credential index.
    Credentials,
    /// A single realm's photo index.
    Photos,
}

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create) a database at an explicit path, creating parent
    /// directories as needed.
    pub fn open_at(path: &Path, schema: Schema) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::debug!(path = %path.display(), ?schema, "opening database");

        let conn = Connection::open(path)?;

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        migrations::run_migrations(&conn, schema)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a throwaway in-memory database (tests, tooling).
    pub fn open_in_memory(schema: Schema) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn, schema)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("photos.db");

        let db = Database::open_at(&path, Schema::Photos).expect("should open");
        assert_eq!(db.path(), Some(path.as_path()));
        assert!(path.exists());
    }

    #[test]
    fn reopen_keeps_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.db");

        drop(Database::open_at(&path, Schema::Credentials).unwrap());
        let db = Database::open_at(&path, Schema::Credentials).unwrap();
        let version: u32 = db
            .with_conn(|c| Ok(c.pragma_query_value(None, "user_version", |row| row.get(0))?))
            .unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION);
    }
}

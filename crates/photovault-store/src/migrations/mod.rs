//! Database migration runner.
//!
//! Migrations are executed in order on every [`Database::open_at`] call.  Each
//! migration is guarded by a `user_version` pragma so it runs exactly once.
//! The credential index and the photo index carry independent schemas but
//! share the version counter semantics.
//!
//! [`Database::open_at`]: crate::Database::open_at

pub mod v001_credentials;
pub mod v001_photos;

use rusqlite::Connection;

use crate::database::Schema;
use crate::error::{Result, StoreError};

/// Current schema version.  Bump this and add a new migration module whenever
/// either schema changes.
pub const CURRENT_VERSION: u32 = 1;

/// Run all pending migrations against the open connection.
pub fn run_migrations(conn: &Connection, schema: Schema) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    tracing::debug!(
        ?schema,
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking database migrations"
    );

    if current < 1 {
        let up: fn(&Connection) -> rusqlite::Result<()> = match schema {
            Schema::Credentials => v001_credentials::up,
            Schema::Photos => v001_photos::up,
        };
        tracing::info!(?schema, "applying migration v001");
        up(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(())
}

//! v001 -- Per-realm photo index.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS photos (
    id              TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    display_name    TEXT NOT NULL,
    stored_filename TEXT NOT NULL UNIQUE,         -- server generated
    mime_type       TEXT NOT NULL,
    size_bytes      INTEGER NOT NULL,
    created_at      TEXT NOT NULL                 -- RFC-3339, millisecond precision, UTC
);

CREATE INDEX IF NOT EXISTS idx_photos_created_at ON photos(created_at DESC);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

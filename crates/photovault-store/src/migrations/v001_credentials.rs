//! v001 -- Credential index.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,              -- normalized [a-z0-9._-]
    username      TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_salt TEXT NOT NULL,                          -- hex
    password_hash TEXT NOT NULL,                          -- hex
    created_at    TEXT NOT NULL                           -- RFC-3339
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}

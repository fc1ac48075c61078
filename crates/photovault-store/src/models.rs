//! Domain model structs persisted in the credential and photo indexes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use photovault_shared::{PhotoId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account.  Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Normalized, unique, immutable id.  Also names the user's realm.
    pub id: UserId,
    /// Unique (case-insensitively) login name, as typed at registration.
    pub username: String,
    /// Hex-encoded random salt.
    pub password_salt: String,
    /// Hex-encoded key-derivation output.
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Photo
// ---------------------------------------------------------------------------

/// One stored asset inside a realm.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Photo {
    /// Globally unique, used in public URLs.
    pub id: PhotoId,
    /// Name shown to the user (client supplied, extension may be rewritten).
    pub display_name: String,
    /// Server generated name inside the realm's file area.
    pub stored_filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

/// Replacement asset fields written after a format conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRewrite {
    pub stored_filename: String,
    pub display_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

/// Canonical timestamp encoding.  Fixed width so that text ordering in SQLite
/// matches chronological ordering.
pub fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_timestamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

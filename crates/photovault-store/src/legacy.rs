//! Import of the legacy flat user list (`users.json`).
//!
//! Older deployments kept every account in a single JSON array.  The file is
//! read best-effort: a missing or corrupt file imports nothing, malformed
//! entries are skipped, and existing users are never overwritten.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use photovault_shared::UserId;

use crate::credentials::CredentialIndex;
use crate::error::Result;
use crate::models::User;

/// One entry of the legacy list.  Every field is optional so that a single
/// malformed entry does not poison the whole file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyUserRecord {
    pub id: Option<String>,
    pub username: Option<String>,
    #[serde(alias = "passwordSalt")]
    pub salt: Option<String>,
    #[serde(alias = "passwordHash")]
    pub hash: Option<String>,
    pub created_at: Option<String>,
}

impl LegacyUserRecord {
    /// A well-formed record has a non-empty id, username, salt and hash.
    pub fn to_user(&self) -> Option<User> {
        let id = non_empty(&self.id)?;
        let username = non_empty(&self.username)?;
        let salt = non_empty(&self.salt)?;
        let hash = non_empty(&self.hash)?;

        let created_at = self
            .created_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Some(User {
            id: UserId::normalize(id),
            username: username.to_string(),
            password_salt: salt.to_string(),
            password_hash: hash.to_string(),
            created_at,
        })
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyFile {
    List(Vec<serde_json::Value>),
    Wrapped { users: Vec<serde_json::Value> },
}

/// Parse the legacy list.  Accepts a bare array or `{"users": [...]}`;
/// entries that are not objects are dropped here.
pub fn parse_legacy_users(raw: &[u8]) -> Result<Vec<LegacyUserRecord>> {
    let entries = match serde_json::from_slice::<LegacyFile>(raw)? {
        LegacyFile::List(entries) | LegacyFile::Wrapped { users: entries } => entries,
    };

    Ok(entries
        .into_iter()
        .filter_map(|value| serde_json::from_value::<LegacyUserRecord>(value).ok())
        .collect())
}

/// Read and parse the legacy list at `path`.
///
/// Returns `None` when the file does not exist or cannot be parsed; the
/// latter is logged and treated as "nothing to import".
pub fn read_legacy_users(path: &Path) -> Option<Vec<LegacyUserRecord>> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read legacy user list");
            return None;
        }
    };

    match parse_legacy_users(&raw) {
        Ok(records) => Some(records),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt legacy user list");
            None
        }
    }
}

/// Outcome of a legacy import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub imported: usize,
    pub skipped: usize,
}

impl CredentialIndex {
    /// Insert every well-formed legacy record that does not collide with an
    /// existing id or username.
    pub fn import_legacy(&self, records: &[LegacyUserRecord]) -> Result<ImportStats> {
        let mut stats = ImportStats::default();

        for record in records {
            let Some(user) = record.to_user() else {
                stats.skipped += 1;
                continue;
            };

            if self.insert_user_if_absent(&user)? {
                stats.imported += 1;
            } else {
                stats.skipped += 1;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"[
        {"id": "alice", "username": "Alice", "salt": "aa", "hash": "bb", "createdAt": "2023-01-02T03:04:05.000Z"},
        {"id": "bob", "username": "bob", "passwordSalt": "cc", "passwordHash": "dd"},
        {"id": "alice", "username": "alice-again", "salt": "ee", "hash": "ff"},
        {"username": "no-id", "salt": "11", "hash": "22"},
        {"id": "carol", "username": "carol", "salt": "", "hash": "33"},
        42
    ]"#;

    #[test]
    fn parse_drops_non_objects() {
        let records = parse_legacy_users(LEGACY.as_bytes()).unwrap();
        assert_eq!(records.len(), 5);
    }

    #[test]
    fn parse_accepts_wrapped_form() {
        let raw = r#"{"users": [{"id": "x", "username": "xavier", "salt": "1", "hash": "2"}]}"#;
        let records = parse_legacy_users(raw.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].to_user().is_some());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_legacy_users(b"{not json").is_err());
    }

    #[test]
    fn import_skips_duplicates_and_malformed() {
        let idx = CredentialIndex::open_in_memory().unwrap();
        let records = parse_legacy_users(LEGACY.as_bytes()).unwrap();

        let stats = idx.import_legacy(&records).unwrap();
        assert_eq!(stats, ImportStats { imported: 2, skipped: 3 });

        let alice = idx.find_by_login("alice").unwrap().unwrap();
        assert_eq!(alice.password_salt, "aa");
        assert_eq!(alice.created_at.to_rfc3339(), "2023-01-02T03:04:05+00:00");
        assert!(idx.find_by_login("bob").unwrap().is_some());
    }

    #[test]
    fn missing_and_corrupt_files_import_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_legacy_users(&dir.path().join("users.json")).is_none());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, b"[{\"id\": ").unwrap();
        assert!(read_legacy_users(&corrupt).is_none());
    }
}

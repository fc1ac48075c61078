use std::path::Path;

use rusqlite::{params, OptionalExtension};

use photovault_shared::UserId;

use crate::database::{Database, Schema};
use crate::error::{Result, StoreError};
use crate::models::{decode_timestamp, encode_timestamp, User};

const USER_COLUMNS: &str = "id, username, password_salt, password_hash, created_at";

/// Persistent registry of user identities and salted password hashes.
#[derive(Debug)]
pub struct CredentialIndex {
    db: Database,
}

impl CredentialIndex {
    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self {
            db: Database::open_at(path, Schema::Credentials)?,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::open_in_memory(Schema::Credentials)?,
        })
    }

    pub fn count_users(&self) -> Result<u64> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.count_users()? == 0)
    }

    /// Insert a new user.  A duplicate id or username yields
    /// [`StoreError::Conflict`].
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password_salt, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id.as_str(),
                    user.username,
                    user.password_salt,
                    user.password_hash,
                    encode_timestamp(&user.created_at),
                ],
            )
            .map_err(StoreError::from_write)?;
            Ok(())
        })
    }

    /// Insert unless the id or username already exists.  Returns whether a row
    /// was written.
    pub fn insert_user_if_absent(&self, user: &User) -> Result<bool> {
        self.db.with_conn(|conn| {
            let affected = conn.execute(
                "INSERT OR IGNORE INTO users (id, username, password_salt, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id.as_str(),
                    user.username,
                    user.password_salt,
                    user.password_hash,
                    encode_timestamp(&user.created_at),
                ],
            )?;
            Ok(affected > 0)
        })
    }

    /// Find a user whose username or id equals `login_id`, ignoring case.
    pub fn find_by_login(&self, login_id: &str) -> Result<Option<User>> {
        let login_id = login_id.trim();
        self.db.with_conn(|conn| {
            let user = conn
                .query_row(
                    &format!(
                        "SELECT {USER_COLUMNS} FROM users
                         WHERE username = ?1 COLLATE NOCASE OR id = ?1 COLLATE NOCASE
                         ORDER BY (username = ?1 COLLATE NOCASE) DESC
                         LIMIT 1"
                    ),
                    params![login_id],
                    row_to_user,
                )
                .optional()?;
            Ok(user)
        })
    }

    pub fn find_by_id(&self, id: &UserId) -> Result<Option<User>> {
        self.db.with_conn(|conn| {
            let user = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    params![id.as_str()],
                    row_to_user,
                )
                .optional()?;
            Ok(user)
        })
    }

    pub fn username_taken(&self, username: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE username = ?1 COLLATE NOCASE",
                params![username.trim()],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    pub fn id_exists(&self, id: &UserId) -> Result<bool> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
            ))?;
            let rows = stmt.query_map([], row_to_user)?;

            let mut users = Vec::new();
            for row in rows {
                users.push(row?);
            }
            Ok(users)
        })
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let username: String = row.get(1)?;
    let password_salt: String = row.get(2)?;
    let password_hash: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    Ok(User {
        id: UserId::from_stored(id),
        username,
        password_salt,
        password_hash,
        created_at: decode_timestamp(&created_str, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: &str, username: &str) -> User {
        User {
            id: UserId::from_stored(id),
            username: username.to_string(),
            password_salt: "00".repeat(16),
            password_hash: "11".repeat(32),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_find_case_insensitive() {
        let idx = CredentialIndex::open_in_memory().unwrap();
        assert!(idx.is_empty().unwrap());

        idx.insert_user(&user("alice", "Alice")).unwrap();

        let by_name = idx.find_by_login("ALICE").unwrap().unwrap();
        assert_eq!(by_name.id.as_str(), "alice");
        let by_id = idx.find_by_login("alice").unwrap().unwrap();
        assert_eq!(by_id.username, "Alice");
        assert!(idx.find_by_login("bob").unwrap().is_none());
        assert_eq!(idx.count_users().unwrap(), 1);
    }

    #[test]
    fn duplicate_username_is_conflict() {
        let idx = CredentialIndex::open_in_memory().unwrap();
        idx.insert_user(&user("carol", "Carol")).unwrap();

        let err = idx.insert_user(&user("carol-2", "CAROL")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(idx.username_taken("carol").unwrap());
    }

    #[test]
    fn insert_if_absent_skips_duplicates() {
        let idx = CredentialIndex::open_in_memory().unwrap();
        assert!(idx.insert_user_if_absent(&user("dave", "dave")).unwrap());
        assert!(!idx.insert_user_if_absent(&user("dave", "other")).unwrap());
        assert!(idx.id_exists(&UserId::from_stored("dave")).unwrap());
        assert_eq!(idx.list_users().unwrap().len(), 1);
    }

    #[test]
    fn find_by_id_round_trips_timestamp() {
        let idx = CredentialIndex::open_in_memory().unwrap();
        let u = user("erin", "Erin");
        idx.insert_user(&u).unwrap();

        let found = idx.find_by_id(&u.id).unwrap().unwrap();
        assert_eq!(found.created_at.timestamp_millis(), u.created_at.timestamp_millis());
    }
}

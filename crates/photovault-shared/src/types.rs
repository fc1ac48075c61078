use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fallback id used when a username normalizes to nothing.
const FALLBACK_USER_ID: &str = "user";

// Normalized user identifier: lowercase, restricted to [a-z0-9._-]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Derive the base id for a username.
    ///
    /// Lowercases, replaces every character outside `[a-z0-9._-]` with `-`,
    /// collapses runs of `-` and trims separators from both ends.
    /// `"Admin"` and `"admin!!"` both normalize to `admin`.
    pub fn normalize(username: &str) -> Self {
        let mut out = String::with_capacity(username.len());
        for c in username.trim().chars().flat_map(char::to_lowercase) {
            let c = if is_id_char(c) { c } else { '-' };
            if c == '-' && out.ends_with('-') {
                continue;
            }
            out.push(c);
        }

        let trimmed = out.trim_matches(|c| c == '-' || c == '.' || c == '_');
        if trimmed.is_empty() {
            Self(FALLBACK_USER_ID.to_string())
        } else {
            Self(trimmed.to_string())
        }
    }

    /// Collision candidate: `admin` -> `admin-2`, `admin-3`, ...
    pub fn with_suffix(&self, n: u32) -> Self {
        Self(format!("{}-{n}", self.0))
    }

    /// Wrap an id read back from storage without renormalizing it.
    pub fn from_stored(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory-safe form of the id.
    ///
    /// Ids are normalized at registration, but a realm directory is a second
    /// trust boundary so the id is filtered again. Dot-only names are
    /// rejected so the result can never address a parent directory.
    pub fn fs_component(&self) -> Option<String> {
        let safe: String = self
            .0
            .chars()
            .filter(|c| is_id_char(*c))
            .collect();
        if safe.is_empty() || safe.chars().all(|c| c == '.') {
            None
        } else {
            Some(safe)
        }
    }

    /// Display-only label of the user's storage area.
    pub fn storage_label(&self) -> String {
        format!("{}/{}", crate::constants::USERS_DIR, self.0)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_id_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '.' | '_' | '-')
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PhotoId(pub Uuid);

impl PhotoId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for PhotoId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PhotoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases() {
        assert_eq!(UserId::normalize("Admin").as_str(), "admin");
        assert_eq!(UserId::normalize("  Jane.Doe_1 ").as_str(), "jane.doe_1");
    }

    #[test]
    fn test_normalize_collapses_invalid_chars() {
        assert_eq!(UserId::normalize("admin!!").as_str(), "admin");
        assert_eq!(UserId::normalize("john  smith").as_str(), "john-smith");
        assert_eq!(UserId::normalize("a//b\\\\c").as_str(), "a-b-c");
    }

    #[test]
    fn test_normalize_empty_falls_back() {
        assert_eq!(UserId::normalize("!!!").as_str(), "user");
        assert_eq!(UserId::normalize("..").as_str(), "user");
    }

    #[test]
    fn test_suffix() {
        let base = UserId::normalize("admin");
        assert_eq!(base.with_suffix(2).as_str(), "admin-2");
    }

    #[test]
    fn test_fs_component_filters_again() {
        let hostile = UserId::from_stored("../etc/passwd");
        assert_eq!(hostile.fs_component().as_deref(), Some("..etcpasswd"));
        assert!(UserId::from_stored("..").fs_component().is_none());
        assert!(UserId::from_stored("/").fs_component().is_none());
    }

    #[test]
    fn test_storage_label() {
        assert_eq!(UserId::normalize("bob").storage_label(), "users/bob");
    }
}

//! Account registration and login on top of the credential index.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use photovault_shared::constants::{MIN_PASSWORD_LEN, MIN_USERNAME_LEN};
use photovault_shared::UserId;
use photovault_store::{CredentialIndex, StoreError, User};

use crate::error::ServerError;
use crate::password::{hash_password, verify_password, PasswordDigest};

/// How often a registration retries when a concurrent registration grabs the
/// id it picked.
const MAX_ID_ATTEMPTS: usize = 8;

pub struct CredentialService {
    index: Arc<CredentialIndex>,
    default_username: String,
    default_password: String,
}

impl CredentialService {
    pub fn new(
        index: Arc<CredentialIndex>,
        default_username: impl Into<String>,
        default_password: impl Into<String>,
    ) -> Self {
        Self {
            index,
            default_username: default_username.into(),
            default_password: default_password.into(),
        }
    }

    pub fn index(&self) -> &CredentialIndex {
        &self.index
    }

    /// Create an account.
    ///
    /// The id is the normalized username; when it collides with an existing
    /// id, `-2`, `-3`, ... is appended until a free one is found.
    pub async fn register(&self, username: &str, password: &str) -> Result<User, ServerError> {
        let username = username.trim();
        if username.chars().count() < MIN_USERNAME_LEN {
            return Err(ServerError::Validation(format!(
                "Username must be at least {MIN_USERNAME_LEN} characters"
            )));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ServerError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if self.index.username_taken(username)? {
            return Err(ServerError::UsernameTaken);
        }

        let digest = hash_blocking(password.to_string()).await?;
        let base = UserId::normalize(username);

        for _ in 0..MAX_ID_ATTEMPTS {
            let user = User {
                id: self.free_id(&base)?,
                username: username.to_string(),
                password_salt: digest.salt_hex.clone(),
                password_hash: digest.hash_hex.clone(),
                created_at: Utc::now(),
            };

            match self.index.insert_user(&user) {
                Ok(()) => {
                    info!(user = %user.id, "registered user");
                    return Ok(user);
                }
                Err(StoreError::Conflict(_)) => {
                    if self.index.username_taken(username)? {
                        return Err(ServerError::UsernameTaken);
                    }
                    debug!(candidate = %user.id, "user id taken concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServerError::Internal(format!(
            "Could not allocate a user id for {base}"
        )))
    }

    /// Resolve `login_id` (username or id, any case) and check the password.
    pub async fn authenticate(&self, login_id: &str, password: &str) -> Result<User, ServerError> {
        self.ensure_default_user().await?;

        let user = self
            .index
            .find_by_login(login_id)?
            .ok_or(ServerError::UserNotFound)?;

        let (salt, hash) = (user.password_salt.clone(), user.password_hash.clone());
        let password = password.to_string();
        let ok = tokio::task::spawn_blocking(move || verify_password(&password, &salt, &hash))
            .await
            .map_err(|e| ServerError::Internal(format!("Password check panicked: {e}")))?;

        if ok {
            debug!(user = %user.id, "authenticated");
            Ok(user)
        } else {
            Err(ServerError::InvalidPassword)
        }
    }

    /// Look up the user a verified token names.
    pub async fn find_user(&self, id: &UserId) -> Result<Option<User>, ServerError> {
        self.ensure_default_user().await?;
        Ok(self.index.find_by_id(id)?)
    }

    /// Provision the configured default user if the store is empty.
    ///
    /// Idempotent and cheap when users exist; runs before every login and
    /// identity check so that an emptied store heals itself.  Returns the user
    /// when one was created.
    pub async fn ensure_default_user(&self) -> Result<Option<User>, ServerError> {
        if !self.index.is_empty()? {
            return Ok(None);
        }

        match self
            .register(&self.default_username, &self.default_password)
            .await
        {
            Ok(user) => {
                info!(user = %user.id, "provisioned default user");
                Ok(Some(user))
            }
            // Someone else provisioned it in the meantime.
            Err(ServerError::UsernameTaken) => Ok(None),
            Err(e) => {
                warn!(error = %e, "cannot provision default user");
                Err(e)
            }
        }
    }

    fn free_id(&self, base: &UserId) -> Result<UserId, ServerError> {
        if !self.index.id_exists(base)? {
            return Ok(base.clone());
        }
        let mut n = 2;
        loop {
            let candidate = base.with_suffix(n);
            if !self.index.id_exists(&candidate)? {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

async fn hash_blocking(password: String) -> Result<PasswordDigest, ServerError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ServerError::Internal(format!("Password hashing panicked: {e}")))?
}

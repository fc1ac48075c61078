//! Per-user realms and the registry that provisions them.
//!
//! A realm is a user's private file area plus their photo index, laid out as
//! `<data>/users/<id>/files/` and `<data>/users/<id>/photos.db`.  Realms are
//! created on first access and cached for the life of the process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::info;

use photovault_media::thumbnail_name;
use photovault_shared::constants::{REALM_FILES_DIR, REALM_INDEX_FILE, USERS_DIR};
use photovault_shared::UserId;
use photovault_store::PhotoIndex;

use crate::error::ServerError;

/// One user's isolated storage.
#[derive(Debug)]
pub struct Realm {
    user_id: UserId,
    root: PathBuf,
    files_dir: PathBuf,
    index: PhotoIndex,
}

impl Realm {
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    pub fn index(&self) -> &PhotoIndex {
        &self.index
    }

    /// Path of a stored asset.  Names come from the index, which is ours, but
    /// anything that could step outside the file area is still refused.
    pub fn asset_path(&self, stored_filename: &str) -> Result<PathBuf, ServerError> {
        safe_join(&self.files_dir, stored_filename)
    }

    /// Path of the thumbnail derived from `stored_filename`.
    pub fn thumbnail_path(&self, stored_filename: &str) -> Result<PathBuf, ServerError> {
        safe_join(&self.files_dir, &thumbnail_name(stored_filename))
    }
}

fn safe_join(base: &Path, filename: &str) -> Result<PathBuf, ServerError> {
    if filename.is_empty()
        || filename.starts_with('.')
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains('\0')
    {
        return Err(ServerError::Validation(format!(
            "Refusing unsafe file name {filename:?}"
        )));
    }
    Ok(base.join(filename))
}

/// Lazily provisions and caches one [`Realm`] per user id.
///
/// Each id maps to its own `OnceCell`, so concurrent first requests for the
/// same user wait on a single provisioning while other users proceed.
pub struct StoreRegistry {
    users_dir: PathBuf,
    realms: Mutex<HashMap<String, Arc<OnceCell<Arc<Realm>>>>>,
    provisioned: AtomicUsize,
}

impl StoreRegistry {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            users_dir: data_dir.join(USERS_DIR),
            realms: Mutex::new(HashMap::new()),
            provisioned: AtomicUsize::new(0),
        }
    }

    pub async fn get_or_create(&self, user_id: &UserId) -> Result<Arc<Realm>, ServerError> {
        let dir_name = user_id
            .fs_component()
            .ok_or_else(|| ServerError::Validation(format!("Invalid user id {user_id:?}")))?;

        let cell = {
            let mut realms = self
                .realms
                .lock()
                .map_err(|_| ServerError::Internal("realm cache lock poisoned".to_string()))?;
            realms.entry(dir_name.clone()).or_default().clone()
        };

        let realm = cell
            .get_or_try_init(|| self.provision(user_id.clone(), dir_name))
            .await?;
        Ok(realm.clone())
    }

    /// Number of realms provisioned since start-up.
    pub fn provisioned_count(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }

    async fn provision(&self, user_id: UserId, dir_name: String) -> Result<Arc<Realm>, ServerError> {
        let root = self.users_dir.join(dir_name);
        let files_dir = root.join(REALM_FILES_DIR);
        tokio::fs::create_dir_all(&files_dir).await?;

        let index_path = root.join(REALM_INDEX_FILE);
        let index = tokio::task::spawn_blocking(move || PhotoIndex::open_at(&index_path))
            .await
            .map_err(|e| ServerError::Internal(format!("Realm provisioning panicked: {e}")))??;

        self.provisioned.fetch_add(1, Ordering::SeqCst);
        info!(user = %user_id, path = %root.display(), "realm ready");

        Ok(Arc::new(Realm {
            user_id,
            root,
            files_dir,
            index,
        }))
    }
}

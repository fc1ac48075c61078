//! Startup reconciliation.
//!
//! Imports the legacy user list into an empty credential store, provisions
//! the default user, then walks every realm: stored HEIC/HEIF assets are
//! converted and missing thumbnails are backfilled.  Users are processed
//! independently; a failure on one photo or one user is logged and counted,
//! never propagated.  Running it again on a consistent tree writes nothing.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use photovault_store::legacy::read_legacy_users;
use photovault_store::User;

use crate::credentials::CredentialService;
use crate::error::ServerError;
use crate::pipeline::MediaPipeline;
use crate::registry::{Realm, StoreRegistry};

/// What a reconciliation run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub imported: usize,
    pub skipped: usize,
    pub default_user_created: bool,
    pub converted: usize,
    pub thumbnails_generated: usize,
    pub failures: usize,
}

impl ReconcileReport {
    fn absorb(&mut self, realm: RealmReport) {
        self.converted += realm.converted;
        self.thumbnails_generated += realm.thumbnails_generated;
        self.failures += realm.failures;
    }
}

#[derive(Debug, Default)]
struct RealmReport {
    converted: usize,
    thumbnails_generated: usize,
    failures: usize,
}

pub struct Reconciler {
    credentials: Arc<CredentialService>,
    registry: Arc<StoreRegistry>,
    pipeline: Arc<MediaPipeline>,
    legacy_users_file: PathBuf,
}

impl Reconciler {
    pub fn new(
        credentials: Arc<CredentialService>,
        registry: Arc<StoreRegistry>,
        pipeline: Arc<MediaPipeline>,
        legacy_users_file: PathBuf,
    ) -> Self {
        Self {
            credentials,
            registry,
            pipeline,
            legacy_users_file,
        }
    }

    pub async fn run(&self) -> Result<ReconcileReport, ServerError> {
        let mut report = ReconcileReport::default();

        self.import_legacy(&mut report).await?;
        report.default_user_created = self.credentials.ensure_default_user().await?.is_some();

        let users = self.credentials.index().list_users()?;
        let outcomes =
            futures::future::join_all(users.iter().map(|user| self.reconcile_user(user))).await;

        for (user, outcome) in users.iter().zip(outcomes) {
            match outcome {
                Ok(realm) => report.absorb(realm),
                Err(e) => {
                    warn!(user = %user.id, error = %e, "realm reconciliation failed");
                    report.failures += 1;
                }
            }
        }

        info!(
            users = users.len(),
            realms = self.registry.provisioned_count(),
            imported = report.imported,
            skipped = report.skipped,
            default_user_created = report.default_user_created,
            converted = report.converted,
            thumbnails = report.thumbnails_generated,
            failures = report.failures,
            "reconciliation finished"
        );
        Ok(report)
    }

    async fn import_legacy(&self, report: &mut ReconcileReport) -> Result<(), ServerError> {
        if !self.credentials.index().is_empty()? {
            return Ok(());
        }

        let path = self.legacy_users_file.clone();
        let records = tokio::task::spawn_blocking(move || read_legacy_users(&path))
            .await
            .map_err(|e| ServerError::Internal(format!("Legacy read panicked: {e}")))?;
        let Some(records) = records else {
            debug!(path = %self.legacy_users_file.display(), "no legacy user list");
            return Ok(());
        };

        let stats = self.credentials.index().import_legacy(&records)?;
        report.imported = stats.imported;
        report.skipped = stats.skipped;
        info!(
            imported = stats.imported,
            skipped = stats.skipped,
            "imported legacy user list"
        );
        Ok(())
    }

    async fn reconcile_user(&self, user: &User) -> Result<RealmReport, ServerError> {
        let realm = self.registry.get_or_create(&user.id).await?;
        let mut report = RealmReport::default();

        self.sweep_heif(&realm, &mut report).await?;
        self.backfill_thumbnails(&realm, &mut report).await?;

        if report.converted > 0 || report.thumbnails_generated > 0 || report.failures > 0 {
            debug!(
                user = %user.id,
                path = %realm.root().display(),
                converted = report.converted,
                thumbnails = report.thumbnails_generated,
                failures = report.failures,
                "realm reconciled"
            );
        }
        Ok(report)
    }

    async fn sweep_heif(&self, realm: &Realm, report: &mut RealmReport) -> Result<(), ServerError> {
        for photo in realm.index().list_heif_photos()? {
            match self.pipeline.convert_stored_heif(realm, &photo).await {
                Ok(true) => report.converted += 1,
                Ok(false) => debug!(photo = %photo.id, "photo changed during conversion"),
                Err(e) => {
                    warn!(user = %realm.user_id(), photo = %photo.id, error = %e, "HEIF sweep failed");
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }

    async fn backfill_thumbnails(
        &self,
        realm: &Realm,
        report: &mut RealmReport,
    ) -> Result<(), ServerError> {
        for photo in realm.index().list_photos()? {
            match self.pipeline.ensure_thumbnail(realm, &photo).await {
                Ok(true) => report.thumbnails_generated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        user = %realm.user_id(),
                        photo = %photo.id,
                        error = %e,
                        "thumbnail backfill failed"
                    );
                    report.failures += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{files_in, png_bytes, upload};
    use chrono::Utc;
    use photovault_shared::{PhotoId, UserId};
    use photovault_store::{CredentialIndex, Photo};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        credentials: Arc<CredentialService>,
        registry: Arc<StoreRegistry>,
        pipeline: Arc<MediaPipeline>,
        reconciler: Reconciler,
    }

    fn fixture(legacy: Option<&str>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let legacy_path = dir.path().join("users.json");
        if let Some(raw) = legacy {
            std::fs::write(&legacy_path, raw).unwrap();
        }

        let index = Arc::new(CredentialIndex::open_at(&dir.path().join("credentials.db")).unwrap());
        let credentials = Arc::new(CredentialService::new(index, "admin", "changeme"));
        let registry = Arc::new(StoreRegistry::new(dir.path()));
        let pipeline = Arc::new(MediaPipeline::new());
        let reconciler = Reconciler::new(
            credentials.clone(),
            registry.clone(),
            pipeline.clone(),
            legacy_path,
        );

        Fixture {
            _dir: dir,
            credentials,
            registry,
            pipeline,
            reconciler,
        }
    }

    #[tokio::test]
    async fn test_empty_store_gets_default_user() {
        let fx = fixture(None);
        let report = fx.reconciler.run().await.unwrap();

        assert!(report.default_user_created);
        assert_eq!(report.imported, 0);
        assert!(fx
            .credentials
            .index()
            .find_by_login("admin")
            .unwrap()
            .is_some());
        // The default user's realm was provisioned by the walk.
        assert_eq!(fx.registry.provisioned_count(), 1);
    }

    #[tokio::test]
    async fn test_legacy_import_skips_malformed_entries() {
        let fx = fixture(Some(
            r#"[
                {"id": "alice", "username": "Alice", "salt": "aa", "hash": "bb"},
                {"id": "bob", "username": "bob"},
                {"username": "nobody", "salt": "aa", "hash": "bb"}
            ]"#,
        ));
        let report = fx.reconciler.run().await.unwrap();

        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped, 2);
        assert!(!report.default_user_created);
        assert_eq!(fx.credentials.index().count_users().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_legacy_file_is_not_fatal() {
        let fx = fixture(Some("{ this is not json"));
        let report = fx.reconciler.run().await.unwrap();

        assert_eq!(report.imported, 0);
        assert!(report.default_user_created);
    }

    #[tokio::test]
    async fn test_legacy_ignored_when_users_exist() {
        let fx = fixture(Some(
            r#"[{"id": "alice", "username": "Alice", "salt": "aa", "hash": "bb"}]"#,
        ));
        fx.credentials.register("carol", "password").await.unwrap();

        let report = fx.reconciler.run().await.unwrap();
        assert_eq!(report.imported, 0);
        assert!(fx.credentials.index().find_by_login("alice").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stored_heif_converted_and_thumbnail_backfilled() {
        let fx = fixture(None);
        let user = fx.credentials.register("erin", "password").await.unwrap();
        let realm = fx.registry.get_or_create(&user.id).await.unwrap();

        // A row left behind by an ingest whose conversion never ran.
        let raw = png_bytes(120, 90);
        std::fs::write(realm.files_dir().join("1700000000000-abcd0123.heic"), &raw).unwrap();
        let photo = Photo {
            id: PhotoId::new(),
            display_name: "IMG_7.HEIC".to_string(),
            stored_filename: "1700000000000-abcd0123.heic".to_string(),
            mime_type: "image/heic".to_string(),
            size_bytes: raw.len() as i64,
            created_at: Utc::now(),
        };
        realm.index().insert_photo(&photo).unwrap();

        let report = fx.reconciler.run().await.unwrap();
        assert_eq!(report.converted, 1);
        assert_eq!(report.thumbnails_generated, 1);
        assert_eq!(report.failures, 0);

        let stored = realm.index().get_photo(photo.id).unwrap();
        assert_eq!(stored.stored_filename, "1700000000000-abcd0123.jpg");
        assert_eq!(stored.display_name, "IMG_7.jpg");
        assert_eq!(stored.mime_type, "image/jpeg");
        assert_eq!(
            files_in(realm.files_dir()),
            vec![
                "1700000000000-abcd0123.jpg".to_string(),
                "thumb-1700000000000-abcd0123.jpg".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_thumbnail_backfilled() {
        let fx = fixture(None);
        let user = fx.credentials.register("frank", "password").await.unwrap();
        let realm = fx.registry.get_or_create(&user.id).await.unwrap();
        let photo = fx
            .pipeline
            .ingest_one(&realm, upload("a.png", Some("image/png"), png_bytes(600, 600)))
            .await
            .unwrap();

        let thumb = realm.thumbnail_path(&photo.stored_filename).unwrap();
        std::fs::remove_file(&thumb).unwrap();

        let report = fx.reconciler.run().await.unwrap();
        assert_eq!(report.thumbnails_generated, 1);
        assert!(thumb.exists());
    }

    #[tokio::test]
    async fn test_one_bad_photo_does_not_block_others() {
        let fx = fixture(None);
        let user = fx.credentials.register("gina", "password").await.unwrap();
        let realm = fx.registry.get_or_create(&user.id).await.unwrap();

        let good = fx
            .pipeline
            .ingest_one(&realm, upload("good.png", None, png_bytes(50, 50)))
            .await
            .unwrap();
        let lost = fx
            .pipeline
            .ingest_one(&realm, upload("lost.png", None, png_bytes(50, 50)))
            .await
            .unwrap();
        std::fs::remove_file(realm.thumbnail_path(&good.stored_filename).unwrap()).unwrap();
        std::fs::remove_file(realm.thumbnail_path(&lost.stored_filename).unwrap()).unwrap();
        std::fs::remove_file(realm.asset_path(&lost.stored_filename).unwrap()).unwrap();

        let report = fx.reconciler.run().await.unwrap();
        assert_eq!(report.thumbnails_generated, 1);
        assert_eq!(report.failures, 1);
    }

    #[tokio::test]
    async fn test_second_run_changes_nothing() {
        let fx = fixture(Some(
            r#"[{"id": "Hank", "username": "hank", "salt": "aa", "hash": "bb"}]"#,
        ));
        let first = fx.reconciler.run().await.unwrap();
        assert_eq!(first.imported, 1);

        let realm = fx
            .registry
            .get_or_create(&UserId::normalize("hank"))
            .await
            .unwrap();
        fx.pipeline
            .ingest_one(&realm, upload("a.png", None, png_bytes(40, 40)))
            .await
            .unwrap();
        let before = files_in(realm.files_dir());

        let second = fx.reconciler.run().await.unwrap();
        assert_eq!(second, ReconcileReport::default());
        assert_eq!(files_in(realm.files_dir()), before);
    }
}

//! Upload ingest and asset lifecycle inside a realm.
//!
//! Per file: write raw bytes under a server-generated name -> transcode
//! HEIC/HEIF to JPEG -> derive a thumbnail -> insert the metadata row.  Files
//! of one batch run concurrently; outcomes come back in input order and one
//! failing file never affects its siblings.
//!
//! Thumbnail presence is never stored.  It is computed from the filesystem on
//! every read path, which lets a deleted thumbnail heal itself.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::Utc;
use rand::RngCore;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use photovault_media::{make_thumbnail, transcode_heif_to_jpeg};
use photovault_shared::constants::CONVERSION_QUALITY;
use photovault_shared::media_type::{
    extension_for_mime, extension_of, is_accepted_upload, is_heif, is_image_mime,
    mime_for_extension, with_extension, JPEG_MIME,
};
use photovault_shared::PhotoId;
use photovault_store::{AssetRewrite, Photo, StoreError};

use crate::error::ServerError;
use crate::registry::Realm;

/// Attempts at finding an unused stored filename.
const NAME_ATTEMPTS: usize = 4;

/// One file taken off the wire, already size-limited by the boundary.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// A file the thumbnail/asset routes can stream.
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub photo: Photo,
    pub path: PathBuf,
    pub mime_type: String,
}

/// Reject anything that is neither declared image-like nor carries a known
/// image extension.
pub fn check_upload_type(file_name: &str, content_type: Option<&str>) -> Result<(), ServerError> {
    if is_accepted_upload(content_type, file_name) {
        Ok(())
    } else {
        Err(ServerError::UnsupportedType(
            content_type.unwrap_or(file_name).to_string(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct MediaPipeline {
    conversion_quality: u8,
}

impl Default for MediaPipeline {
    fn default() -> Self {
        Self {
            conversion_quality: CONVERSION_QUALITY,
        }
    }
}

impl MediaPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a batch.  One outcome per input file, in input order.
    pub async fn ingest(
        &self,
        realm: &Realm,
        files: Vec<UploadedFile>,
    ) -> Vec<Result<Photo, ServerError>> {
        futures::future::join_all(files.into_iter().map(|file| self.ingest_one(realm, file))).await
    }

    pub async fn ingest_one(&self, realm: &Realm, file: UploadedFile) -> Result<Photo, ServerError> {
        let content_type = file.content_type.as_deref();
        check_upload_type(&file.file_name, content_type)?;
        if file.data.is_empty() {
            return Err(ServerError::Validation(format!(
                "{} is empty",
                file.file_name
            )));
        }

        let heif = is_heif(&file.file_name, content_type);
        let ext = extension_of(&file.file_name)
            .or_else(|| content_type.and_then(extension_for_mime).map(str::to_string))
            .unwrap_or_else(|| "img".to_string());
        let mut display_name = display_name(&file.file_name, &ext);
        let mut mime_type = match content_type {
            Some(ct) if is_image_mime(ct) => ct.trim().to_ascii_lowercase(),
            _ => mime_for_extension(&ext).to_string(),
        };

        // A HEIF payload is always parked under a HEIF extension so that its
        // converted `.jpg` sibling can never share its name.
        let stored_ext = if heif {
            heif_extension(&ext, content_type)
        } else {
            ext.clone()
        };
        let mut stored_filename = write_unique(realm, &stored_ext, &file.data).await?;
        let mut bytes = file.data;

        if heif {
            match self.convert_heif(realm, &stored_filename, &bytes).await {
                Ok((jpeg_name, jpeg)) => {
                    // No row points at the raw upload yet.
                    remove_quietly(&realm.asset_path(&stored_filename)?).await;
                    stored_filename = jpeg_name;
                    bytes = Bytes::from(jpeg);
                    mime_type = JPEG_MIME.to_string();
                    display_name = with_extension(&display_name, "jpg");
                }
                Err(e) => {
                    remove_quietly(&realm.asset_path(&stored_filename)?).await;
                    warn!(
                        user = %realm.user_id(),
                        file = %file.file_name,
                        error = %e,
                        "HEIF conversion failed"
                    );
                    return Err(ServerError::ConversionFailed {
                        name: file.file_name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = write_thumbnail(realm, &stored_filename, bytes.clone()).await {
            warn!(
                user = %realm.user_id(),
                file = %stored_filename,
                error = %e,
                "thumbnail generation failed, serving full asset instead"
            );
        }

        let photo = Photo {
            id: PhotoId::new(),
            display_name,
            stored_filename,
            mime_type,
            size_bytes: bytes.len() as i64,
            created_at: Utc::now(),
        };

        if let Err(e) = realm.index().insert_photo(&photo) {
            remove_quietly(&realm.asset_path(&photo.stored_filename)?).await;
            remove_quietly(&realm.thumbnail_path(&photo.stored_filename)?).await;
            return Err(e.into());
        }

        info!(
            user = %realm.user_id(),
            photo = %photo.id,
            size = photo.size_bytes,
            mime = %photo.mime_type,
            "photo ingested"
        );
        Ok(photo)
    }

    /// Newest first.
    pub fn list(&self, realm: &Realm) -> Result<Vec<Photo>, ServerError> {
        Ok(realm.index().list_photos()?)
    }

    /// Delete the asset and its thumbnail (missing files are fine), then the
    /// row.  The row goes last so a crash leaves at worst an orphaned row.
    pub async fn remove(&self, realm: &Realm, id: PhotoId) -> Result<(), ServerError> {
        let photo = get_photo(realm, id)?;

        remove_tolerant(&realm.asset_path(&photo.stored_filename)?).await?;
        remove_tolerant(&realm.thumbnail_path(&photo.stored_filename)?).await?;

        if !realm.index().delete_photo(id)? {
            return Err(ServerError::PhotoNotFound(id));
        }

        info!(user = %realm.user_id(), photo = %id, "photo deleted");
        Ok(())
    }

    /// Path of the original asset.  A row without a file is reported as
    /// [`ServerError::FileMissing`], not as not-found.
    pub async fn resolve_asset(&self, realm: &Realm, id: PhotoId) -> Result<ResolvedFile, ServerError> {
        let photo = get_photo(realm, id)?;
        let path = realm.asset_path(&photo.stored_filename)?;
        if !fs::try_exists(&path).await? {
            warn!(user = %realm.user_id(), photo = %id, "asset missing on disk");
            return Err(ServerError::FileMissing(id));
        }
        let mime_type = photo.mime_type.clone();
        Ok(ResolvedFile {
            photo,
            path,
            mime_type,
        })
    }

    /// Path of the thumbnail, regenerating it if absent and falling back to
    /// the full asset when it cannot be made.
    pub async fn resolve_thumbnail(
        &self,
        realm: &Realm,
        id: PhotoId,
    ) -> Result<ResolvedFile, ServerError> {
        let photo = get_photo(realm, id)?;
        let thumb = realm.thumbnail_path(&photo.stored_filename)?;

        let present = match fs::try_exists(&thumb).await? {
            true => true,
            false => match self.ensure_thumbnail(realm, &photo).await {
                Ok(_) => true,
                Err(e) => {
                    debug!(photo = %id, error = %e, "no thumbnail, falling back to asset");
                    false
                }
            },
        };

        if present {
            Ok(ResolvedFile {
                photo,
                path: thumb,
                mime_type: JPEG_MIME.to_string(),
            })
        } else {
            self.resolve_asset(realm, id).await
        }
    }

    /// Generate the thumbnail for `photo` unless it already exists.  Returns
    /// whether a file was written.
    pub async fn ensure_thumbnail(&self, realm: &Realm, photo: &Photo) -> Result<bool, ServerError> {
        if fs::try_exists(realm.thumbnail_path(&photo.stored_filename)?).await? {
            return Ok(false);
        }

        let asset = realm.asset_path(&photo.stored_filename)?;
        let bytes = match fs::read(&asset).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ServerError::FileMissing(photo.id))
            }
            Err(e) => return Err(e.into()),
        };

        write_thumbnail(realm, &photo.stored_filename, Bytes::from(bytes)).await?;
        Ok(true)
    }

    /// Convert a row whose stored asset is still HEIC/HEIF.
    ///
    /// The JPEG is written first, then the row is switched to it with a
    /// compare-and-set on its stored filename, and only then is the original
    /// removed.  An interruption at any point leaves the row pointing at a
    /// file that exists; a stray `.jpg` is overwritten by the next attempt.
    /// Returns whether the row was rewritten.
    pub async fn convert_stored_heif(&self, realm: &Realm, photo: &Photo) -> Result<bool, ServerError> {
        let asset = realm.asset_path(&photo.stored_filename)?;
        let raw = match fs::read(&asset).await {
            Ok(raw) => Bytes::from(raw),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ServerError::FileMissing(photo.id))
            }
            Err(e) => return Err(e.into()),
        };

        let (jpeg_name, jpeg) = self.convert_heif(realm, &photo.stored_filename, &raw).await?;
        let rewrite = AssetRewrite {
            stored_filename: jpeg_name.clone(),
            display_name: with_extension(&photo.display_name, "jpg"),
            mime_type: JPEG_MIME.to_string(),
            size_bytes: jpeg.len() as i64,
        };

        match realm
            .index()
            .rewrite_asset(photo.id, &photo.stored_filename, &rewrite)
        {
            Ok(true) => {
                // The thumbnail is keyed by stem and stays valid for the JPEG.
                remove_tolerant(&asset).await?;
                info!(user = %realm.user_id(), photo = %photo.id, "converted stored HEIF to JPEG");
                Ok(true)
            }
            Ok(false) => {
                remove_quietly(&realm.asset_path(&jpeg_name)?).await;
                Ok(false)
            }
            // Another row claimed the name between the check and the update;
            // the file at that name is now referenced by it and stays.
            Err(StoreError::Conflict(msg)) => Err(ServerError::Internal(format!(
                "Converted name already in use: {msg}"
            ))),
            Err(e) => {
                remove_quietly(&realm.asset_path(&jpeg_name)?).await;
                Err(e.into())
            }
        }
    }

    /// Transcode the HEIF at `stored_filename` into a sibling `.jpg`.  The
    /// original is left in place; callers remove it once nothing points at
    /// it any more.
    async fn convert_heif(
        &self,
        realm: &Realm,
        stored_filename: &str,
        raw: &Bytes,
    ) -> Result<(String, Vec<u8>), ServerError> {
        let jpeg_name = with_extension(stored_filename, "jpg");
        if jpeg_name == stored_filename {
            return Err(ServerError::Internal(format!(
                "{stored_filename} is already a JPEG name"
            )));
        }
        // A leftover file from an interrupted conversion may be overwritten,
        // a file some row points at may not.
        if realm.index().filename_in_use(&jpeg_name)? {
            return Err(ServerError::Internal(format!(
                "Converted name {jpeg_name} already in use"
            )));
        }

        let quality = self.conversion_quality;
        let input = raw.clone();
        let jpeg = tokio::task::spawn_blocking(move || transcode_heif_to_jpeg(&input, quality))
            .await
            .map_err(|e| ServerError::Internal(format!("Transcode task panicked: {e}")))??;

        write_atomic(&realm.asset_path(&jpeg_name)?, &jpeg).await?;

        debug!(from = %stored_filename, to = %jpeg_name, size = jpeg.len(), "transcoded HEIF");
        Ok((jpeg_name, jpeg))
    }
}

/// Extension a HEIF upload is stored under: its own if it has a HEIF one,
/// else the one its declared type implies, else `heic`.
fn heif_extension(ext: &str, content_type: Option<&str>) -> String {
    if ext == "heic" || ext == "heif" {
        return ext.to_string();
    }
    match content_type.and_then(extension_for_mime) {
        Some(mime_ext @ ("heic" | "heif")) => mime_ext.to_string(),
        _ => "heic".to_string(),
    }
}

fn get_photo(realm: &Realm, id: PhotoId) -> Result<Photo, ServerError> {
    realm.index().get_photo(id).map_err(|e| match e {
        StoreError::NotFound => ServerError::PhotoNotFound(id),
        other => other.into(),
    })
}

/// Client name reduced to its last path component.
fn display_name(original: &str, ext: &str) -> String {
    let name = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() {
        format!("photo.{ext}")
    } else {
        name.to_string()
    }
}

/// `<unix millis>-<8 hex>.<ext>`, created exclusively so that two uploads can
/// never share a file.
async fn write_unique(realm: &Realm, ext: &str, data: &[u8]) -> Result<String, ServerError> {
    for _ in 0..NAME_ATTEMPTS {
        let mut suffix = [0u8; 4];
        rand::rngs::OsRng.fill_bytes(&mut suffix);
        let name = format!(
            "{}-{}.{}",
            Utc::now().timestamp_millis(),
            hex::encode(suffix),
            ext
        );
        let path = realm.asset_path(&name)?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = write_all_synced(&mut file, data).await {
            drop(file);
            remove_quietly(&path).await;
            return Err(e.into());
        }

        debug!(user = %realm.user_id(), file = %name, size = data.len(), "stored upload");
        return Ok(name);
    }

    Err(ServerError::Internal(
        "Could not allocate a unique file name".to_string(),
    ))
}

async fn write_all_synced(file: &mut fs::File, data: &[u8]) -> std::io::Result<()> {
    file.write_all(data).await?;
    file.sync_all().await
}

async fn write_thumbnail(realm: &Realm, stored_filename: &str, asset: Bytes) -> Result<(), ServerError> {
    let thumb = tokio::task::spawn_blocking(move || make_thumbnail(&asset))
        .await
        .map_err(|e| ServerError::Internal(format!("Thumbnail task panicked: {e}")))??;
    write_atomic(&realm.thumbnail_path(stored_filename)?, &thumb).await?;
    Ok(())
}

/// Write via a temporary sibling and rename, so readers never see a partial
/// file.
async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(format!(".{}", tmp_name.to_string_lossy()));

    fs::write(&tmp, data).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        remove_quietly(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Remove a file; a file that is already gone is not an error.
async fn remove_tolerant(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = remove_tolerant(path).await {
        warn!(path = %path.display(), error = %e, "cleanup failed");
    }
}

use std::path::Path;

use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use photovault_shared::PhotoId;

use crate::database::{Database, Schema};
use crate::error::{Result, StoreError};
use crate::models::{decode_timestamp, encode_timestamp, AssetRewrite, Photo};

const PHOTO_COLUMNS: &str = "id, display_name, stored_filename, mime_type, size_bytes, created_at";

/// A realm's metadata index: a single `photos` table.
#[derive(Debug)]
pub struct PhotoIndex {
    db: Database,
}

impl PhotoIndex {
    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self {
            db: Database::open_at(path, Schema::Photos)?,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::open_in_memory(Schema::Photos)?,
        })
    }

    pub fn insert_photo(&self, photo: &Photo) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO photos (id, display_name, stored_filename, mime_type, size_bytes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    photo.id.to_string(),
                    photo.display_name,
                    photo.stored_filename,
                    photo.mime_type,
                    photo.size_bytes,
                    encode_timestamp(&photo.created_at),
                ],
            )
            .map_err(StoreError::from_write)?;
            Ok(())
        })
    }

    pub fn get_photo(&self, id: PhotoId) -> Result<Photo> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE id = ?1"),
                params![id.to_string()],
                row_to_photo,
            )
            .optional()?
            .ok_or(StoreError::NotFound)
        })
    }

    /// All photos, newest first.
    pub fn list_photos(&self) -> Result<Vec<Photo>> {
        self.query_photos(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos ORDER BY created_at DESC, rowid DESC"
        ))
    }

    /// Photos whose stored asset is still HEIC/HEIF.
    pub fn list_heif_photos(&self) -> Result<Vec<Photo>> {
        // LIKE is case-insensitive for ASCII in SQLite.
        self.query_photos(&format!(
            "SELECT {PHOTO_COLUMNS} FROM photos
             WHERE stored_filename LIKE '%.heic' OR stored_filename LIKE '%.heif'
             ORDER BY created_at ASC"
        ))
    }

    /// Point a row at a converted asset.
    ///
    /// Compare-and-set on the current stored filename: returns `false` when the
    /// row was deleted or already rewritten by someone else.
    pub fn rewrite_asset(
        &self,
        id: PhotoId,
        expected_filename: &str,
        rewrite: &AssetRewrite,
    ) -> Result<bool> {
        self.db.with_conn(|conn| {
            let affected = conn
                .execute(
                    "UPDATE photos
                     SET stored_filename = ?1, display_name = ?2, mime_type = ?3, size_bytes = ?4
                     WHERE id = ?5 AND stored_filename = ?6",
                    params![
                        rewrite.stored_filename,
                        rewrite.display_name,
                        rewrite.mime_type,
                        rewrite.size_bytes,
                        id.to_string(),
                        expected_filename,
                    ],
                )
                .map_err(StoreError::from_write)?;
            Ok(affected > 0)
        })
    }

    // only removes the row, not the files on disk
    pub fn delete_photo(&self, id: PhotoId) -> Result<bool> {
        self.db.with_conn(|conn| {
            let affected =
                conn.execute("DELETE FROM photos WHERE id = ?1", params![id.to_string()])?;
            Ok(affected > 0)
        })
    }

    pub fn filename_in_use(&self, stored_filename: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM photos WHERE stored_filename = ?1",
                params![stored_filename],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    pub fn count_photos(&self) -> Result<u64> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    fn query_photos(&self, sql: &str) -> Result<Vec<Photo>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map([], row_to_photo)?;

            let mut photos = Vec::new();
            for row in rows {
                photos.push(row?);
            }
            Ok(photos)
        })
    }
}

fn row_to_photo(row: &rusqlite::Row<'_>) -> rusqlite::Result<Photo> {
    let id_str: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let stored_filename: String = row.get(2)?;
    let mime_type: String = row.get(3)?;
    let size_bytes: i64 = row.get(4)?;
    let created_str: String = row.get(5)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Photo {
        id: PhotoId(id),
        display_name,
        stored_filename,
        mime_type,
        size_bytes,
        created_at: decode_timestamp(&created_str, 5)?,
    })
}

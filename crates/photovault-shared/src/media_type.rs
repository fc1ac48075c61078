//! Upload classification by declared content type and file extension.

/// Extensions accepted at the upload boundary.
pub const ACCEPTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff", "heic", "heif", "avif", "svg",
];

const HEIF_EXTENSIONS: &[&str] = &["heic", "heif"];

const HEIF_MIME_TYPES: &[&str] = &[
    "image/heic",
    "image/heif",
    "image/heic-sequence",
    "image/heif-sequence",
];

pub const JPEG_MIME: &str = "image/jpeg";

/// Lowercased extension of `filename`, without the dot.
pub fn extension_of(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn is_image_mime(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
}

/// An upload is accepted if it declares an image content type or carries a
/// known image extension.
pub fn is_accepted_upload(content_type: Option<&str>, filename: &str) -> bool {
    if content_type.is_some_and(is_image_mime) {
        return true;
    }
    extension_of(filename).is_some_and(|ext| ACCEPTED_EXTENSIONS.contains(&ext.as_str()))
}

/// HEIC/HEIF detection by extension or declared mime type.
pub fn is_heif(filename: &str, content_type: Option<&str>) -> bool {
    if extension_of(filename).is_some_and(|ext| HEIF_EXTENSIONS.contains(&ext.as_str())) {
        return true;
    }
    content_type.is_some_and(|ct| {
        let ct = ct.trim().to_ascii_lowercase();
        HEIF_MIME_TYPES.contains(&ct.as_str())
    })
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => JPEG_MIME,
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Best extension for a declared mime type, used when the client name has none.
pub fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    let ext = match content_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        "image/heic" | "image/heic-sequence" => "heic",
        "image/heif" | "image/heif-sequence" => "heif",
        "image/avif" => "avif",
        "image/svg+xml" => "svg",
        _ => return None,
    };
    Some(ext)
}

/// Replace (or append) the extension of a display name.
pub fn with_extension(name: &str, ext: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{stem}.{ext}"),
        _ => format!("{name}.{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("IMG_0001.HEIC").as_deref(), Some("heic"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_of(".hidden"), None);
        assert_eq!(extension_of("noext"), None);
    }

    #[test]
    fn test_accepts_by_mime_or_extension() {
        assert!(is_accepted_upload(Some("image/png"), "blob"));
        assert!(is_accepted_upload(Some("application/octet-stream"), "a.heic"));
        assert!(is_accepted_upload(None, "vector.svg"));
        assert!(!is_accepted_upload(Some("text/plain"), "notes.txt"));
        assert!(!is_accepted_upload(None, "run.exe"));
    }

    #[test]
    fn test_heif_detection() {
        assert!(is_heif("photo.HEIF", None));
        assert!(is_heif("upload", Some("image/heic")));
        assert!(!is_heif("photo.jpg", Some("image/jpeg")));
    }

    #[test]
    fn test_with_extension() {
        assert_eq!(with_extension("IMG_1.HEIC", "jpg"), "IMG_1.jpg");
        assert_eq!(with_extension("scan", "jpg"), "scan.jpg");
    }
}

/// Application name
pub const APP_NAME: &str = "Photovault";

/// Minimum username length (after trimming)
pub const MIN_USERNAME_LEN: usize = 3;

/// Minimum password length
pub const MIN_PASSWORD_LEN: usize = 6;

/// Thumbnails fit inside a square of this many pixels
pub const THUMBNAIL_MAX_DIM: u32 = 480;

/// Prefix for derived thumbnail file names
pub const THUMBNAIL_PREFIX: &str = "thumb-";

/// Extension (and format) of derived thumbnails
pub const THUMBNAIL_EXT: &str = "jpg";

/// JPEG quality for thumbnails
pub const THUMBNAIL_QUALITY: u8 = 78;

/// JPEG quality for HEIC/HEIF conversions (photographic content)
pub const CONVERSION_QUALITY: u8 = 90;

/// Maximum upload size in bytes (50 MiB)
pub const MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Default token lifetime in seconds (7 days)
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Longest accepted token lifetime in seconds (10 years)
pub const MAX_TOKEN_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Name of the credential index inside the data root
pub const CREDENTIALS_DB_FILE: &str = "credentials.db";

/// Name of the legacy flat user list inside the data root
pub const LEGACY_USERS_FILE: &str = "users.json";

/// Directory holding one realm per user inside the data root
pub const USERS_DIR: &str = "users";

/// Per-realm file area
pub const REALM_FILES_DIR: &str = "files";

/// Per-realm metadata index
pub const REALM_INDEX_FILE: &str = "photos.db";

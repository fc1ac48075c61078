//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use rand::RngCore;

use photovault_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_TOKEN_TTL_SECS, LEGACY_USERS_FILE, MAX_TOKEN_TTL_SECS,
    MAX_UPLOAD_SIZE,
};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Root of all persisted state: the credential index plus one
    /// `users/<id>/` realm per user.
    /// Env: `DATA_DIR`
    /// Default: `./data`
    pub data_dir: PathBuf,

    /// Legacy flat user list imported on first boot.
    /// Env: `LEGACY_USERS_FILE`
    /// Default: `<DATA_DIR>/users.json`
    pub legacy_users_file: PathBuf,

    /// HMAC key for bearer tokens.
    /// Env: `TOKEN_SECRET`
    /// Default: random per process (tokens do not survive a restart).
    pub token_secret: Vec<u8>,

    /// Token lifetime in seconds, at most 10 years.
    /// Env: `TOKEN_TTL_SECS`
    /// Default: 7 days
    pub token_ttl_secs: i64,

    /// Credentials of the user provisioned into an empty credential store.
    /// Env: `DEFAULT_USERNAME`, `DEFAULT_PASSWORD`
    /// Default: `admin` / `changeme`
    pub default_username: String,
    pub default_password: String,

    /// Allowed CORS origins.  Empty means any origin.
    /// Env: `CORS_ORIGINS` (comma separated)
    pub cors_origins: Vec<String>,

    /// Request body limit for uploads.
    /// Env: `MAX_UPLOAD_BYTES`
    /// Default: 50 MiB
    pub max_upload_bytes: usize,

    /// Accept `?token=` when no `Authorization` header is present.  Needed
    /// for `<img src>` style consumers; such tokens can end up in logs and
    /// referrers.
    /// Env: `ALLOW_QUERY_TOKEN` (true/false)
    /// Default: `true`
    pub allow_query_token: bool,

    /// Whether `token_secret` came from the environment.
    pub token_secret_configured: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("./data");
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            legacy_users_file: data_dir.join(LEGACY_USERS_FILE),
            data_dir,
            token_secret: random_secret(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            default_username: "admin".to_string(),
            default_password: "changeme".to_string(),
            cors_origins: Vec::new(),
            max_upload_bytes: MAX_UPLOAD_SIZE,
            allow_query_token: true,
            token_secret_configured: false,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("data_dir", &self.data_dir)
            .field("legacy_users_file", &self.legacy_users_file)
            .field("token_secret", &"<redacted>")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("default_username", &self.default_username)
            .field("cors_origins", &self.cors_origins)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("allow_query_token", &self.allow_query_token)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(dir) = get("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        config.legacy_users_file = match get("LEGACY_USERS_FILE") {
            Some(path) => PathBuf::from(path),
            None => config.data_dir.join(LEGACY_USERS_FILE),
        };

        if let Some(secret) = get("TOKEN_SECRET") {
            if secret.len() >= 16 {
                config.token_secret = secret.into_bytes();
                config.token_secret_configured = true;
            } else {
                tracing::warn!("TOKEN_SECRET shorter than 16 bytes, using a random secret");
            }
        }

        if let Some(val) = get("TOKEN_TTL_SECS") {
            match val.parse::<i64>() {
                Ok(n) if n > MAX_TOKEN_TTL_SECS => {
                    tracing::warn!(value = n, max = MAX_TOKEN_TTL_SECS, "TOKEN_TTL_SECS too large, clamping");
                    config.token_ttl_secs = MAX_TOKEN_TTL_SECS;
                }
                Ok(n) if n > 0 => config.token_ttl_secs = n,
                _ => tracing::warn!(value = %val, "Invalid TOKEN_TTL_SECS, using default"),
            }
        }

        if let Some(name) = get("DEFAULT_USERNAME") {
            config.default_username = name;
        }

        if let Some(password) = get("DEFAULT_PASSWORD") {
            config.default_password = password;
        }

        if let Some(val) = get("CORS_ORIGINS") {
            config.cors_origins = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(val) = get("MAX_UPLOAD_BYTES") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_upload_bytes = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_UPLOAD_BYTES, using default"),
            }
        }

        if let Some(val) = get("ALLOW_QUERY_TOKEN") {
            config.allow_query_token = val != "false" && val != "0";
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn random_secret() -> Vec<u8> {
    let mut secret = vec![0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    secret
}

//! # photovault-server
//!
//! Personal multi-user photo vault.
//!
//! This binary provides:
//! - **Accounts**: registration and login against a SQLite credential index,
//!   with a default user provisioned into an empty store
//! - **Stateless bearer tokens** signed with HMAC-SHA256
//! - **Per-user realms**: a private file area plus a photo index, created
//!   lazily on first access
//! - **Upload pipeline**: HEIC/HEIF to JPEG conversion and thumbnail
//!   derivation
//! - **Startup reconciliation** that imports a legacy user list, converts
//!   leftover HEIC assets and backfills thumbnails
//! - **REST API** (axum) for all of the above

mod api;
mod config;
mod credentials;
mod error;
mod password;
mod pipeline;
mod reconcile;
mod registry;
mod token;

use std::sync::Arc;

use photovault_shared::constants::{APP_NAME, CREDENTIALS_DB_FILE};
use photovault_store::CredentialIndex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::credentials::CredentialService;
use crate::pipeline::MediaPipeline;
use crate::reconcile::Reconciler;
use crate::registry::StoreRegistry;
use crate::token::TokenService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,photovault_server=debug")),
        )
        .init();

    info!("Starting {} v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if !config.token_secret_configured {
        warn!("TOKEN_SECRET not set; tokens will not survive a restart");
    }
    if config.allow_query_token {
        info!("Query-string tokens accepted for asset URLs");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let credential_index = {
        let path = config.data_dir.join(CREDENTIALS_DB_FILE);
        Arc::new(tokio::task::spawn_blocking(move || CredentialIndex::open_at(&path)).await??)
    };
    let credentials = Arc::new(CredentialService::new(
        credential_index,
        config.default_username.clone(),
        config.default_password.clone(),
    ));
    let tokens = Arc::new(TokenService::new(
        &config.token_secret,
        chrono::Duration::seconds(config.token_ttl_secs),
    )?);
    info!(ttl_secs = tokens.ttl().num_seconds(), "Token service ready");
    let registry = Arc::new(StoreRegistry::new(&config.data_dir));
    let pipeline = Arc::new(MediaPipeline::new());

    let app_state = AppState {
        credentials: credentials.clone(),
        tokens,
        registry: registry.clone(),
        pipeline: pipeline.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background reconciliation
    // -----------------------------------------------------------------------
    // Requests are served while it runs; it only relies on the per-statement
    // atomicity of the indexes.
    let reconciler = Reconciler::new(
        credentials,
        registry,
        pipeline,
        config.legacy_users_file.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = reconciler.run().await {
            warn!(error = %e, "startup reconciliation aborted");
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

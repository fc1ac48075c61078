use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State},
    http::{header, request::Parts, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use photovault_shared::PhotoId;
use photovault_store::{Photo, User};

use crate::config::ServerConfig;
use crate::credentials::CredentialService;
use crate::error::ServerError;
use crate::pipeline::{MediaPipeline, ResolvedFile, UploadedFile};
use crate::registry::{Realm, StoreRegistry};
use crate::token::TokenService;

#[derive(Clone)]
pub struct AppState {
    pub credentials: Arc<CredentialService>,
    pub tokens: Arc<TokenService>,
    pub registry: Arc<StoreRegistry>,
    pub pipeline: Arc<MediaPipeline>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let origins = if state.config.cors_origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            state
                .config
                .cors_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/photos", get(list_photos).post(upload_photos))
        .route("/api/photos/{id}", delete(delete_photo))
        .route("/api/photos/{id}/file", get(photo_file))
        .route("/api/photos/{id}/thumbnail", get(photo_thumbnail))
        .route("/api/photos/{id}/download", get(photo_download))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP API server listening");

    axum::serve(listener, router).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// The caller a valid token resolved to.
pub struct AuthUser(pub User);

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // Any Authorization header, even one that is not a bearer token,
        // takes precedence over `?token=`.
        let token = if parts.headers.contains_key(header::AUTHORIZATION) {
            bearer_token(parts)
        } else if state.config.allow_query_token {
            query_token(parts)
        } else {
            None
        };
        let token = token.ok_or(ServerError::Unauthorized)?;

        let claims = state.tokens.verify(&token).ok_or(ServerError::Unauthorized)?;
        let user = state
            .credentials
            .find_user(&claims.user_id)
            .await?
            .ok_or(ServerError::Unauthorized)?;

        Ok(AuthUser(user))
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn query_token(parts: &Parts) -> Option<String> {
    let Query(query) = Query::<TokenQuery>::try_from_uri(&parts.uri).ok()?;
    query.token.filter(|t| !t.is_empty())
}

/// Raw login/registration body.  `username` is accepted as an alias of
/// `loginId`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthRequest {
    #[serde(alias = "username")]
    login_id: Option<String>,
    password: Option<String>,
}

/// A validated login/registration request.
#[derive(Debug, PartialEq, Eq)]
struct AuthCommand {
    login_id: String,
    password: String,
}

impl TryFrom<AuthRequest> for AuthCommand {
    type Error = ServerError;

    fn try_from(req: AuthRequest) -> Result<Self, Self::Error> {
        let login_id = req
            .login_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ServerError::Validation("loginId is required".to_string()))?;
        let password = req
            .password
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ServerError::Validation("password is required".to_string()))?;
        Ok(Self { login_id, password })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserView {
    id: String,
    username: String,
    storage_folder: String,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.username.clone(),
            storage_folder: user.id.storage_label(),
        }
    }
}

#[derive(Serialize)]
struct AuthResponse {
    token: String,
    user: UserView,
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<AuthRequest>,
) -> Result<Json<AuthResponse>, ServerError> {
    let cmd = AuthCommand::try_from(body)?;
    let user = state.credentials.register(&cmd.login_id, &cmd.password).await?;
    // Provision eagerly so the first upload does not pay for it.
    state.registry.get_or_create(&user.id).await?;
    auth_response(&state, &user)
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<AuthRequest>,
) -> Result<Json<AuthResponse>, ServerError> {
    let cmd = AuthCommand::try_from(body)?;
    let user = state
        .credentials
        .authenticate(&cmd.login_id, &cmd.password)
        .await?;
    state.registry.get_or_create(&user.id).await?;
    auth_response(&state, &user)
}

fn auth_response(state: &AppState, user: &User) -> Result<Json<AuthResponse>, ServerError> {
    Ok(Json(AuthResponse {
        token: state.tokens.issue(&user.id)?,
        user: UserView::from(user),
    }))
}

async fn me(AuthUser(user): AuthUser) -> Json<UserView> {
    Json(UserView::from(&user))
}

// ---------------------------------------------------------------------------
// Photos
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PhotoView {
    id: PhotoId,
    name: String,
    url: String,
    thumbnail_url: String,
    download_url: String,
    added_at: String,
    mime_type: String,
    size: i64,
}

impl From<&Photo> for PhotoView {
    fn from(photo: &Photo) -> Self {
        let base = format!("/api/photos/{}", photo.id);
        Self {
            id: photo.id,
            name: photo.display_name.clone(),
            url: format!("{base}/file"),
            thumbnail_url: format!("{base}/thumbnail"),
            download_url: format!("{base}/download"),
            added_at: photovault_store::encode_timestamp(&photo.created_at),
            mime_type: photo.mime_type.clone(),
            size: photo.size_bytes,
        }
    }
}

#[derive(Serialize)]
struct UploadError {
    name: String,
    error: String,
    code: &'static str,
}

#[derive(Serialize)]
struct UploadResponse {
    photos: Vec<PhotoView>,
    errors: Vec<UploadError>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn realm_of(state: &AppState, user: &User) -> Result<Arc<Realm>, ServerError> {
    state.registry.get_or_create(&user.id).await
}

async fn list_photos(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<PhotoView>>, ServerError> {
    let realm = realm_of(&state, &user).await?;
    let photos = state.pipeline.list(&realm)?;
    Ok(Json(photos.iter().map(PhotoView::from).collect()))
}

async fn upload_photos(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();
        if name != "file" && name != "files" {
            debug!(field = %name, "ignoring multipart field");
            continue;
        }

        let file_name = field.file_name().unwrap_or("").to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(multipart_error)?;
        files.push(UploadedFile {
            file_name,
            content_type,
            data,
        });
    }

    if files.is_empty() {
        return Err(ServerError::Validation(
            "Missing 'file' field in multipart form".to_string(),
        ));
    }

    let realm = realm_of(&state, &user).await?;
    let names: Vec<String> = files.iter().map(|f| f.file_name.clone()).collect();
    let outcomes = state.pipeline.ingest(&realm, files).await;

    let mut photos = Vec::new();
    let mut errors = Vec::new();
    let mut first_error = None;
    for (name, outcome) in names.into_iter().zip(outcomes) {
        match outcome {
            Ok(photo) => photos.push(PhotoView::from(&photo)),
            Err(e) => {
                warn!(user = %user.id, file = %name, error = %e, "upload rejected");
                errors.push(UploadError {
                    name,
                    error: e.public_message(),
                    code: e.code(),
                });
                first_error.get_or_insert(e);
            }
        }
    }

    if photos.is_empty() {
        if let Some(e) = first_error {
            return Err(e);
        }
    }

    Ok(Json(UploadResponse { photos, errors }))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ServerError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::PayloadTooLarge
    } else {
        ServerError::Validation(format!("Multipart error: {e}"))
    }
}

async fn delete_photo(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<PhotoId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let realm = realm_of(&state, &user).await?;
    state.pipeline.remove(&realm, id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn photo_file(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<PhotoId>,
) -> Result<Response, ServerError> {
    let realm = realm_of(&state, &user).await?;
    let file = state.pipeline.resolve_asset(&realm, id).await?;
    file_response(file, false).await
}

async fn photo_thumbnail(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<PhotoId>,
) -> Result<Response, ServerError> {
    let realm = realm_of(&state, &user).await?;
    let file = state.pipeline.resolve_thumbnail(&realm, id).await?;
    file_response(file, false).await
}

async fn photo_download(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<PhotoId>,
) -> Result<Response, ServerError> {
    let realm = realm_of(&state, &user).await?;
    let file = state.pipeline.resolve_asset(&realm, id).await?;
    file_response(file, true).await
}

async fn file_response(file: ResolvedFile, attachment: bool) -> Result<Response, ServerError> {
    let data = match tokio::fs::read(&file.path).await {
        Ok(data) => data,
        // Deleted between resolving and reading.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ServerError::FileMissing(file.photo.id))
        }
        Err(e) => return Err(e.into()),
    };

    let content_type = HeaderValue::from_str(&file.mime_type)
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));
    let mut response = (StatusCode::OK, data).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("private, max-age=3600"));

    if attachment {
        let disposition = content_disposition(&file.photo.display_name);
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }

    Ok(response)
}

/// `attachment` with an ASCII fallback name plus the RFC 5987 UTF-8 form.
fn content_disposition(display_name: &str) -> String {
    let fallback: String = display_name
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();

    let mut encoded = String::new();
    for byte in display_name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }

    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

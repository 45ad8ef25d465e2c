//! HTTP API for whence: archive, normalized-file, and snippet reads plus the
//! upload-and-identify and import-by-url entry points.
//!
//! Thin by intent — every handler is a store query or an importer call plus a
//! JSON shape. Errors come back as `{"error": ...}` with standard status
//! codes; successful identify/import calls answer 303 to the canonical
//! resource URL.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use whence_core::lookup;
use whence_core::pypi::{canonicalize_name, PyPiClient};
use whence_core::Importer;

// ---------------------------------------------------------------------------
// Shared state and error mapping
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppContext {
    pub importer: Arc<Importer>,
    pub index: Arc<PyPiClient>,
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(what: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: what.into() }
    }

    fn bad_request(what: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: what.into() }
    }
}

impl From<whence_core::Error> for ApiError {
    fn from(e: whence_core::Error) -> Self {
        use whence_core::Error::*;
        let status = match &e {
            NotFound(_) => StatusCode::NOT_FOUND,
            Parse(_) | InvalidInput(_) => StatusCode::BAD_REQUEST,
            Network(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, message: e.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/archive/hash/{hash}", get(archive_detail))
        .route("/normalized/hash/{hash}", get(normalized_detail))
        .route("/normalized/hash/{hash}/partial", get(normalized_partial))
        .route("/file/hash/{hash}", get(file_redirect))
        .route("/snippet/hash/{hash}", get(snippet_detail))
        .route("/identify/file/", post(identify_file))
        .route("/import/project-url/", post(import_project_url))
        .layer(DefaultBodyLimit::max(8 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn root() -> &'static str {
    "whence: source-file provenance index"
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

async fn archive_detail(
    State(ctx): State<AppContext>,
    Path(hash): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let store = ctx.importer.store();
    let archive = store
        .get_archive(&hash)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("archive {hash}")))?;
    let files: Vec<_> = store
        .archive_files(&hash)
        .await?
        .into_iter()
        .map(|f| json!({ "normalized_hash": f.normalized_hash, "sample_name": f.sample_name }))
        .collect();
    Ok(Json(json!({ "url": archive.url, "files": files })))
}

async fn normalized_detail(
    State(ctx): State<AppContext>,
    Path(hash): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let store = ctx.importer.store();
    if !store.normalized_exists(&hash).await? {
        return Err(ApiError::not_found(format!("normalized file {hash}")));
    }
    let archives: Vec<_> = store
        .archives_containing_normalized(&hash)
        .await?
        .into_iter()
        .map(|m| json!({ "hash": m.archive_hash, "filename": m.archive_filename() }))
        .collect();
    let snippets: Vec<_> = store
        .normalized_snippets(&hash)
        .await?
        .into_iter()
        .map(|s| json!({ "hash": s.hash, "text": s.text }))
        .collect();
    Ok(Json(json!({ "archives": archives, "snippets": snippets })))
}

/// Explain a normalized file as a greedy cover by other normalized files
/// sharing its snippets.
async fn normalized_partial(
    State(ctx): State<AppContext>,
    Path(hash): Path<String>,
) -> Result<Json<lookup::Coverage>, ApiError> {
    let coverage = lookup::decompose_normalized(ctx.importer.store(), &hash).await?;
    Ok(Json(coverage))
}

async fn file_redirect(
    State(ctx): State<AppContext>,
    Path(hash): Path<String>,
) -> Result<Redirect, ApiError> {
    let normalized = ctx
        .importer
        .store()
        .file_normalized_hash(&hash)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("file {hash}")))?;
    Ok(Redirect::to(&format!("/normalized/hash/{normalized}")))
}

async fn snippet_detail(
    State(ctx): State<AppContext>,
    Path(hash): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let store = ctx.importer.store();
    let snippet = store
        .get_snippet(&hash)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("snippet {hash}")))?;
    let norm_files = store.normalized_containing_snippet(&hash).await?;
    Ok(Json(json!({
        "text": snippet.text,
        "norm_count": norm_files.len(),
        "norm_files": norm_files,
    })))
}

// ---------------------------------------------------------------------------
// Ingestion entry points
// ---------------------------------------------------------------------------

async fn identify_file(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Redirect, ApiError> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("bad multipart body: {e}")))?
        .ok_or_else(|| ApiError::bad_request("missing file field"))?;
    let bytes = field
        .bytes()
        .await
        .map_err(|e| ApiError::bad_request(format!("bad multipart body: {e}")))?;

    let imported = ctx.importer.import_file_contents(&bytes).await?;
    info!(hash = imported.hash.as_str(), "identified uploaded file");
    Ok(Redirect::to(&format!("/normalized/hash/{}", imported.normalized_hash)))
}

#[derive(Deserialize)]
struct ImportQuery {
    project: String,
    url: String,
}

async fn import_project_url(
    State(ctx): State<AppContext>,
    Query(q): Query<ImportQuery>,
) -> Result<Redirect, ApiError> {
    let canonical = canonicalize_name(&q.project);

    // Pull index metadata for the URL when available; ingest either way.
    let metadata = match ctx.index.project_page(&canonical).await {
        Ok(packages) => packages.into_iter().find(|p| p.url == q.url),
        Err(_) => None,
    };
    let (claimed, timestamp, version) = match &metadata {
        Some(p) => (
            p.sha256.as_deref(),
            p.upload_time.unwrap_or_else(whence_core::importer::placeholder_timestamp),
            p.version.as_deref(),
        ),
        None => (None, whence_core::importer::placeholder_timestamp(), None),
    };

    let hash = ctx
        .importer
        .import_url(claimed, &q.url, timestamp, Some(&canonical), version)
        .await?;
    Ok(Redirect::to(&format!("/api/archive/hash/{hash}")))
}

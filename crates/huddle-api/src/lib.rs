pub mod download;
pub mod error;
pub mod fetch;
pub mod health;
pub mod rehost;
pub mod uploads;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, header},
    routing::{get, post},
};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeader;

use huddle_db::BlobStore;

/// Headroom over the file cap for multipart boundaries and headers.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub blobs: Arc<BlobStore>,
    pub http: reqwest::Client,
    pub started_at: Instant,
    pub max_upload_bytes: usize,
}

impl ApiState {
    pub fn new(blobs: Arc<BlobStore>, max_upload_bytes: usize, fetch_timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            blobs,
            http: fetch::build_client(fetch_timeout)?,
            started_at: Instant::now(),
            max_upload_bytes,
        })
    }
}

/// `/health`, `/upload`, `/uploads/{name}`, `/download` and `/rehost`.
pub fn router(state: ApiState) -> Router {
    // Uploaded SVG or HTML-ish media must not run script on our origin
    let uploads = SetResponseHeader::overriding(
        ServeDir::new(state.blobs.dir()),
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("sandbox"),
    );
    let body_limit = state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/health", get(health::health))
        .route("/upload", post(uploads::upload))
        .route("/rehost", post(rehost::rehost))
        .route("/download", get(download::download))
        .nest_service("/uploads", uploads)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use tracing::info;

use huddle_types::api::{RehostRequest, RehostResponse};

use crate::ApiState;
use crate::error::ApiError;
use crate::fetch::{extension_for, fetch_media, validate_url};

/// POST /rehost: copy a remote media file into local blob storage.
pub async fn rehost(
    State(state): State<ApiState>,
    body: Result<Json<RehostRequest>, JsonRejection>,
) -> Result<Json<RehostResponse>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::InvalidUrl(e.body_text()))?;
    let url = validate_url(&req.url)?;

    let media = fetch_media(&state.http, url.clone(), state.max_upload_bytes).await?;
    let extension = extension_for(&media.original_name, &media.mime);
    let local = state.blobs.store(extension.as_deref(), &media.bytes).await?;

    info!("Rehosted {} as {} ({} bytes)", url, local, media.bytes.len());

    Ok(Json(RehostResponse {
        url: local,
        original_name: media.original_name,
        mime: media.mime,
    }))
}

use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};
use tracing::{info, warn};

use huddle_types::api::UploadResponse;

use crate::ApiState;
use crate::error::ApiError;
use crate::fetch::{essence, extension_for, is_media_type};

const FIELD_NAME: &str = "file";

/// POST /upload: stores one image, audio or video file from the `file`
/// multipart field and returns its public URL.
pub async fn upload(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let max = state.max_upload_bytes;

    while let Some(mut field) = multipart.next_field().await.map_err(|e| multipart_error(e, max))? {
        if field.name() != Some(FIELD_NAME) {
            continue;
        }

        let mime = field.content_type().map(essence).unwrap_or_default();
        if !is_media_type(&mime) {
            return Err(ApiError::UnsupportedMedia(mime));
        }
        let original_name = field.file_name().unwrap_or_default().to_string();

        let mut data = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, max))? {
            if data.len() + chunk.len() > max {
                return Err(ApiError::TooLarge { max });
            }
            data.extend_from_slice(&chunk);
        }

        let extension = extension_for(&original_name, &mime);
        let url = state.blobs.store(extension.as_deref(), &data).await?;
        info!("Stored upload {} ({} bytes, {})", url, data.len(), mime);

        return Ok(Json(UploadResponse {
            url,
            mime,
            original_name,
        }));
    }

    Err(ApiError::MissingFile)
}

fn multipart_error(e: MultipartError, max: usize) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::TooLarge { max };
    }
    warn!("Multipart error: {}", e);
    ApiError::MissingFile
}

use axum::{
    body::Body,
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;
use tracing::debug;

use huddle_db::blobs::PUBLIC_PREFIX;
use huddle_types::api::DownloadQuery;

use crate::ApiState;
use crate::error::ApiError;
use crate::fetch::{fetch_media, validate_url};

const OCTET_STREAM: &str = "application/octet-stream";

/// GET /download?url=: serve a file as an attachment. Local `/uploads/`
/// URLs stream from disk; anything else is fetched with the rehost rules.
pub async fn download(
    State(state): State<ApiState>,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::InvalidUrl(e.body_text()))?;
    let raw = query.url.trim();

    if raw.starts_with(PUBLIC_PREFIX) {
        return download_local(&state, raw).await;
    }

    let url = validate_url(raw)?;
    let media = fetch_media(&state.http, url, state.max_upload_bytes).await?;
    debug!("Proxying download of {} ({} bytes)", raw, media.bytes.len());

    Ok((
        [
            (header::CONTENT_TYPE, content_type(&media.mime)),
            (header::CONTENT_DISPOSITION, attachment(&media.original_name)),
        ],
        media.bytes,
    )
        .into_response())
}

async fn download_local(state: &ApiState, url: &str) -> Result<Response, ApiError> {
    let path = state.blobs.local_path(url).ok_or(ApiError::NotFound)?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::NotFound)?;
    let len = file
        .metadata()
        .await
        .map_err(|e| ApiError::Storage(e.to_string()))?
        .len();

    let name = url.trim_start_matches(PUBLIC_PREFIX);
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM)),
            (header::CONTENT_DISPOSITION, attachment(name)),
            (header::CONTENT_LENGTH, HeaderValue::from(len)),
        ],
        body,
    )
        .into_response())
}

fn content_type(mime: &str) -> HeaderValue {
    HeaderValue::from_str(mime).unwrap_or_else(|_| HeaderValue::from_static(OCTET_STREAM))
}

/// `attachment; filename="..."` with anything outside printable ASCII
/// replaced.
fn attachment(name: &str) -> HeaderValue {
    let safe: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_header_is_sanitized() {
        assert_eq!(attachment("cat.png"), "attachment; filename=\"cat.png\"");
        assert_eq!(attachment("a\"b\r\n.png"), "attachment; filename=\"a_b__.png\"");
        assert_eq!(attachment("café.png"), "attachment; filename=\"caf_.png\"");
    }
}

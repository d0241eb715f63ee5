use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use huddle_types::api::{ErrorBody, ErrorKind};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("host not allowed: {0}")]
    InvalidHost(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),

    #[error("file exceeds {max} bytes")]
    TooLarge { max: usize },

    #[error("missing 'file' field in multipart form")]
    MissingFile,

    #[error("not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("upstream responded with {0}")]
    Upstream(u16),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("upstream timed out")]
    Timeout,
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            ApiError::InvalidHost(_) => ErrorKind::InvalidHost,
            ApiError::UnsupportedMedia(_) => ErrorKind::UnsupportedMedia,
            ApiError::TooLarge { .. } => ErrorKind::TooLarge,
            ApiError::MissingFile => ErrorKind::MissingFile,
            ApiError::NotFound => ErrorKind::NotFound,
            ApiError::Storage(_) => ErrorKind::StorageError,
            ApiError::Upstream(_) => ErrorKind::UpstreamError,
            ApiError::Fetch(_) => ErrorKind::FetchError,
            ApiError::Timeout => ErrorKind::Timeout,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidUrl(_) | ApiError::InvalidHost(_) | ApiError::MissingFile => {
                StatusCode::BAD_REQUEST
            }
            ApiError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(_) | ApiError::Fetch(_) => StatusCode::BAD_GATEWAY,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Storage(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Storage(detail) => {
                error!("Storage error: {}", detail);
                "storage error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error_kind: self.kind(),
            message,
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::TooLarge { max: 1 }.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ApiError::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(ApiError::Upstream(500).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ApiError::from(anyhow::anyhow!("disk full")).kind(),
            ErrorKind::StorageError
        );
    }
}

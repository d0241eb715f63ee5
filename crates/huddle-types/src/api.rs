use serde::{Deserialize, Serialize};

/// Error taxonomy shared by the gateway (acks, message errors) and the HTTP
/// surface (error bodies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Empty,
    TooLong,
    RateLimited,
    InvalidUrl,
    InvalidHost,
    UnsupportedMedia,
    TooLarge,
    MissingFile,
    NotFound,
    StorageError,
    UpstreamError,
    FetchError,
    Timeout,
}

// -- Uploads --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub mime: String,
    pub original_name: String,
}

// -- Rehost / download --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RehostRequest {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RehostResponse {
    pub url: String,
    pub original_name: String,
    pub mime: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub url: String,
}

// -- Health --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    /// Unix milliseconds.
    pub ts: i64,
}

/// Body of every non-2xx HTTP response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_kind: ErrorKind,
    pub message: String,
}

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use huddle_api::{ApiState, router};
use huddle_db::BlobStore;

const BOUNDARY: &str = "huddle-test-boundary";

async fn app(max_upload_bytes: usize) -> (Router, Arc<BlobStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let blobs = Arc::new(BlobStore::new(dir.path().join("uploads")).await.unwrap());
    let state = ApiState::new(blobs.clone(), max_upload_bytes, Duration::from_secs(1)).unwrap();
    (router(state), blobs, dir)
}

fn multipart(field: &str, file_name: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn rehost(url: &str) -> Request<Body> {
    Request::post("/rehost")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::json!({ "url": url }).to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _, _dir) = app(1024).await;
    let (status, body) = send_json(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["uptimeSecs"].is_u64());
    assert!(body["ts"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_upload_then_serve_and_download() {
    let (app, blobs, _dir) = app(1024).await;

    let (status, body) = send_json(&app, multipart("file", "cat.PNG", "image/png", b"png bytes")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mime"], "image/png");
    assert_eq!(body["originalName"], "cat.PNG");

    let url = body["url"].as_str().unwrap().to_string();
    assert!(url.starts_with("/uploads/"));
    assert!(url.ends_with(".png"));
    assert_eq!(blobs.read(&url).await.unwrap(), b"png bytes");

    let (status, served) = send(&app, get(&url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(served, b"png bytes");

    let response = app
        .clone()
        .oneshot(get(&format!("/download?url={url}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\""));
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"png bytes");
}

#[tokio::test]
async fn test_served_uploads_are_sandboxed() {
    let (app, _, _dir) = app(1024).await;

    let svg = br#"<svg xmlns="http://www.w3.org/2000/svg"><script>alert(1)</script></svg>"#;
    let (status, body) = send_json(&app, multipart("file", "x.svg", "image/svg+xml", svg)).await;
    assert_eq!(status, StatusCode::OK);

    let url = body["url"].as_str().unwrap();
    let response = app.clone().oneshot(get(url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_SECURITY_POLICY], "sandbox");
}

#[tokio::test]
async fn test_upload_rejections() {
    let (app, _, _dir) = app(16).await;

    let (status, body) = send_json(&app, multipart("file", "notes.txt", "text/plain", b"hi")).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["errorKind"], "UNSUPPORTED_MEDIA");

    let (status, body) = send_json(&app, multipart("other", "a.png", "image/png", b"hi")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorKind"], "MISSING_FILE");

    let (status, body) = send_json(&app, multipart("file", "big.png", "image/png", &[0u8; 17])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["errorKind"], "TOO_LARGE");

    // Exactly at the cap is fine
    let (status, _) = send_json(&app, multipart("file", "ok.png", "image/png", &[0u8; 16])).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rehost_refuses_bad_urls_without_fetching() {
    let (app, _, _dir) = app(1024).await;

    for (url, kind) in [
        ("not a url", "INVALID_URL"),
        ("ftp://example.com/a.png", "INVALID_URL"),
        ("http://localhost:3000/a.png", "INVALID_HOST"),
        ("http://192.168.0.10/a.png", "INVALID_HOST"),
        ("http://[::1]/a.png", "INVALID_HOST"),
    ] {
        let (status, body) = send_json(&app, rehost(url)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{url}");
        assert_eq!(body["errorKind"], kind, "{url}");
    }

    let malformed = Request::post("/rehost")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"link\": 1}"))
        .unwrap();
    let (status, body) = send_json(&app, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorKind"], "INVALID_URL");
}

#[tokio::test]
async fn test_download_rejections() {
    let (app, _, _dir) = app(1024).await;

    let (status, body) = send_json(&app, get("/download?url=/uploads/1-missing.png")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorKind"], "NOT_FOUND");

    let (status, body) = send_json(&app, get("/download?url=/uploads/../secret")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorKind"], "NOT_FOUND");

    let (status, body) = send_json(&app, get("/download?url=http://127.0.0.1/x.png")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorKind"], "INVALID_HOST");

    let (status, body) = send_json(&app, get("/download")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorKind"], "INVALID_URL");
}

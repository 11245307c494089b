//! Attachment downloads
//!
//! Serves blobs the hub's attachment inliner wrote, by the name carried in the
//! envelope's `url`.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use murmur_hub::BackendError;
use serde_json::json;
use tracing::{debug, error, warn};

use super::super::AppState;
use crate::blob::is_valid_name;

/// Create the file download router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/file/:name", get(file_handler))
        .with_state(state)
}

fn error_response(status: StatusCode, error: &str, message: String) -> Response {
    (status, Json(json!({ "error": error, "message": message }))).into_response()
}

/// MIME type for a stored blob, by its extension.
fn mime_for(name: &str) -> &'static str {
    let ext = FsPath::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("webp") => "image/webp",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("mid") => "audio/midi",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("avi") => "video/x-msvideo",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("html") => "text/html; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// GET /file/:name
async fn file_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    if !is_valid_name(&name) {
        warn!(name = %name, "Rejected file name");
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_name",
            format!("'{}' is not a valid file name", name),
        );
    }

    let contents = match state.blobs.read(&name).await {
        Ok(contents) => contents,
        Err(BackendError::NotFound(_)) => {
            return error_response(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("File '{}' not found", name),
            );
        }
        Err(e) => {
            error!(name = %name, error = %e, "Failed to read file");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                "Failed to read file".to_string(),
            );
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static(mime_for(&name)));

    // names are random per upload, so contents never change
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("public, max-age=31536000, immutable"),
    );

    debug!(name = %name, size = contents.len(), "Serving file");
    (StatusCode::OK, headers, contents).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::{create_test_state, test_router};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use murmur_hub::BlobStore;
    use tower::ServiceExt;

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("a.png"), "image/png");
        assert_eq!(mime_for("a.JPG"), "image/jpeg");
        assert_eq!(mime_for("a.mp3"), "audio/mpeg");
        assert_eq!(mime_for("noext"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_serves_stored_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = create_test_state(dir.path()).await;
        state.blobs.write("pic.png", b"pixels").await.unwrap();
        let app = test_router(state);

        let response = app
            .oneshot(Request::builder().uri("/file/pic.png").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"pixels");
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(create_test_state(dir.path()).await);

        let response = app
            .oneshot(Request::builder().uri("/file/nope.png").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dotted_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(create_test_state(dir.path()).await);

        let response = app
            .oneshot(Request::builder().uri("/file/..secret").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

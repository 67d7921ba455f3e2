//! HTTP surface.
//!
//! Two routes: `POST /api/ocr` accepts a multipart batch and answers with a
//! server-sent event stream, and `GET /api/health` reports dependency
//! status. The pipeline runs in its own task per request; the response
//! simply drains the event channel, so a disconnecting client drops the
//! receiver and cancels the batch cooperatively.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response, sse::Sse},
    routing::{get, post},
};
use futures::StreamExt as _;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;

use crate::{
    backends::RecognitionBackend,
    batch::{BatchPipeline, events::EventSink},
    config::AppConfig,
    health::build_health_status,
    pages::UploadedFile,
    prelude::*,
};

/// How many events may sit unread in a response channel before the pipeline
/// pauses. Small: the pipeline should not run far ahead of a slow client.
const EVENT_BUFFER: usize = 32;

/// Upper bound on files per batch, used only to size the request body
/// limit. The per-file size limit remains the user-facing check.
const MAX_BATCH_FILES: u64 = 20;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub backend: Arc<dyn RecognitionBackend>,
    pub temp_root: PathBuf,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    // A coarse whole-request ceiling so one request cannot buffer an
    // unbounded byte count. Per-file size limits are enforced by the
    // pipeline, where the violation can be reported per file instead of
    // failing the batch.
    let body_limit = (state.config.max_file_size_bytes() * MAX_BATCH_FILES) as usize;
    Router::new()
        .route("/api/ocr", post(submit_batch))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /api/health`
async fn health(State(state): State<AppState>) -> Response {
    let status = build_health_status(&state.config, state.backend.as_ref()).await;
    Json(status).into_response()
}

/// `POST /api/ocr`
///
/// Collects every non-empty file part, spawns a pipeline run, and streams
/// its lifecycle events back as SSE.
async fn submit_batch(State(state): State<AppState>, multipart: Multipart) -> Response {
    let files = match collect_files(multipart).await {
        Ok(files) => files,
        Err(err) => {
            warn!("failed to parse multipart form data: {:?}", err);
            return (StatusCode::BAD_REQUEST, "Expected multipart/form-data").into_response();
        }
    };
    if files.is_empty() {
        warn!("OCR request received with no valid files");
        return (StatusCode::BAD_REQUEST, "No files uploaded").into_response();
    }

    let (sink, rx) = EventSink::channel(EVENT_BUFFER);
    let pipeline = BatchPipeline::new(
        state.config.clone(),
        state.backend.clone(),
        state.temp_root.clone(),
    );
    // One task per batch. A panic here is scoped to this batch's task;
    // other in-flight batches and the server itself keep running.
    tokio::spawn(async move {
        pipeline.run(files, sink).await;
    });

    let stream = ReceiverStream::new(rx).map(|event| event.to_sse());
    Sse::new(stream).into_response()
}

/// Pull every non-empty file part out of the form.
///
/// Plain form fields carry no file name and are not uploads; they are
/// skipped, not rejected.
async fn collect_files(mut multipart: Multipart) -> Result<Vec<UploadedFile>> {
    let mut files = vec![];
    while let Some(field) = multipart
        .next_field()
        .await
        .context("failed to read multipart field")?
    {
        let Some(name) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .context("failed to read multipart field body")?;
        if data.is_empty() {
            continue;
        }
        files.push(UploadedFile {
            name,
            data: data.to_vec(),
        });
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use clap::Parser as _;
    use tower::ServiceExt as _;

    use super::*;
    use crate::backends::ollama::OllamaBackend;

    fn test_state() -> AppState {
        state_with_args(&[])
    }

    fn state_with_args(args: &[&str]) -> AppState {
        let config = Arc::new(
            AppConfig::try_parse_from(
                std::iter::once("ocrstream").chain(args.iter().copied()),
            )
            .expect("failed to parse test config"),
        );
        // The backend is never reached in these tests; every request either
        // fails validation or is rejected before recognition starts.
        let backend = Arc::new(OllamaBackend::new(reqwest::Client::new(), &config));
        AppState {
            config,
            backend,
            temp_root: std::env::temp_dir().join("ocrstream-test"),
        }
    }

    /// Build a multipart request for `POST /api/ocr`.
    fn multipart_request(parts: &[(&str, &str)]) -> Request<Body> {
        let boundary = "test-boundary-7291";
        let mut body = String::new();
        for (file_name, contents) in parts {
            body.push_str(&format!(
                "--{boundary}\r\n\
                 Content-Disposition: form-data; name=\"files\"; filename=\"{file_name}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n\
                 {contents}\r\n"
            ));
        }
        body.push_str(&format!("--{boundary}--\r\n"));
        Request::builder()
            .method("POST")
            .uri("/api/ocr")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("failed to build request")
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let app = router(test_state());
        let response = app
            .oneshot(multipart_request(&[]))
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .expect("failed to read body");
        assert_eq!(&body[..], b"No files uploaded");
    }

    #[tokio::test]
    async fn test_non_multipart_is_rejected() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/ocr")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .expect("failed to build request"),
            )
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_text_only_form_is_rejected() {
        // A plain form field has no filename and is not an upload.
        let boundary = "test-boundary-7291";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"note\"\r\n\r\n\
             just some text\r\n\
             --{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/ocr")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("failed to build request");

        let app = router(test_state());
        let response = app.oneshot(request).await.expect("request failed");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .expect("failed to read body");
        assert_eq!(&body[..], b"No files uploaded");
    }

    #[tokio::test]
    async fn test_request_body_ceiling() {
        // 1 MiB per file puts the whole-request ceiling at 20 MiB; one
        // 21 MiB part must be refused before it is buffered in full.
        let app = router(state_with_args(&["--max-file-size", "1"]));
        let boundary = "test-boundary-7291";
        let mut body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"files\"; filename=\"big.png\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend(vec![b'a'; 21 * 1024 * 1024]);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        let request = Request::builder()
            .method("POST")
            .uri("/api/ocr")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("failed to build request");

        let response = app.oneshot(request).await.expect("request failed");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_file_streams_error_and_summary() {
        let app = router(test_state());
        let response = app
            .oneshot(multipart_request(&[("notes.txt", "plain text")]))
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );

        // The pipeline rejects the file without touching the backend, so
        // the stream completes on its own.
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("failed to read body");
        let text = String::from_utf8(body.to_vec()).expect("body was not UTF-8");
        assert!(text.contains("event: error"));
        assert!(text.contains("Unsupported file type"));
        assert!(text.contains("event: batch-done"));
        assert!(text.contains("\"totalFiles\":1"));
        assert!(text.contains("\"failed\":1"));
        assert!(!text.contains("event: file-done"));
    }
}


//! HTTP surface tests: the full router driven in-process with a stub backend.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use doc2pdf::{
    router, AppState, BackendKind, ConversionBackend, ConversionResult, ConvertError, JobHandle,
    JobStatus, ResultLocator, ServiceConfig, UploadedDocument,
};
use http_body_util::BodyExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "doc2pdf-http-test";
const FAKE_PDF: &[u8] = b"%PDF-1.7\n% stub output\n%%EOF\n";

// ── Stub backend ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    RejectSubmit,
    CrashConverter,
    NoOutput,
}

struct StubBackend {
    behaviour: Behaviour,
    submits: AtomicU32,
}

impl StubBackend {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            submits: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ConversionBackend for StubBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalProcess
    }

    async fn submit(&self, doc: &UploadedDocument) -> Result<JobHandle, ConvertError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Succeed => Ok(JobHandle::ready(
                "stub-1",
                self.kind(),
                doc.filename.clone(),
                Some(ResultLocator::Inline(FAKE_PDF.into())),
            )),
            Behaviour::NoOutput => Ok(JobHandle::ready("stub-1", self.kind(), doc.filename.clone(), None)),
            Behaviour::RejectSubmit => Err(ConvertError::Submission {
                backend: "stub".into(),
                detail: "HTTP 422 Unprocessable Entity".into(),
            }),
            Behaviour::CrashConverter => Err(ConvertError::ProcessFailed {
                code: Some(1),
                stderr: "Error: source file could not be loaded".into(),
            }),
        }
    }

    async fn poll(&self, _handle: &mut JobHandle) -> Result<JobStatus, ConvertError> {
        Ok(JobStatus::Done)
    }

    async fn fetch(&self, handle: &JobHandle) -> Result<ConversionResult, ConvertError> {
        match handle.locator() {
            Some(ResultLocator::Inline(bytes)) => Ok(ConversionResult::new(
                bytes.clone(),
                doc2pdf::document::pdf_filename(handle.source_name()),
            )),
            _ => Err(ConvertError::ResultUnavailable {
                job_id: handle.id().into(),
                detail: "no output".into(),
            }),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn config() -> ServiceConfig {
    ServiceConfig::builder()
        .cors_origin("http://localhost:3000")
        .max_upload_bytes(16 * 1024)
        .build()
        .unwrap()
}

fn app_with(config: ServiceConfig, backend: Arc<StubBackend>) -> Router {
    let state = AppState::with_backend(config, backend).unwrap();
    router(Arc::new(state))
}

fn app(backend: Arc<StubBackend>) -> Router {
    app_with(config(), backend)
}

fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(f) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload(parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/convert")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    resp.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

// ── POST /convert ────────────────────────────────────────────────────────────

#[tokio::test]
async fn docx_upload_returns_pdf_attachment() {
    let resp = app(StubBackend::new(Behaviour::Succeed))
        .oneshot(upload(&[("file", Some("report.docx"), b"PK\x03\x04docx")]))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(
        resp.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"report.pdf\""
    );
    let body = body_bytes(resp).await;
    assert!(!body.is_empty());
    assert!(body.starts_with(b"%PDF"));
}

#[tokio::test]
async fn uppercase_pptx_extension_is_replaced() {
    let resp = app(StubBackend::new(Behaviour::Succeed))
        .oneshot(upload(&[("file", Some("deck.PPTX"), b"PK\x03\x04pptx")]))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"deck.pdf\""
    );
}

#[tokio::test]
async fn unsupported_extension_is_rejected_before_backend() {
    let backend = StubBackend::new(Behaviour::Succeed);
    let resp = app(backend.clone())
        .oneshot(upload(&[("file", Some("setup.exe"), b"MZ")]))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = json_body(resp).await;
    assert!(json["error"].as_str().unwrap().contains("exe"), "got: {json}");
    assert_eq!(backend.submits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_file_field_is_bad_request() {
    let backend = StubBackend::new(Behaviour::Succeed);
    let resp = app(backend.clone())
        .oneshot(upload(&[("comment", None, b"no file here")]))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["error"], "File upload failed");
    assert_eq!(backend.submits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn extra_form_fields_do_not_fail_the_upload() {
    let resp = app(StubBackend::new(Behaviour::Succeed))
        .oneshot(upload(&[
            ("quality", None, b"high"),
            ("file", Some("report.docx"), b"PK"),
        ]))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn non_multipart_body_is_bad_request() {
    let req = Request::builder()
        .method(Method::POST)
        .uri("/convert")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let resp = app(StubBackend::new(Behaviour::Succeed)).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(resp).await["error"].is_string());
}

#[tokio::test]
async fn oversized_upload_is_bad_request() {
    let big = vec![b'x'; 20 * 1024];
    let resp = app(StubBackend::new(Behaviour::Succeed))
        .oneshot(upload(&[("file", Some("big.docx"), &big)]))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = json_body(resp).await;
    assert!(
        json["error"].as_str().unwrap().contains("maximum upload size"),
        "got: {json}"
    );
}

#[tokio::test]
async fn submission_failure_is_bad_gateway_with_detail() {
    let resp = app(StubBackend::new(Behaviour::RejectSubmit))
        .oneshot(upload(&[("file", Some("report.docx"), b"PK")]))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let json = json_body(resp).await;
    assert_eq!(json["error"], "Conversion failed");
    assert!(json["detail"].as_str().unwrap().contains("422"));
}

#[tokio::test]
async fn converter_failure_is_server_error_with_stderr() {
    let resp = app(StubBackend::new(Behaviour::CrashConverter))
        .oneshot(upload(&[("file", Some("report.docx"), b"PK")]))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(resp).await;
    assert!(json["detail"]
        .as_str()
        .unwrap()
        .contains("source file could not be loaded"));
}

#[tokio::test]
async fn success_without_artifact_is_result_unavailable() {
    let resp = app(StubBackend::new(Behaviour::NoOutput))
        .oneshot(upload(&[("file", Some("report.docx"), b"PK")]))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(resp).await["error"], "Exported file not found");
}

#[tokio::test]
async fn other_verbs_are_method_not_allowed() {
    for method in [Method::GET, Method::PUT, Method::DELETE] {
        let req = Request::builder()
            .method(method.clone())
            .uri("/convert")
            .body(Body::empty())
            .unwrap();
        let resp = app(StubBackend::new(Behaviour::Succeed)).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED, "{method}");
        assert_eq!(json_body(resp).await["error"], "Method not allowed");
    }
}

// ── CORS ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn plain_options_returns_no_content_with_cors_headers() {
    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/convert")
        .body(Body::empty())
        .unwrap();
    let resp = app(StubBackend::new(Behaviour::Succeed)).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let h = resp.headers();
    assert_eq!(h[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:3000");
    assert_eq!(h[header::ACCESS_CONTROL_ALLOW_METHODS], "POST, OPTIONS");
    assert_eq!(h[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
}

#[tokio::test]
async fn browser_preflight_allows_only_post_and_options() {
    for uri in ["/convert", "/snapshot"] {
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri(uri)
            .header(header::ORIGIN, "http://localhost:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();
        let resp = app(StubBackend::new(Behaviour::Succeed)).oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::NO_CONTENT, "{uri}");
        let h = resp.headers();
        assert_eq!(h[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:3000");
        assert_eq!(h[header::ACCESS_CONTROL_ALLOW_METHODS], "POST, OPTIONS");
        assert_eq!(h[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
    }
}

#[tokio::test]
async fn preview_preflight_allows_only_get() {
    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/preview?name=a.pdf")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .body(Body::empty())
        .unwrap();
    let resp = app(StubBackend::new(Behaviour::Succeed)).oneshot(req).await.unwrap();

    assert!(resp.status().is_success());
    let h = resp.headers();
    assert_eq!(h[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:3000");
    assert_eq!(h[header::ACCESS_CONTROL_ALLOW_METHODS], "GET");
}

#[tokio::test]
async fn cors_origin_is_echoed_on_conversion() {
    let mut req = upload(&[("file", Some("report.docx"), b"PK")]);
    req.headers_mut()
        .insert(header::ORIGIN, "http://localhost:3000".parse().unwrap());
    let resp = app(StubBackend::new(Behaviour::Succeed)).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:3000"
    );
}

// ── Other routes ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_ok() {
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app(StubBackend::new(Behaviour::Succeed)).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await, b"OK");
}

#[tokio::test]
async fn preview_serves_stored_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"hello preview").unwrap();
    let config = ServiceConfig::builder().preview_dir(dir.path()).build().unwrap();
    let app = app_with(config, StubBackend::new(Behaviour::Succeed));

    let req = Request::builder()
        .uri("/preview?name=notes.txt")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(body_bytes(resp).await, b"hello preview");

    let req = Request::builder()
        .uri("/preview?name=missing.pdf")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(resp).await["error"], "File not found");

    let req = Request::builder()
        .uri("/preview?name=..%2Fsecret.txt")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["error"], "Invalid filename");
}

#[tokio::test]
async fn preview_accepts_double_dots_inside_a_name() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("v1..2.pdf"), b"%PDF-1.4 v1..2").unwrap();
    let config = ServiceConfig::builder().preview_dir(dir.path()).build().unwrap();
    let app = app_with(config, StubBackend::new(Behaviour::Succeed));

    let req = Request::builder()
        .uri("/preview?name=v1..2.pdf")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(body_bytes(resp).await, b"%PDF-1.4 v1..2");

    let req = Request::builder()
        .uri("/preview?name=..")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["error"], "Invalid filename");
}

#[tokio::test]
async fn preview_without_name_is_bad_request() {
    let req = Request::builder().uri("/preview").body(Body::empty()).unwrap();
    let resp = app(StubBackend::new(Behaviour::Succeed)).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["error"], "Invalid filename");
}

#[tokio::test]
async fn snapshot_requires_target_url() {
    let req = Request::builder()
        .method(Method::POST)
        .uri("/snapshot")
        .body(Body::empty())
        .unwrap();
    let resp = app(StubBackend::new(Behaviour::Succeed)).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = json_body(resp).await;
    assert!(json["error"].as_str().unwrap().contains("urlToConvert"));
}

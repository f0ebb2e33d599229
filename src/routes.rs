//! Route handlers.

use crate::document::content_type_for;
use crate::error::ConvertError;
use crate::pipeline::{respond::respond, upload};
use crate::server::AppState;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// `GET /health`
pub async fn health() -> &'static str {
    "OK"
}

/// `POST /convert`: multipart upload in, PDF out.
pub async fn convert(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let multipart = match multipart {
        Ok(m) => m,
        Err(rejection) => return multipart_rejection(rejection, &state).into_response(),
    };

    let doc = match upload::receive(multipart, &state.limits).await {
        Ok(doc) => doc,
        Err(e) => return e.into_response(),
    };

    let outcome = state.orchestrator.run(&doc, &state.cancel_signal()).await;
    respond(outcome.into_result(), doc)
}

fn multipart_rejection(rejection: MultipartRejection, state: &AppState) -> ConvertError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ConvertError::FileTooLarge {
            limit: state.limits.max_bytes,
        };
    }
    ConvertError::MalformedUpload {
        detail: rejection.body_text(),
    }
}

/// Answer `OPTIONS` on the upload routes, plain or CORS preflight, with
/// `204` and the three CORS headers. Every other request passes through.
pub async fn answer_options(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if *request.method() != Method::OPTIONS {
        return next.run(request).await;
    }
    let origin = HeaderValue::from_str(&state.config.cors_origin)
        .unwrap_or_else(|_| HeaderValue::from_static("null"));
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, origin),
            (
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("POST, OPTIONS"),
            ),
            (
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("Content-Type"),
            ),
        ],
    )
        .into_response()
}

/// Any verb a route does not handle.
pub async fn method_not_allowed() -> ConvertError {
    ConvertError::MethodNotAllowed
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub name: Option<String>,
}

/// A preview name must be a bare file name inside the preview directory.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// `GET /preview?name=<file>`: raw bytes of a previously stored upload.
pub async fn preview(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PreviewQuery>,
) -> Result<Response, ConvertError> {
    let name = query
        .name
        .filter(|n| is_safe_name(n))
        .ok_or(ConvertError::InvalidFilename)?;

    let path = state.config.preview_dir.join(&name);
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        debug!("Preview of {} failed: {}", path.display(), e);
        ConvertError::NotFound { name: name.clone() }
    })?;

    Ok((
        [(header::CONTENT_TYPE, content_type_for(&name))],
        bytes,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    #[serde(rename = "urlToConvert")]
    pub url_to_convert: Option<String>,
}

/// `POST /snapshot?urlToConvert=<url>`: screenshot a web page as PDF.
pub async fn snapshot(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Response, ConvertError> {
    let target = query
        .url_to_convert
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ConvertError::InvalidParameter {
            name: "urlToConvert".to_string(),
        })?;
    state.snapshot.capture(target.trim()).await
}

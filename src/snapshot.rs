//! URL-to-PDF snapshots through a screenshot service.
//!
//! Unlike document conversion there is no upload: the service fetches the
//! page itself and the rendered PDF is streamed straight through to the
//! caller without being buffered.

use crate::document::{attachment_disposition, PDF_MIME};
use crate::error::ConvertError;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use futures::TryStreamExt;
use tracing::{info, warn};

/// Download name for every snapshot.
pub const SNAPSHOT_FILENAME: &str = "snapshot.pdf";

const BACKEND: &str = "snapshot";

/// Check if the input string looks like an absolute http(s) URL.
pub fn is_url(input: &str) -> bool {
    match reqwest::Url::parse(input) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Client for the screenshot service.
#[derive(Clone)]
pub struct SnapshotClient {
    http: reqwest::Client,
    base_url: String,
    access_key: Option<String>,
}

impl std::fmt::Debug for SnapshotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotClient")
            .field("base_url", &self.base_url)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl SnapshotClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, access_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            access_key: access_key.filter(|k| !k.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.access_key.is_some()
    }

    /// Render `target` and return a streaming PDF attachment response.
    pub async fn capture(&self, target: &str) -> Result<Response, ConvertError> {
        if !is_url(target) {
            return Err(ConvertError::InvalidParameter {
                name: "urlToConvert".to_string(),
            });
        }
        let key = self
            .access_key
            .as_deref()
            .ok_or_else(|| ConvertError::BackendUnavailable {
                path: BACKEND.into(),
                detail: "no snapshot access key configured".to_string(),
            })?;

        info!("Capturing snapshot of {}", target);
        let upstream = self
            .http
            .get(&self.base_url)
            .query(&[("access_key", key), ("url", target), ("format", "pdf")])
            .send()
            .await
            .map_err(|e| ConvertError::Submission {
                backend: BACKEND.to_string(),
                detail: e.without_url().to_string(),
            })?;

        let status = upstream.status();
        if !status.is_success() {
            let text = upstream.text().await.unwrap_or_default();
            return Err(ConvertError::Submission {
                backend: BACKEND.to_string(),
                detail: format!("HTTP {status}: {}", text.trim()),
            });
        }

        let length = upstream.content_length();
        let stream = upstream
            .bytes_stream()
            .inspect_err(|e| warn!("Snapshot stream interrupted: {}", e));

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = StatusCode::OK;
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(PDF_MIME));
        if let Ok(value) = HeaderValue::from_str(&attachment_disposition(SNAPSHOT_FILENAME)) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        if let Some(len) = length {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        }
        Ok(response)
    }
}

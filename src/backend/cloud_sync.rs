//! Synchronous cloud backend: one request uploads, converts and answers.
//!
//! `POST {base}/convert/{ext}/to/pdf?StoreFile=false` with a multipart `File`
//! part. The provider blocks until conversion finishes and replies with
//! `Files[0]`, carrying either inline base64 `FileData` or a download `Url`.
//! Submit, poll and fetch therefore collapse into a single round trip; the
//! handle is ready as soon as submit returns.

use super::{download, rejection, require_locator, ConversionBackend};
use crate::config::BackendKind;
use crate::document::{pdf_filename, ConversionResult, UploadedDocument};
use crate::error::ConvertError;
use crate::job::{JobHandle, JobStatus, ResultLocator};
use async_trait::async_trait;
use axum::body::Bytes;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info, warn};

const KIND: BackendKind = BackendKind::Synchronous;

/// Backend for a blocking conversion API.
#[derive(Debug, Clone)]
pub struct CloudSyncBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SyncResponse {
    #[serde(default)]
    conversion_id: Option<String>,
    #[serde(default)]
    files: Vec<SyncFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SyncFile {
    #[serde(default)]
    file_data: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl SyncFile {
    fn locator(&self) -> Result<Option<ResultLocator>, base64::DecodeError> {
        if let Some(data) = self.file_data.as_deref().filter(|d| !d.is_empty()) {
            return Ok(Some(ResultLocator::Inline(Bytes::from(BASE64.decode(data)?))));
        }
        Ok(self.url.clone().filter(|u| !u.is_empty()).map(ResultLocator::Url))
    }
}

impl CloudSyncBackend {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn convert_url(&self, ext: &str) -> String {
        format!("{}/convert/{}/to/pdf", self.base_url, ext)
    }
}

#[async_trait]
impl ConversionBackend for CloudSyncBackend {
    fn kind(&self) -> BackendKind {
        KIND
    }

    async fn submit(&self, doc: &UploadedDocument) -> Result<JobHandle, ConvertError> {
        let ext = doc.extension().unwrap_or_else(|| "docx".to_string());
        let bytes = doc.read_bytes().await?;
        let form = Form::new().part(
            "File",
            Part::bytes(bytes.to_vec()).file_name(doc.filename.clone()),
        );

        // Stands in for the provider's conversion id until it answers.
        let request_id = uuid::Uuid::new_v4().to_string();
        let start = Instant::now();
        let response = self
            .http
            .post(self.convert_url(&ext))
            .query(&[("StoreFile", "false")])
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ConvertError::Timeout {
                        job_id: request_id.clone(),
                        attempts: 1,
                        waited_ms: start.elapsed().as_millis() as u64,
                    }
                } else {
                    ConvertError::Submission {
                        backend: KIND.to_string(),
                        detail: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(rejection(KIND, status, &text));
        }

        let parsed: SyncResponse = response.json().await.map_err(|e| ConvertError::Submission {
            backend: KIND.to_string(),
            detail: format!("unreadable conversion response: {e}"),
        })?;

        let id = parsed.conversion_id.clone().unwrap_or(request_id);

        // The first returned file is authoritative.
        let locator = match parsed.files.first().map(SyncFile::locator) {
            Some(Ok(locator)) => locator,
            Some(Err(e)) => {
                warn!("Conversion {}: undecodable inline file data: {}", id, e);
                None
            }
            None => None,
        };

        info!(
            "Conversion {} for '{}' answered in {}ms",
            id,
            doc.filename,
            start.elapsed().as_millis()
        );
        debug!("Conversion {} locator: {:?}", id, locator);

        Ok(JobHandle::ready(id, KIND, doc.filename.clone(), locator))
    }

    async fn poll(&self, _handle: &mut JobHandle) -> Result<JobStatus, ConvertError> {
        Ok(JobStatus::Done)
    }

    async fn fetch(&self, handle: &JobHandle) -> Result<ConversionResult, ConvertError> {
        let bytes = match require_locator(handle)? {
            ResultLocator::Inline(bytes) => bytes.clone(),
            ResultLocator::Url(url) => download(&self.http, KIND, handle.id(), url).await?,
            ResultLocator::File(_) => {
                return Err(ConvertError::ResultUnavailable {
                    job_id: handle.id().to_string(),
                    detail: "unexpected local result for a cloud conversion".to_string(),
                })
            }
        };
        Ok(ConversionResult::new(bytes, pdf_filename(handle.source_name())))
    }
}

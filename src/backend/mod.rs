//! Conversion backends.
//!
//! Every strategy for turning an office document into a PDF sits behind the
//! [`ConversionBackend`] trait, so the orchestrator drives all of them with
//! one submit → poll → fetch loop:
//!
//! | Backend | submit | poll | fetch |
//! |---------|--------|------|-------|
//! | [`cloud_job::CloudJobBackend`]   | create job, upload file | job status | download export URL |
//! | [`cloud_sync::CloudSyncBackend`] | one blocking upload + convert | always `Done` | decode inline / download URL |
//! | [`local::LocalProcessBackend`]   | run converter to exit | always `Done` | read output file |
//!
//! Backends are built once at startup by [`build_backend`] and shared across
//! requests; they hold no per-request state. Everything request-scoped lives
//! on the [`JobHandle`] they return.

pub mod cloud_job;
pub mod cloud_sync;
pub mod local;

use crate::config::{BackendKind, ServiceConfig};
use crate::document::{ConversionResult, UploadedDocument};
use crate::error::ConvertError;
use crate::job::{JobHandle, JobStatus, ResultLocator};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// A uniform conversion capability.
#[async_trait]
pub trait ConversionBackend: Send + Sync {
    /// Which strategy this backend implements.
    fn kind(&self) -> BackendKind;

    /// Begin converting `doc`.
    ///
    /// Asynchronous backends return as soon as the provider holds the bytes;
    /// synchronous ones return a handle that is already
    /// [`ready`](JobHandle::is_ready).
    async fn submit(&self, doc: &UploadedDocument) -> Result<JobHandle, ConvertError>;

    /// Check job status once, without waiting.
    ///
    /// On `Done` the backend records the result location on `handle`.
    async fn poll(&self, handle: &mut JobHandle) -> Result<JobStatus, ConvertError>;

    /// Retrieve the finished PDF. Fails with
    /// [`ConvertError::ResultUnavailable`] unless the handle is ready and
    /// carries a result location.
    async fn fetch(&self, handle: &JobHandle) -> Result<ConversionResult, ConvertError>;

    /// Release provider-side state for a job that will not be fetched.
    /// Best effort; the default does nothing.
    async fn abandon(&self, handle: &JobHandle) {
        let _ = handle;
    }
}

/// Build the backend selected by `config.backend`.
///
/// `http` is the process-wide HTTP client shared by the cloud backends.
pub fn build_backend(
    config: &ServiceConfig,
    http: reqwest::Client,
) -> Result<Arc<dyn ConversionBackend>, ConvertError> {
    let api_key = || {
        config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ConvertError::InvalidConfig(format!(
                    "the {} backend requires an API key",
                    config.backend
                ))
            })
    };

    debug!("Building {} backend", config.backend);
    let backend: Arc<dyn ConversionBackend> = match config.backend {
        BackendKind::JobBased => Arc::new(cloud_job::CloudJobBackend::new(
            http,
            &config.job_api_base,
            api_key()?,
        )),
        BackendKind::Synchronous => Arc::new(cloud_sync::CloudSyncBackend::new(
            http,
            &config.sync_api_base,
            api_key()?,
        )),
        BackendKind::LocalProcess => Arc::new(local::LocalProcessBackend::new(
            &config.converter_path,
            config.converter_timeout(),
        )),
    };
    Ok(backend)
}

/// Shared `fetch` guard: the handle must be ready and carry a locator.
pub(crate) fn require_locator(handle: &JobHandle) -> Result<&ResultLocator, ConvertError> {
    if !handle.is_ready() {
        return Err(ConvertError::ResultUnavailable {
            job_id: handle.id().to_string(),
            detail: "job has not reported completion".to_string(),
        });
    }
    handle.locator().ok_or_else(|| ConvertError::ResultUnavailable {
        job_id: handle.id().to_string(),
        detail: "provider reported success without an output file".to_string(),
    })
}

/// Download a provider-issued result URL.
pub(crate) async fn download(
    http: &reqwest::Client,
    backend: BackendKind,
    job_id: &str,
    url: &str,
) -> Result<axum::body::Bytes, ConvertError> {
    let transport = |detail: String| ConvertError::Transport {
        backend: backend.to_string(),
        detail,
    };

    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| transport(e.to_string()))?;

    if !response.status().is_success() {
        return Err(ConvertError::ResultUnavailable {
            job_id: job_id.to_string(),
            detail: format!("download returned HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(|e| transport(e.to_string()))?;
    if bytes.is_empty() {
        return Err(ConvertError::ResultUnavailable {
            job_id: job_id.to_string(),
            detail: "downloaded file is empty".to_string(),
        });
    }
    Ok(bytes)
}

/// Classify a non-success provider response.
pub(crate) fn rejection(backend: BackendKind, status: reqwest::StatusCode, body: &str) -> ConvertError {
    let detail = if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", body.trim())
    };
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        ConvertError::AuthFailed {
            backend: backend.to_string(),
            detail,
        }
    } else {
        ConvertError::Submission {
            backend: backend.to_string(),
            detail,
        }
    }
}

//! Error types for the doc2pdf library.
//!
//! Every failure a conversion can hit is a variant of [`ConvertError`], from
//! a malformed upload to a converter binary that is not installed. Variants
//! carry structured context (job id, backend, exit code) so the orchestrator
//! can log them precisely.
//!
//! Callers that only care about the *category* of failure use
//! [`ConvertError::kind`], which collapses the variants into the small
//! [`ErrorKind`] taxonomy the HTTP layer maps onto status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Longest upstream detail string forwarded to an HTTP caller.
const MAX_DETAIL_LEN: usize = 500;

/// All errors returned by the doc2pdf library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Upload errors ─────────────────────────────────────────────────────
    /// The multipart body had no `file` field.
    #[error("No file uploaded: expected a multipart field named 'file'")]
    MissingFile,

    /// The request body could not be parsed as `multipart/form-data`.
    #[error("Malformed upload: {detail}")]
    MalformedUpload { detail: String },

    /// The uploaded file exceeds the configured size ceiling.
    #[error("File exceeds the maximum upload size of {limit} bytes")]
    FileTooLarge { limit: u64 },

    /// File extension / MIME type is not on the allow-list.
    #[error("Unsupported file type '{extension}'. Allowed: {allowed}")]
    UnsupportedFormat { extension: String, allowed: String },

    /// A query parameter was missing or not usable.
    #[error("Missing or invalid parameter '{name}'")]
    InvalidParameter { name: String },

    /// A requested file name is empty or escapes its directory.
    #[error("Invalid filename")]
    InvalidFilename,

    /// The HTTP verb is not accepted on this route.
    #[error("Method not allowed")]
    MethodNotAllowed,

    // ── Provider errors ───────────────────────────────────────────────────
    /// The provider rejected our credentials (401/403).
    #[error("Authentication rejected by {backend}: {detail}")]
    AuthFailed { backend: String, detail: String },

    /// The provider could not accept the document (network failure, 4xx).
    #[error("Submission to {backend} failed: {detail}")]
    Submission { backend: String, detail: String },

    /// A status or download round trip failed after submission.
    ///
    /// Transient while polling: it consumes a poll attempt rather than
    /// aborting the conversion.
    #[error("Request to {backend} failed: {detail}")]
    Transport { backend: String, detail: String },

    /// The provider reported the job as failed.
    #[error("Conversion job {job_id} failed: {detail}")]
    JobFailed { job_id: String, detail: String },

    /// The poll budget ran out before the job reached a terminal state.
    #[error("Conversion job {job_id} did not finish after {attempts} status checks ({waited_ms}ms)")]
    Timeout {
        job_id: String,
        attempts: u32,
        waited_ms: u64,
    },

    // ── Local converter errors ────────────────────────────────────────────
    /// The converter executable could not be started.
    #[error("Converter '{path}' is not available: {detail}")]
    BackendUnavailable { path: PathBuf, detail: String },

    /// The converter exited with a non-zero status.
    #[error("Converter exited with status {code:?}: {stderr}")]
    ProcessFailed { code: Option<i32>, stderr: String },

    /// The converter was still running when its timeout expired.
    #[error("Converter did not exit within {secs}s")]
    ProcessTimeout { secs: u64 },

    // ── Result errors ─────────────────────────────────────────────────────
    /// The job reported success but no artifact could be retrieved.
    #[error("Conversion job {job_id} produced no retrievable result: {detail}")]
    ResultUnavailable { job_id: String, detail: String },

    /// The conversion was aborted by a cancellation signal.
    #[error("Conversion job {job_id} was cancelled")]
    Cancelled { job_id: String },

    /// A file requested for preview does not exist.
    #[error("File not found: '{name}'")]
    NotFound { name: String },

    // ── Internal errors ───────────────────────────────────────────────────
    /// File-system failure on temporary storage.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure categories exposed to HTTP callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    BadRequest,
    MethodNotAllowed,
    Submission,
    Timeout,
    BackendExecution,
    BackendUnavailable,
    ResultUnavailable,
    NotFound,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// HTTP status for this category.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::Submission => StatusCode::BAD_GATEWAY,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::BackendExecution
            | ErrorKind::BackendUnavailable
            | ErrorKind::ResultUnavailable
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl ConvertError {
    /// Build an [`ConvertError::Io`] with a short description of the operation.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ConvertError::Io {
            context: context.into(),
            source,
        }
    }

    /// Collapse this error into its [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::MissingFile
            | ConvertError::MalformedUpload { .. }
            | ConvertError::FileTooLarge { .. }
            | ConvertError::UnsupportedFormat { .. }
            | ConvertError::InvalidParameter { .. }
            | ConvertError::InvalidFilename => ErrorKind::BadRequest,
            ConvertError::MethodNotAllowed => ErrorKind::MethodNotAllowed,
            ConvertError::AuthFailed { .. }
            | ConvertError::Submission { .. }
            | ConvertError::Transport { .. } => ErrorKind::Submission,
            ConvertError::Timeout { .. } | ConvertError::ProcessTimeout { .. } => {
                ErrorKind::Timeout
            }
            ConvertError::JobFailed { .. } | ConvertError::ProcessFailed { .. } => {
                ErrorKind::BackendExecution
            }
            ConvertError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            ConvertError::ResultUnavailable { .. } => ErrorKind::ResultUnavailable,
            ConvertError::Cancelled { .. } => ErrorKind::Cancelled,
            ConvertError::NotFound { .. } => ErrorKind::NotFound,
            ConvertError::Io { .. } | ConvertError::InvalidConfig(_) => ErrorKind::Internal,
        }
    }

    /// Whether a status check that failed this way may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, ConvertError::Transport { .. })
    }

    /// Message shown to HTTP callers in the `error` field.
    pub fn public_message(&self) -> String {
        match self {
            ConvertError::MissingFile => "File upload failed".to_string(),
            ConvertError::FileTooLarge { .. }
            | ConvertError::UnsupportedFormat { .. }
            | ConvertError::InvalidParameter { .. }
            | ConvertError::InvalidFilename
            | ConvertError::MalformedUpload { .. } => self.to_string(),
            ConvertError::MethodNotAllowed => "Method not allowed".to_string(),
            ConvertError::NotFound { .. } => "File not found".to_string(),
            ConvertError::Timeout { .. } | ConvertError::ProcessTimeout { .. } => {
                "Conversion timed out".to_string()
            }
            ConvertError::BackendUnavailable { .. } => "Converter unavailable".to_string(),
            ConvertError::ResultUnavailable { .. } => "Exported file not found".to_string(),
            ConvertError::Cancelled { .. } => "Conversion cancelled".to_string(),
            ConvertError::Io { .. } | ConvertError::InvalidConfig(_) => {
                "Internal error".to_string()
            }
            ConvertError::AuthFailed { .. }
            | ConvertError::Submission { .. }
            | ConvertError::Transport { .. }
            | ConvertError::JobFailed { .. }
            | ConvertError::ProcessFailed { .. } => "Conversion failed".to_string(),
        }
    }

    /// Upstream detail safe to forward to the caller, if any.
    ///
    /// Internal errors (I/O, configuration) never expose their detail.
    pub fn public_detail(&self) -> Option<String> {
        let detail = match self {
            ConvertError::AuthFailed { detail, .. }
            | ConvertError::Submission { detail, .. }
            | ConvertError::Transport { detail, .. }
            | ConvertError::JobFailed { detail, .. }
            | ConvertError::ResultUnavailable { detail, .. } => detail.clone(),
            ConvertError::ProcessFailed { .. }
            | ConvertError::ProcessTimeout { .. }
            | ConvertError::Timeout { .. } => self.to_string(),
            _ => return None,
        };
        Some(truncate(&detail, MAX_DETAIL_LEN))
    }
}

/// JSON body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl IntoResponse for ConvertError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        if kind == ErrorKind::Internal {
            tracing::error!("Internal error: {}", self);
        }

        let body = ErrorBody {
            error: self.public_message(),
            detail: self.public_detail(),
        };

        (kind.status(), Json(body)).into_response()
    }
}

fn truncate(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\u{2026}", &s[..end])
}

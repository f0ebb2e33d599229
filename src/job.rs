//! Conversion job bookkeeping.
//!
//! A [`ConversionJob`] records what the orchestrator knows about one
//! conversion: which backend runs it, how far it got, and where the result
//! lives. State only moves forward:
//!
//! ```text
//! Created ──▶ Uploading ──▶ Processing ──▶ Succeeded
//!    │            │             │
//!    └────────────┴─────────────┴───────▶ Failed
//! ```
//!
//! Once a job is terminal its state, result locator and error are frozen.
//!
//! A [`JobHandle`] is the backend-side counterpart: an opaque token the
//! backend issues on submit and receives back on poll and fetch.

use crate::config::BackendKind;
use crate::error::{ConvertError, ErrorKind};
use axum::body::Bytes;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tempfile::TempDir;

/// Lifecycle of a [`ConversionJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JobState {
    Created,
    Uploading,
    Processing,
    Succeeded,
    Failed,
}

impl JobState {
    fn rank(self) -> u8 {
        match self {
            JobState::Created => 0,
            JobState::Uploading => 1,
            JobState::Processing => 2,
            JobState::Succeeded | JobState::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Where a finished conversion's bytes can be retrieved from.
#[derive(Clone, PartialEq, Eq)]
pub enum ResultLocator {
    /// Download URL issued by the provider.
    Url(String),
    /// Bytes already in hand (inline provider response).
    Inline(Bytes),
    /// File written by the local converter.
    File(PathBuf),
}

impl fmt::Debug for ResultLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultLocator::Url(url) => f.debug_tuple("Url").field(url).finish(),
            ResultLocator::Inline(bytes) => write!(f, "Inline({} bytes)", bytes.len()),
            ResultLocator::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// Summary of why a job failed, kept on the job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ConvertError> for JobError {
    fn from(err: &ConvertError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Attempted a backward or post-terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid job transition {from:?} → {to:?}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// Request-scoped record of one conversion.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    id: String,
    backend: BackendKind,
    state: JobState,
    result_locator: Option<ResultLocator>,
    error: Option<JobError>,
}

impl ConversionJob {
    pub fn new(id: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            id: id.into(),
            backend,
            state: JobState::Created,
            result_locator: None,
            error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn result_locator(&self) -> Option<&ResultLocator> {
        self.result_locator.as_ref()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    /// Re-key the job once the backend has issued its own id.
    pub(crate) fn assign_id(&mut self, id: impl Into<String>) {
        if !self.state.is_terminal() {
            self.id = id.into();
        }
    }

    /// Move to a non-terminal state further along the lifecycle.
    pub fn advance(&mut self, to: JobState) -> Result<(), InvalidTransition> {
        if to.is_terminal() || to.rank() <= self.state.rank() {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Mark the job as succeeded with its (possibly absent) result location.
    pub fn succeed(&mut self, locator: Option<ResultLocator>) -> Result<(), InvalidTransition> {
        self.finish(JobState::Succeeded)?;
        self.result_locator = locator;
        Ok(())
    }

    /// Mark the job as failed.
    pub fn fail(&mut self, error: JobError) -> Result<(), InvalidTransition> {
        self.finish(JobState::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    fn finish(&mut self, to: JobState) -> Result<(), InvalidTransition> {
        if self.state.is_terminal() {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

/// Status reported by [`crate::backend::ConversionBackend::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Done,
    Failed(String),
}

/// Opaque reference to backend-side conversion state.
///
/// Owned exclusively by the orchestrator for one request. Dropping the
/// handle releases anything the backend attached to it, such as the local
/// converter's working directory.
#[derive(Debug)]
pub struct JobHandle {
    id: String,
    backend: BackendKind,
    source_name: String,
    locator: Option<ResultLocator>,
    ready: bool,
    workdir: Option<TempDir>,
}

impl JobHandle {
    /// Handle for a job the provider is still working on.
    pub fn pending(id: impl Into<String>, backend: BackendKind, source_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            backend,
            source_name: source_name.into(),
            locator: None,
            ready: false,
            workdir: None,
        }
    }

    /// Handle for a job that finished during submit.
    pub fn ready(
        id: impl Into<String>,
        backend: BackendKind,
        source_name: impl Into<String>,
        locator: Option<ResultLocator>,
    ) -> Self {
        Self {
            id: id.into(),
            backend,
            source_name: source_name.into(),
            locator,
            ready: true,
            workdir: None,
        }
    }

    /// Keep `dir` alive for as long as the handle exists.
    pub fn with_workdir(mut self, dir: TempDir) -> Self {
        self.workdir = Some(dir);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// File name of the document this job converts.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// `true` once the result location is settled (or known to be absent).
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn locator(&self) -> Option<&ResultLocator> {
        self.locator.as_ref()
    }

    /// Record the terminal result location observed while polling.
    pub fn mark_ready(&mut self, locator: Option<ResultLocator>) {
        if !self.ready {
            self.locator = locator;
            self.ready = true;
        }
    }

    /// Temporary working directory attached to this handle, if any.
    pub fn workdir(&self) -> Option<&std::path::Path> {
        self.workdir.as_ref().map(TempDir::path)
    }
}

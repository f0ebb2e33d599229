//! Conversion orchestrator: drives one backend through submit → poll → fetch.
//!
//! ## Stages
//!
//! ```text
//! Submitting ──▶ Polling ──▶ Fetching ──▶ Done
//!      │  └──────(ready)────────▲
//!      └────────────┴─────────────┴──────▶ Failed
//! ```
//!
//! Synchronous backends return a handle that is already ready, so the
//! orchestrator skips straight from `Submitting` to `Fetching`.
//!
//! ## Polling
//!
//! Status checks are strictly sequential and bounded by the [`PollPolicy`]:
//! at most `max_attempts` calls to `poll`, with `delay_for(attempt)` between
//! them. Running out of attempts fails with [`ConvertError::Timeout`] and no
//! further status checks are made. A transport error on a status check uses
//! up an attempt; any other poll error ends the conversion.
//!
//! ## Cancellation
//!
//! Every backend call and every sleep is raced against a [`CancelSignal`],
//! and the signal is also checked before each sleep. When a job is
//! abandoned (cancelled or timed out) the backend is asked to release it via
//! [`ConversionBackend::abandon`]. Temporary files and child processes are
//! owned by the document and the [`JobHandle`], so they are released on every
//! exit path when those values drop.

use crate::backend::ConversionBackend;
use crate::config::{BackendKind, PollPolicy};
use crate::document::{ConversionResult, UploadedDocument};
use crate::error::{ConvertError, ErrorKind};
use crate::job::{ConversionJob, JobError, JobHandle, JobState, JobStatus};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

// ── Cancellation ─────────────────────────────────────────────────────────

/// Owner side of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// A signal that fires when [`cancel`](Self::cancel) is called.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: Some(self.tx.subscribe()),
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiver side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve once cancellation is requested. Never resolves if the owning
    /// [`CancelHandle`] is dropped without cancelling.
    pub async fn cancelled(&self) {
        if let Some(rx) = &self.rx {
            let mut rx = rx.clone();
            if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

// ── Outcome ──────────────────────────────────────────────────────────────

/// Orchestrator stage. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Submitting,
    Polling,
    Fetching,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

/// Terminal result of one orchestrated conversion.
#[derive(Debug)]
pub struct ConversionOutcome {
    /// Record of the job as the orchestrator left it.
    pub job: ConversionJob,
    /// [`Stage::Done`] or [`Stage::Failed`].
    pub stage: Stage,
    /// Stage in which the conversion failed, if it did.
    pub failed_during: Option<Stage>,
    /// Number of status checks issued.
    pub polls: u32,
    pub result: Result<ConversionResult, ConvertError>,
}

impl ConversionOutcome {
    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    pub fn into_result(self) -> Result<ConversionResult, ConvertError> {
        self.result
    }
}

/// Mutable per-run bookkeeping threaded through the stages.
struct Run {
    job: ConversionJob,
    stage: Stage,
    polls: u32,
}

impl Run {
    fn advance(&mut self, to: JobState) {
        if let Err(e) = self.job.advance(to) {
            debug!("Job {}: {}", self.job.id(), e);
        }
    }
}

// ── Orchestrator ─────────────────────────────────────────────────────────

/// Drives conversions through a single shared backend.
///
/// Built once at startup and shared by every request; holds no per-request
/// state.
pub struct Orchestrator {
    backend: Arc<dyn ConversionBackend>,
    policy: PollPolicy,
    allowed_extensions: Vec<String>,
    progress: ProgressCallback,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn ConversionBackend>,
        policy: PollPolicy,
        allowed_extensions: Vec<String>,
    ) -> Self {
        Self {
            backend,
            policy,
            allowed_extensions,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Attach a progress observer.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Convert `doc`, returning only the result.
    pub async fn convert(
        &self,
        doc: &UploadedDocument,
        cancel: &CancelSignal,
    ) -> Result<ConversionResult, ConvertError> {
        self.run(doc, cancel).await.into_result()
    }

    /// Convert `doc` and report how the job ended.
    ///
    /// The source document is only read, never modified.
    pub async fn run(&self, doc: &UploadedDocument, cancel: &CancelSignal) -> ConversionOutcome {
        let kind = self.backend.kind();
        let start = Instant::now();
        let mut run = Run {
            job: ConversionJob::new(uuid::Uuid::new_v4().to_string(), kind),
            stage: Stage::Submitting,
            polls: 0,
        };

        let result = self.drive(doc, cancel, &mut run).await;
        let elapsed_ms = start.elapsed().as_millis();

        match &result {
            Ok(pdf) => {
                info!(
                    "Job {} ({}): '{}' → '{}' ({} bytes, {} polls, {}ms)",
                    run.job.id(),
                    kind,
                    doc.filename,
                    pdf.suggested_filename,
                    pdf.pdf_bytes.len(),
                    run.polls,
                    elapsed_ms
                );
                self.progress.on_complete(run.job.id(), pdf.pdf_bytes.len());
            }
            Err(e) => {
                // A job already marked succeeded keeps that state; only the
                // outcome records the fetch failure.
                if let Err(t) = run.job.fail(JobError::from(e)) {
                    debug!("Job {}: {}", run.job.id(), t);
                }
                match e.kind() {
                    ErrorKind::BadRequest => {
                        debug!("Job {} ({}): rejected: {}", run.job.id(), kind, e)
                    }
                    ErrorKind::Internal => error!(
                        "Job {} ({}): failed during {:?} after {}ms: {}",
                        run.job.id(),
                        kind,
                        run.stage,
                        elapsed_ms,
                        e
                    ),
                    _ => warn!(
                        "Job {} ({}): failed during {:?} after {}ms: {}",
                        run.job.id(),
                        kind,
                        run.stage,
                        elapsed_ms,
                        e
                    ),
                }
                self.progress.on_failed(run.job.id(), e);
            }
        }

        let (stage, failed_during) = match &result {
            Ok(_) => (Stage::Done, None),
            Err(_) => (Stage::Failed, Some(run.stage)),
        };
        ConversionOutcome {
            job: run.job,
            stage,
            failed_during,
            polls: run.polls,
            result,
        }
    }

    async fn drive(
        &self,
        doc: &UploadedDocument,
        cancel: &CancelSignal,
        run: &mut Run,
    ) -> Result<ConversionResult, ConvertError> {
        // Unsupported input never reaches the backend.
        doc.validate_extension(&self.allowed_extensions)?;

        // ── Submitting ──
        run.stage = Stage::Submitting;
        run.advance(JobState::Uploading);
        if cancel.is_cancelled() {
            return Err(cancelled(run.job.id()));
        }
        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(run.job.id())),
            r = self.backend.submit(doc) => r,
        };
        let mut handle = submitted?;
        run.job.assign_id(handle.id());
        run.advance(JobState::Processing);
        self.progress.on_submitted(handle.id(), handle.backend());
        debug!(
            "Job {} ({}): submitted '{}' ({} bytes)",
            handle.id(),
            handle.backend(),
            doc.filename,
            doc.size_bytes
        );

        // ── Polling ──
        if !handle.is_ready() {
            run.stage = Stage::Polling;
            if let Err(e) = self.poll_until_done(&mut handle, cancel, run).await {
                if matches!(e, ConvertError::Timeout { .. } | ConvertError::Cancelled { .. }) {
                    self.backend.abandon(&handle).await;
                }
                return Err(e);
            }
        }
        if let Err(e) = run.job.succeed(handle.locator().cloned()) {
            debug!("Job {}: {}", handle.id(), e);
        }

        // ── Fetching ──
        run.stage = Stage::Fetching;
        self.progress.on_fetching(handle.id());
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(handle.id())),
            r = self.backend.fetch(&handle) => r,
        };
        let result = fetched?;
        if result.pdf_bytes.is_empty() {
            return Err(ConvertError::ResultUnavailable {
                job_id: handle.id().to_string(),
                detail: "backend returned an empty document".to_string(),
            });
        }
        Ok(result)
    }

    async fn poll_until_done(
        &self,
        handle: &mut JobHandle,
        cancel: &CancelSignal,
        run: &mut Run,
    ) -> Result<(), ConvertError> {
        let max = self.policy.max_attempts.max(1);
        let start = Instant::now();

        for attempt in 1..=max {
            run.polls = attempt;
            self.progress.on_poll(handle.id(), attempt, max);

            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(handle.id())),
                s = self.backend.poll(handle) => s,
            };

            match status {
                Ok(JobStatus::Done) => {
                    handle.mark_ready(None);
                    debug!("Job {}: done after {} status checks", handle.id(), attempt);
                    return Ok(());
                }
                Ok(JobStatus::Failed(detail)) => {
                    return Err(ConvertError::JobFailed {
                        job_id: handle.id().to_string(),
                        detail,
                    });
                }
                Ok(JobStatus::Pending) => {
                    debug!("Job {}: pending ({}/{})", handle.id(), attempt, max);
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        "Job {}: status check {}/{} failed: {}",
                        handle.id(),
                        attempt,
                        max,
                        e
                    );
                }
                Err(e) => return Err(e),
            }

            if attempt == max {
                break;
            }
            if cancel.is_cancelled() {
                return Err(cancelled(handle.id()));
            }
            let delay = self.policy.delay_for(attempt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(handle.id())),
                _ = sleep(delay) => {}
            }
        }

        Err(ConvertError::Timeout {
            job_id: handle.id().to_string(),
            attempts: max,
            waited_ms: start.elapsed().as_millis() as u64,
        })
    }
}

fn cancelled(job_id: &str) -> ConvertError {
    ConvertError::Cancelled {
        job_id: job_id.to_string(),
    }
}

//! Progress-callback trait for conversion lifecycle events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::orchestrator::Orchestrator::with_progress`] to observe each
//! conversion as it moves through submit, poll and fetch. Callers can forward
//! the events to metrics, a log sink, or a websocket without the orchestrator
//! knowing how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use doc2pdf::ConversionProgressCallback;
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! struct PollCounter(AtomicU32);
//!
//! impl ConversionProgressCallback for PollCounter {
//!     fn on_poll(&self, _job_id: &str, _attempt: u32, _max_attempts: u32) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::config::BackendKind;
use crate::error::ConvertError;
use std::sync::Arc;

/// Called by the orchestrator as a conversion progresses.
///
/// Implementations must be `Send + Sync`: one orchestrator serves every
/// request, so callbacks fire concurrently for different jobs. All methods
/// default to no-ops.
pub trait ConversionProgressCallback: Send + Sync {
    /// The backend accepted the document and issued a handle.
    fn on_submitted(&self, job_id: &str, backend: BackendKind) {
        let _ = (job_id, backend);
    }

    /// A status check is about to be issued.
    ///
    /// # Arguments
    /// * `attempt`: 1-indexed attempt number
    /// * `max_attempts`: ceiling from the poll policy
    fn on_poll(&self, job_id: &str, attempt: u32, max_attempts: u32) {
        let _ = (job_id, attempt, max_attempts);
    }

    /// The result is being retrieved.
    fn on_fetching(&self, job_id: &str) {
        let _ = job_id;
    }

    /// The conversion produced `pdf_len` bytes.
    fn on_complete(&self, job_id: &str, pdf_len: usize) {
        let _ = (job_id, pdf_len);
    }

    /// The conversion ended in failure.
    fn on_failed(&self, job_id: &str, error: &ConvertError) {
        let _ = (job_id, error);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type held by the orchestrator.
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

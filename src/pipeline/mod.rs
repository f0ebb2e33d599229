//! Request pipeline stages around the orchestrator.
//!
//! ## Data Flow
//!
//! ```text
//! upload ──▶ orchestrator ──▶ respond
//! (multipart)  (backend)      (PDF / JSON error)
//! ```
//!
//! 1. [`upload`]: parse `multipart/form-data` into an
//!    [`UploadedDocument`](crate::document::UploadedDocument), spooling large
//!    files to a temporary file
//! 2. [`respond`]: write the PDF (or the error body) and release the
//!    request's temporary storage

pub mod respond;
pub mod upload;

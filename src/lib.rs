//! # doc2pdf
//!
//! Convert office documents (DOCX, PPTX) to PDF behind a small HTTP service.
//!
//! The conversion itself is delegated to one of three interchangeable
//! backends: a job-queue cloud API, a synchronous cloud API, or a locally
//! installed office suite run headless. The service accepts the upload,
//! drives the chosen backend to completion and streams the PDF back.
//!
//! ## Request Flow
//!
//! ```text
//! POST /convert (multipart)
//!  │
//!  ├─ 1. Upload        parse `file`, enforce size, spool large bodies to disk
//!  ├─ 2. Validate      extension allow-list (docx, pptx) before any backend call
//!  ├─ 3. Submit        backend.submit → JobHandle
//!  ├─ 4. Poll          bounded status checks (PollPolicy), cancellable
//!  ├─ 5. Fetch         download / decode / read the PDF
//!  └─ 6. Respond       application/pdf attachment, or JSON error
//! ```
//!
//! ## Library Use
//!
//! ```rust,no_run
//! use doc2pdf::{build_backend, CancelSignal, Orchestrator, ServiceConfig, UploadedDocument};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::default(); // local `soffice`
//!     let backend = build_backend(&config, reqwest::Client::new())?;
//!     let orchestrator = Orchestrator::new(backend, config.poll, config.allowed_extensions.clone());
//!
//!     let bytes = std::fs::read("report.docx")?;
//!     let doc = UploadedDocument::from_bytes("report.docx", "application/octet-stream", bytes);
//!     let pdf = orchestrator.convert(&doc, &CancelSignal::never()).await?;
//!     std::fs::write(&pdf.suggested_filename, &pdf.pdf_bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | Enables the `doc2pdf` binary (clap + anyhow + tracing-subscriber + dotenvy) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod document;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod routes;
pub mod server;
pub mod snapshot;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{build_backend, ConversionBackend};
pub use config::{Backoff, BackendKind, PollPolicy, ServiceConfig, ServiceConfigBuilder};
pub use document::{ConversionResult, DocumentBody, UploadedDocument};
pub use error::{ConvertError, ErrorKind};
pub use job::{ConversionJob, JobHandle, JobState, JobStatus, ResultLocator};
pub use orchestrator::{CancelHandle, CancelSignal, ConversionOutcome, Orchestrator, Stage};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use server::{router, serve, serve_until, AppState};

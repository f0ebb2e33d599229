//! Configuration types for the conversion service.
//!
//! Every knob the core consumes lives in [`ServiceConfig`], built via its
//! [`ServiceConfigBuilder`]. The core never reads the environment itself:
//! the server binary maps flags and environment variables onto the builder
//! and hands the finished config to [`crate::server::AppState::new`].

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default CORS origin for development builds of the upload UI.
pub const DEVELOPMENT_ORIGIN: &str = "http://localhost:3000";

/// Default CORS origin for the deployed upload UI.
pub const PRODUCTION_ORIGIN: &str = "https://zemnaye-pdf-converter.vercel.app";

/// Which conversion strategy the service drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendKind {
    /// Job-queue cloud API: import → convert → export, polled to completion.
    JobBased,
    /// Cloud API that converts in a single request/response cycle.
    Synchronous,
    /// Locally installed office suite run as a headless child process. (default)
    #[default]
    LocalProcess,
}

impl BackendKind {
    /// Short name used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::JobBased => "job-based",
            BackendKind::Synchronous => "synchronous",
            BackendKind::LocalProcess => "local-process",
        }
    }

    /// Whether this backend needs a provider API key.
    pub fn requires_api_key(self) -> bool {
        !matches!(self, BackendKind::LocalProcess)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the delay between status checks evolves.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Backoff {
    /// Same delay before every check. (default)
    #[default]
    Fixed,
    /// Delay multiplied by `factor` after each check, capped at `max_delay`.
    Exponential { factor: u32, max_delay: Duration },
}

/// Bounded retry policy for status polling, shared by every asynchronous backend.
///
/// The defaults (15 checks, 2 s apart) give a provider roughly 30 seconds to
/// finish a job before the request fails with a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Maximum number of status checks. Always ≥ 1.
    pub max_attempts: u32,
    /// Delay after the first non-terminal check.
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            delay: Duration::from_secs(2),
            backoff: Backoff::Fixed,
        }
    }
}

impl PollPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sleep to apply after the `attempt`-th check (1-indexed) came back pending.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { factor, max_delay } => {
                let exp = attempt.saturating_sub(1).min(16);
                let multiplier = factor.max(1).saturating_pow(exp);
                self.delay.saturating_mul(multiplier).min(max_delay)
            }
        }
    }

    /// Upper bound on the total time spent sleeping between checks.
    pub fn total_budget(&self) -> Duration {
        (1..self.max_attempts)
            .map(|a| self.delay_for(a))
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }
}

/// Configuration for the conversion service.
///
/// Built via [`ServiceConfig::builder()`] or [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use doc2pdf::{BackendKind, ServiceConfig};
///
/// let config = ServiceConfig::builder()
///     .backend(BackendKind::JobBased)
///     .api_key("secret")
///     .max_upload_bytes(10 * 1024 * 1024)
///     .build()
///     .unwrap();
/// assert_eq!(config.poll.max_attempts, 15);
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Conversion strategy. Default: [`BackendKind::LocalProcess`].
    pub backend: BackendKind,

    /// Provider API key / secret for the cloud backends.
    pub api_key: Option<String>,

    /// Base URL of the job-queue API. Default: `https://api.cloudconvert.com/v2`.
    pub job_api_base: String,

    /// Base URL of the synchronous conversion API. Default: `https://v2.convertapi.com`.
    pub sync_api_base: String,

    /// Office converter executable. Default: `soffice`, resolved through `PATH`.
    pub converter_path: PathBuf,

    /// Wall-clock limit for one converter run, in seconds. Default: 120.
    pub converter_timeout_secs: u64,

    /// Largest accepted upload in bytes. Default: 25 MiB.
    pub max_upload_bytes: u64,

    /// Uploads larger than this are spooled to a temporary file instead of
    /// being held in memory. Default: 4 MiB.
    pub spool_threshold_bytes: u64,

    /// Lower-case file extensions accepted for conversion. Default: `docx`, `pptx`.
    pub allowed_extensions: Vec<String>,

    /// Status polling policy for asynchronous backends.
    pub poll: PollPolicy,

    /// Per-request timeout for provider HTTP calls, in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Origin allowed by CORS. Default: [`PRODUCTION_ORIGIN`].
    pub cors_origin: String,

    /// Directory served by the preview endpoint. Default: `public/uploads`.
    pub preview_dir: PathBuf,

    /// Access key for the URL snapshot service.
    pub snapshot_api_key: Option<String>,

    /// Base URL of the URL snapshot service.
    pub snapshot_api_base: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            api_key: None,
            job_api_base: "https://api.cloudconvert.com/v2".to_string(),
            sync_api_base: "https://v2.convertapi.com".to_string(),
            converter_path: PathBuf::from("soffice"),
            converter_timeout_secs: 120,
            max_upload_bytes: 25 * 1024 * 1024,
            spool_threshold_bytes: 4 * 1024 * 1024,
            allowed_extensions: vec!["docx".to_string(), "pptx".to_string()],
            poll: PollPolicy::default(),
            api_timeout_secs: 60,
            cors_origin: PRODUCTION_ORIGIN.to_string(),
            preview_dir: PathBuf::from("public/uploads"),
            snapshot_api_key: None,
            snapshot_api_base: "https://api.apiflash.com/v1/urltoimage".to_string(),
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("backend", &self.backend)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("job_api_base", &self.job_api_base)
            .field("sync_api_base", &self.sync_api_base)
            .field("converter_path", &self.converter_path)
            .field("converter_timeout_secs", &self.converter_timeout_secs)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("spool_threshold_bytes", &self.spool_threshold_bytes)
            .field("allowed_extensions", &self.allowed_extensions)
            .field("poll", &self.poll)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("cors_origin", &self.cors_origin)
            .field("preview_dir", &self.preview_dir)
            .field(
                "snapshot_api_key",
                &self.snapshot_api_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Wall-clock limit for one converter run.
    pub fn converter_timeout(&self) -> Duration {
        Duration::from_secs(self.converter_timeout_secs)
    }

    /// Per-request timeout for provider HTTP calls.
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.config.backend = kind;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn job_api_base(mut self, url: impl Into<String>) -> Self {
        self.config.job_api_base = trim_base(url.into());
        self
    }

    pub fn sync_api_base(mut self, url: impl Into<String>) -> Self {
        self.config.sync_api_base = trim_base(url.into());
        self
    }

    pub fn converter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.converter_path = path.into();
        self
    }

    pub fn converter_timeout_secs(mut self, secs: u64) -> Self {
        self.config.converter_timeout_secs = secs.max(1);
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn spool_threshold_bytes(mut self, bytes: u64) -> Self {
        self.config.spool_threshold_bytes = bytes;
        self
    }

    /// Replace the extension allow-list. Leading dots and case are normalised.
    pub fn allowed_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_extensions = exts
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn poll(mut self, policy: PollPolicy) -> Self {
        self.config.poll = policy;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.config.cors_origin = origin.into();
        self
    }

    pub fn preview_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.preview_dir = dir.into();
        self
    }

    pub fn snapshot_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.snapshot_api_key = Some(key.into());
        self
    }

    pub fn snapshot_api_base(mut self, url: impl Into<String>) -> Self {
        self.config.snapshot_api_base = url.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ConvertError> {
        let c = &self.config;
        if c.backend.requires_api_key() && c.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ConvertError::InvalidConfig(format!(
                "the {} backend requires an API key",
                c.backend
            )));
        }
        if c.poll.max_attempts == 0 {
            return Err(ConvertError::InvalidConfig(
                "poll.max_attempts must be ≥ 1".into(),
            ));
        }
        if c.allowed_extensions.is_empty() {
            return Err(ConvertError::InvalidConfig(
                "allowed_extensions must not be empty".into(),
            ));
        }
        if c.allowed_extensions.iter().any(|e| e == "pdf") {
            return Err(ConvertError::InvalidConfig(
                "'pdf' cannot be a conversion input".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(ConvertError::InvalidConfig(
                "max_upload_bytes must be > 0".into(),
            ));
        }
        if c.converter_path.as_os_str().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "converter_path must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

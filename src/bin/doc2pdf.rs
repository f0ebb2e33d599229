//! Server binary for doc2pdf.
//!
//! A thin shim over the library crate that maps flags and environment
//! variables onto `ServiceConfig` and runs the HTTP service.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use doc2pdf::config::{DEVELOPMENT_ORIGIN, PRODUCTION_ORIGIN};
use doc2pdf::{serve, AppState, BackendKind, PollPolicy, ServiceConfig};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    /// Job-queue cloud API (upload, convert, export, polled).
    Job,
    /// Single-request cloud API.
    Sync,
    /// Local office suite run headless.
    Local,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Job => BackendKind::JobBased,
            BackendArg::Sync => BackendKind::Synchronous,
            BackendArg::Local => BackendKind::LocalProcess,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Environment {
    Development,
    Production,
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Local LibreOffice, development CORS origin
  doc2pdf --backend local --environment development

  # Job-queue cloud backend
  CONVERT_API_KEY=... doc2pdf --backend job

  # Convert a file
  curl -F file=@report.docx http://localhost:3001/convert -o report.pdf

Variables from a .env file in the working directory are loaded first."#;

/// Office document (DOCX/PPTX) to PDF conversion service.
#[derive(Parser, Debug)]
#[command(
    name = "doc2pdf",
    version,
    about = "Office document to PDF conversion service",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "DOC2PDF_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 3001)]
    port: u16,

    /// Conversion backend.
    #[arg(short, long, env = "DOC2PDF_BACKEND", value_enum, default_value = "local")]
    backend: BackendArg,

    /// API key for the cloud backends.
    #[arg(long, env = "CONVERT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Override the job-queue API base URL.
    #[arg(long, env = "DOC2PDF_JOB_API_BASE")]
    job_api_base: Option<String>,

    /// Override the synchronous API base URL.
    #[arg(long, env = "DOC2PDF_SYNC_API_BASE")]
    sync_api_base: Option<String>,

    /// Office converter executable for the local backend.
    #[arg(long, env = "DOC2PDF_CONVERTER", default_value = "soffice")]
    converter: PathBuf,

    /// Seconds a local converter run may take.
    #[arg(long, env = "DOC2PDF_CONVERTER_TIMEOUT", default_value_t = 120)]
    converter_timeout: u64,

    /// Largest accepted upload, in MiB.
    #[arg(long, env = "DOC2PDF_MAX_UPLOAD_MB", default_value_t = 25,
          value_parser = clap::value_parser!(u64).range(1..=1024))]
    max_upload_mb: u64,

    /// Maximum status checks per conversion.
    #[arg(long, env = "DOC2PDF_POLL_ATTEMPTS", default_value_t = 15,
          value_parser = clap::value_parser!(u32).range(1..))]
    poll_attempts: u32,

    /// Delay between status checks, in milliseconds.
    #[arg(long, env = "DOC2PDF_POLL_INTERVAL_MS", default_value_t = 2000)]
    poll_interval_ms: u64,

    /// Timeout for each provider HTTP call, in seconds.
    #[arg(long, env = "DOC2PDF_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Deployment environment; selects the default CORS origin.
    #[arg(long, env = "DOC2PDF_ENV", value_enum, default_value = "production")]
    environment: Environment,

    /// Allowed CORS origin (overrides the environment default).
    #[arg(long, env = "DOC2PDF_CORS_ORIGIN")]
    cors_origin: Option<String>,

    /// Directory served by GET /preview.
    #[arg(long, env = "DOC2PDF_PREVIEW_DIR", default_value = "public/uploads")]
    preview_dir: PathBuf,

    /// Access key for the URL snapshot service.
    #[arg(long, env = "APIFLASH_ACCESS_KEY", hide_env_values = true)]
    snapshot_key: Option<String>,

    /// Show debug logs.
    #[arg(short, long, env = "DOC2PDF_VERBOSE")]
    verbose: bool,

    /// Only show errors.
    #[arg(short, long, env = "DOC2PDF_QUIET")]
    quiet: bool,
}

impl Cli {
    fn to_config(&self) -> Result<ServiceConfig> {
        let default_origin = match self.environment {
            Environment::Development => DEVELOPMENT_ORIGIN,
            Environment::Production => PRODUCTION_ORIGIN,
        };

        let mut builder = ServiceConfig::builder()
            .backend(self.backend.into())
            .converter_path(&self.converter)
            .converter_timeout_secs(self.converter_timeout)
            .max_upload_bytes(self.max_upload_mb * 1024 * 1024)
            .poll(PollPolicy::new(
                self.poll_attempts,
                Duration::from_millis(self.poll_interval_ms),
            ))
            .api_timeout_secs(self.api_timeout)
            .cors_origin(self.cors_origin.as_deref().unwrap_or(default_origin))
            .preview_dir(&self.preview_dir);

        if let Some(key) = &self.api_key {
            builder = builder.api_key(key);
        }
        if let Some(url) = &self.job_api_base {
            builder = builder.job_api_base(url);
        }
        if let Some(url) = &self.sync_api_base {
            builder = builder.sync_api_base(url);
        }
        if let Some(key) = &self.snapshot_key {
            builder = builder.snapshot_api_key(key);
        }

        builder.build().context("Invalid configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before parsing so `env = ...` flags see its values.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = cli.to_config()?;
    info!("Starting doc2pdf with {:?}", config);

    let state = Arc::new(AppState::new(config).context("Failed to initialise service")?);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", cli.host, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    serve(listener, state).await.context("Server error")?;
    Ok(())
}

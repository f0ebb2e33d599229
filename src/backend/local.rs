//! Local office-suite backend.
//!
//! Runs the converter as a headless child process inside a fresh temporary
//! directory:
//!
//! ```text
//! <converter> -env:UserInstallation=file://<workdir>/profile \
//!     --headless --convert-to pdf --outdir <workdir> <workdir>/source.<ext>
//! ```
//!
//! The private profile directory lets concurrent conversions run without
//! fighting over the user's office profile lock. The working directory is
//! owned by the returned [`JobHandle`] and removed when the handle drops,
//! whether or not the conversion succeeded.

use super::{require_locator, ConversionBackend};
use crate::config::BackendKind;
use crate::document::{pdf_filename, ConversionResult, DocumentBody, UploadedDocument};
use crate::error::ConvertError;
use crate::job::{JobHandle, JobStatus, ResultLocator};
use async_trait::async_trait;
use axum::body::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

const KIND: BackendKind = BackendKind::LocalProcess;

/// Stem of the input file written into the working directory.
const INPUT_STEM: &str = "source";

/// Longest stderr excerpt kept on a [`ConvertError::ProcessFailed`].
const MAX_STDERR_LEN: usize = 2_000;

/// Backend that shells out to a locally installed converter.
#[derive(Debug, Clone)]
pub struct LocalProcessBackend {
    program: PathBuf,
    timeout: Duration,
}

impl LocalProcessBackend {
    pub fn new(program: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            timeout,
        }
    }

    fn command(&self, workdir: &Path, input: &Path) -> Command {
        let profile = format!(
            "-env:UserInstallation=file://{}",
            workdir.join("profile").display()
        );
        let mut cmd = Command::new(&self.program);
        cmd.arg(profile)
            .args(["--headless", "--convert-to", "pdf", "--outdir"])
            .arg(workdir)
            .arg(input)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, err: io::Error) -> ConvertError {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                ConvertError::BackendUnavailable {
                    path: self.program.clone(),
                    detail: err.to_string(),
                }
            }
            _ => ConvertError::io(format!("Failed to start {}", self.program.display()), err),
        }
    }

    /// Run the converter to exit on `input`, enforcing the timeout.
    async fn run(&self, workdir: &Path, input: &Path) -> Result<(), ConvertError> {
        let child = self
            .command(workdir, input)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ConvertError::io("Failed to wait for converter", e))?,
            Err(_) => {
                warn!(
                    "Converter {} exceeded {}s, killed",
                    self.program.display(),
                    self.timeout.as_secs()
                );
                return Err(ConvertError::ProcessTimeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let stderr = match stderr.char_indices().nth(MAX_STDERR_LEN) {
                Some((idx, _)) => &stderr[..idx],
                None => stderr,
            };
            return Err(ConvertError::ProcessFailed {
                code: output.status.code(),
                stderr: stderr.to_string(),
            });
        }
        debug!(
            "Converter stdout: {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }
}

/// Copy the upload into `dest` without touching the original.
async fn stage_input(doc: &UploadedDocument, dest: &Path) -> Result<(), ConvertError> {
    let result = match &doc.body {
        DocumentBody::InMemory(bytes) => tokio::fs::write(dest, bytes).await,
        DocumentBody::Spooled(path) => tokio::fs::copy(path, dest).await.map(|_| ()),
    };
    result.map_err(|e| ConvertError::io("Failed to stage converter input", e))
}

#[async_trait]
impl ConversionBackend for LocalProcessBackend {
    fn kind(&self) -> BackendKind {
        KIND
    }

    async fn submit(&self, doc: &UploadedDocument) -> Result<JobHandle, ConvertError> {
        let id = uuid::Uuid::new_v4().to_string();
        let workdir = tempfile::Builder::new()
            .prefix("doc2pdf-")
            .tempdir()
            .map_err(|e| ConvertError::io("Failed to create converter workdir", e))?;

        let ext = doc.extension().unwrap_or_else(|| "bin".to_string());
        let input_name = format!("{INPUT_STEM}.{ext}");
        let input = workdir.path().join(&input_name);
        stage_input(doc, &input).await?;

        let start = Instant::now();
        debug!("Job {}: running {} on {}", id, self.program.display(), input.display());
        self.run(workdir.path(), &input).await?;

        let output = workdir.path().join(pdf_filename(&input_name));
        let locator = match tokio::fs::try_exists(&output).await {
            Ok(true) => Some(ResultLocator::File(output)),
            Ok(false) => {
                warn!("Job {}: converter exited cleanly but wrote no PDF", id);
                None
            }
            Err(e) => return Err(ConvertError::io("Failed to inspect converter output", e)),
        };

        info!(
            "Job {}: converted '{}' locally in {}ms",
            id,
            doc.filename,
            start.elapsed().as_millis()
        );
        Ok(JobHandle::ready(id, KIND, doc.filename.clone(), locator).with_workdir(workdir))
    }

    async fn poll(&self, _handle: &mut JobHandle) -> Result<JobStatus, ConvertError> {
        Ok(JobStatus::Done)
    }

    async fn fetch(&self, handle: &JobHandle) -> Result<ConversionResult, ConvertError> {
        let unavailable = |detail: String| ConvertError::ResultUnavailable {
            job_id: handle.id().to_string(),
            detail,
        };

        let path = match require_locator(handle)? {
            ResultLocator::File(path) => path,
            other => return Err(unavailable(format!("unexpected locator {other:?}"))),
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(unavailable("output file disappeared".to_string()))
            }
            Err(e) => return Err(ConvertError::io("Failed to read converter output", e)),
        };
        if bytes.is_empty() {
            return Err(unavailable("output file is empty".to_string()));
        }

        Ok(ConversionResult::new(
            Bytes::from(bytes),
            pdf_filename(handle.source_name()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_executable_is_unavailable() {
        let backend = LocalProcessBackend::new(
            "/nonexistent/doc2pdf-test/soffice",
            Duration::from_secs(5),
        );
        let doc = UploadedDocument::from_bytes("a.docx", "application/octet-stream", b"PK".to_vec());
        let err = backend.submit(&doc).await.unwrap_err();
        assert!(
            matches!(err, ConvertError::BackendUnavailable { .. }),
            "got: {err:?}"
        );
    }

    #[test]
    fn command_line_shape() {
        let backend = LocalProcessBackend::new("soffice", Duration::from_secs(5));
        let cmd = backend.command(Path::new("/tmp/w"), Path::new("/tmp/w/source.docx"));
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-env:UserInstallation=file:///tmp/w/profile",
                "--headless",
                "--convert-to",
                "pdf",
                "--outdir",
                "/tmp/w",
                "/tmp/w/source.docx",
            ]
        );
    }

    #[tokio::test]
    async fn fetch_without_output_is_result_unavailable() {
        let backend = LocalProcessBackend::new("soffice", Duration::from_secs(5));
        let handle = JobHandle::ready("l1", KIND, "a.docx", None);
        let err = backend.fetch(&handle).await.unwrap_err();
        assert!(matches!(err, ConvertError::ResultUnavailable { .. }));
    }

    #[tokio::test]
    async fn fetch_reads_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("source.pdf");
        std::fs::write(&pdf, b"%PDF-1.4 local").unwrap();
        let backend = LocalProcessBackend::new("soffice", Duration::from_secs(5));
        let handle = JobHandle::ready("l1", KIND, "Quarterly Report.docx", Some(ResultLocator::File(pdf)))
            .with_workdir(dir);

        let result = backend.fetch(&handle).await.unwrap();
        assert_eq!(&result.pdf_bytes[..], b"%PDF-1.4 local");
        assert_eq!(result.suggested_filename, "Quarterly Report.pdf");
    }
}

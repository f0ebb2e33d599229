//! Job-queue cloud backend (import → convert → export task graph).
//!
//! ## Wire protocol
//!
//! ```text
//! POST   {base}/jobs            create job with upload/convert/export tasks
//! POST   <upload form url>      multipart: signed parameters, then `file`
//! GET    {base}/jobs/{id}       poll; export task `finished` → result URL
//! GET    <export file url>      download the PDF
//! DELETE {base}/jobs/{id}       abandon a job we will not fetch
//! ```
//!
//! The signed upload target is a plain form POST and takes no bearer token;
//! every other call carries `Authorization: Bearer <api key>`.

use super::{download, rejection, require_locator, ConversionBackend};
use crate::config::BackendKind;
use crate::document::{pdf_filename, ConversionResult, UploadedDocument};
use crate::error::ConvertError;
use crate::job::{JobHandle, JobStatus, ResultLocator};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

const KIND: BackendKind = BackendKind::JobBased;

/// Backend for a job-queue conversion API.
#[derive(Debug, Clone)]
pub struct CloudJobBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Job,
}

#[derive(Debug, Deserialize)]
struct Job {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct Task {
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Option<TaskResult>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    #[serde(default)]
    form: Option<UploadForm>,
    #[serde(default)]
    files: Vec<ExportedFile>,
}

#[derive(Debug, Deserialize)]
struct UploadForm {
    url: String,
    #[serde(default)]
    parameters: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ExportedFile {
    #[serde(default)]
    url: Option<String>,
}

impl Job {
    fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Interpret the job snapshot as a poll status plus, when finished, the
    /// first exported file URL (the first file is authoritative).
    fn status(&self) -> (JobStatus, Option<String>) {
        if let Some(failed) = self.tasks.iter().find(|t| t.status == "error") {
            let message = failed.message.as_deref().unwrap_or("no message");
            return (
                JobStatus::Failed(format!("task '{}' failed: {}", failed.name, message)),
                None,
            );
        }
        if self.status == "error" {
            return (JobStatus::Failed("job reported an error".to_string()), None);
        }
        match self.task("export") {
            Some(export) if export.status == "finished" => {
                let url = export
                    .result
                    .as_ref()
                    .and_then(|r| r.files.first())
                    .and_then(|f| f.url.clone());
                (JobStatus::Done, url)
            }
            _ => (JobStatus::Pending, None),
        }
    }
}

impl CloudJobBackend {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn job_url(&self, id: &str) -> String {
        format!("{}/jobs/{}", self.base_url, id)
    }

    fn submission(detail: impl Into<String>) -> ConvertError {
        ConvertError::Submission {
            backend: KIND.to_string(),
            detail: detail.into(),
        }
    }

    async fn create_job(&self) -> Result<Job, ConvertError> {
        let body = json!({
            "tasks": {
                "upload": { "operation": "import/upload" },
                "convert": { "operation": "convert", "input": "upload", "output_format": "pdf" },
                "export": { "operation": "export/url", "input": "convert" },
            }
        });

        let response = self
            .http
            .post(format!("{}/jobs", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::submission(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(rejection(KIND, status, &text));
        }

        response
            .json::<Envelope>()
            .await
            .map(|env| env.data)
            .map_err(|e| Self::submission(format!("unreadable job response: {e}")))
    }

    async fn upload(&self, form: &UploadForm, doc: &UploadedDocument) -> Result<(), ConvertError> {
        let mut multipart = Form::new();
        for (key, value) in &form.parameters {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            multipart = multipart.text(key.clone(), value);
        }

        let bytes = doc.read_bytes().await?;
        // The file part must come after every signed parameter.
        let part = Part::bytes(bytes.to_vec()).file_name(doc.filename.clone());
        multipart = multipart.part("file", part);

        let response = self
            .http
            .post(&form.url)
            .multipart(multipart)
            .send()
            .await
            .map_err(|e| Self::submission(format!("upload failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(rejection(KIND, status, &text));
        }
        Ok(())
    }

    async fn delete_job(&self, id: &str) {
        let result = self
            .http
            .delete(self.job_url(id))
            .bearer_auth(&self.api_key)
            .send()
            .await;
        match result {
            Ok(r) if r.status().is_success() => debug!("Deleted job {}", id),
            Ok(r) => warn!("Deleting job {} returned HTTP {}", id, r.status()),
            Err(e) => warn!("Deleting job {} failed: {}", id, e),
        }
    }
}

/// A provider job created by `submit` that no handle owns yet.
///
/// If the submit future is dropped (cancellation, client disconnect) before
/// the handle is returned, the job is deleted from a spawned task.
struct CreatedJob {
    backend: Option<CloudJobBackend>,
    id: String,
}

impl CreatedJob {
    fn new(backend: &CloudJobBackend, id: &str) -> Self {
        Self {
            backend: Some(backend.clone()),
            id: id.to_string(),
        }
    }

    /// Ownership moves to the returned handle.
    fn disarm(mut self) {
        self.backend = None;
    }

    /// Delete the job now and wait for the provider's answer.
    async fn delete(mut self) {
        if let Some(backend) = self.backend.take() {
            backend.delete_job(&self.id).await;
        }
    }
}

impl Drop for CreatedJob {
    fn drop(&mut self) {
        let Some(backend) = self.backend.take() else {
            return;
        };
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("Submit of job {} interrupted, deleting it", id);
                runtime.spawn(async move { backend.delete_job(&id).await });
            }
            Err(_) => warn!("Job {} left on the provider: no runtime to delete it", id),
        }
    }
}

#[async_trait]
impl ConversionBackend for CloudJobBackend {
    fn kind(&self) -> BackendKind {
        KIND
    }

    async fn submit(&self, doc: &UploadedDocument) -> Result<JobHandle, ConvertError> {
        let job = self.create_job().await?;
        info!("Created job {} for '{}'", job.id, doc.filename);
        let guard = CreatedJob::new(self, &job.id);

        let form = match job.task("upload").and_then(|t| t.result.as_ref()).and_then(|r| r.form.as_ref()) {
            Some(form) => form,
            None => {
                guard.delete().await;
                return Err(Self::submission("upload task returned no upload form"));
            }
        };

        if let Err(e) = self.upload(form, doc).await {
            guard.delete().await;
            return Err(e);
        }
        debug!("Uploaded {} bytes for job {}", doc.size_bytes, job.id);

        guard.disarm();
        Ok(JobHandle::pending(job.id, KIND, doc.filename.clone()))
    }

    async fn poll(&self, handle: &mut JobHandle) -> Result<JobStatus, ConvertError> {
        let transport = |detail: String| ConvertError::Transport {
            backend: KIND.to_string(),
            detail,
        };

        let response = self
            .http
            .get(self.job_url(handle.id()))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(transport(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(rejection(KIND, status, &text));
        }

        let job = response
            .json::<Envelope>()
            .await
            .map_err(|e| transport(format!("unreadable job status: {e}")))?
            .data;

        let (status, url) = job.status();
        if status == JobStatus::Done {
            handle.mark_ready(url.map(ResultLocator::Url));
        }
        Ok(status)
    }

    async fn fetch(&self, handle: &JobHandle) -> Result<ConversionResult, ConvertError> {
        let bytes = match require_locator(handle)? {
            ResultLocator::Url(url) => download(&self.http, KIND, handle.id(), url).await?,
            ResultLocator::Inline(bytes) => bytes.clone(),
            ResultLocator::File(_) => {
                return Err(ConvertError::ResultUnavailable {
                    job_id: handle.id().to_string(),
                    detail: "unexpected local result for a cloud job".to_string(),
                })
            }
        };
        Ok(ConversionResult::new(bytes, pdf_filename(handle.source_name())))
    }

    async fn abandon(&self, handle: &JobHandle) {
        self.delete_job(handle.id()).await;
    }
}

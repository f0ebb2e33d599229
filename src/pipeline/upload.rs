//! Upload receiver: `multipart/form-data` → [`UploadedDocument`].
//!
//! Exactly one field named `file` is accepted. Other fields are drained and
//! ignored. The file is read chunk by chunk so the size ceiling is enforced
//! without buffering an oversized body; once it grows past the spool
//! threshold it moves to a named temporary file that is unlinked when the
//! document (or an early error) drops it.

use crate::config::ServiceConfig;
use crate::document::{base_name, DocumentBody, UploadedDocument};
use crate::error::ConvertError;
use axum::body::Bytes;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use axum::http::StatusCode;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Multipart field carrying the document.
pub const FILE_FIELD: &str = "file";

/// Name used when the client sends no filename.
const FALLBACK_FILENAME: &str = "upload";

/// Size limits applied while reading an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_bytes: u64,
    pub spool_threshold: u64,
}

impl UploadLimits {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            max_bytes: config.max_upload_bytes,
            spool_threshold: config.spool_threshold_bytes,
        }
    }
}

/// Where received chunks are accumulated.
enum Sink {
    Memory(Vec<u8>),
    Disk {
        file: tokio::fs::File,
        path: TempPath,
    },
}

impl Sink {
    async fn write(&mut self, chunk: &[u8], total: u64, limits: &UploadLimits) -> Result<(), ConvertError> {
        if let Sink::Memory(buf) = self {
            if total <= limits.spool_threshold {
                buf.extend_from_slice(chunk);
                return Ok(());
            }
            let buffered = std::mem::take(buf);
            *self = spool(&buffered).await?;
        }
        if let Sink::Disk { file, .. } = self {
            file.write_all(chunk)
                .await
                .map_err(|e| ConvertError::io("Failed to spool upload", e))?;
        }
        Ok(())
    }

    async fn finish(self) -> Result<DocumentBody, ConvertError> {
        match self {
            Sink::Memory(buf) => Ok(DocumentBody::InMemory(Bytes::from(buf))),
            Sink::Disk { mut file, path } => {
                file.flush()
                    .await
                    .map_err(|e| ConvertError::io("Failed to spool upload", e))?;
                Ok(DocumentBody::Spooled(path))
            }
        }
    }
}

/// Move what has been buffered so far into a fresh temporary file.
async fn spool(buffered: &[u8]) -> Result<Sink, ConvertError> {
    let named = tempfile::Builder::new()
        .prefix("doc2pdf-upload-")
        .tempfile()
        .map_err(|e| ConvertError::io("Failed to create upload spool file", e))?;
    let (file, path) = named.into_parts();
    let mut file = tokio::fs::File::from_std(file);
    file.write_all(buffered)
        .await
        .map_err(|e| ConvertError::io("Failed to spool upload", e))?;
    debug!("Spooling upload to {}", path.display());
    Ok(Sink::Disk { file, path })
}

fn multipart_error(err: MultipartError, limits: &UploadLimits) -> ConvertError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ConvertError::FileTooLarge {
            limit: limits.max_bytes,
        };
    }
    ConvertError::MalformedUpload {
        detail: err.body_text(),
    }
}

async fn read_file(mut field: Field<'_>, limits: &UploadLimits) -> Result<UploadedDocument, ConvertError> {
    let filename = field
        .file_name()
        .map(base_name)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string());
    let mime_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();

    let mut sink = Sink::Memory(Vec::new());
    let mut size: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limits))? {
        size = size.saturating_add(chunk.len() as u64);
        if size > limits.max_bytes {
            return Err(ConvertError::FileTooLarge {
                limit: limits.max_bytes,
            });
        }
        sink.write(&chunk, size, limits).await?;
    }

    if size == 0 {
        return Err(ConvertError::MalformedUpload {
            detail: "uploaded file is empty".to_string(),
        });
    }

    Ok(UploadedDocument {
        filename,
        mime_type,
        size_bytes: size,
        body: sink.finish().await?,
    })
}

/// Parse the multipart body into the single uploaded document.
pub async fn receive(mut multipart: Multipart, limits: &UploadLimits) -> Result<UploadedDocument, ConvertError> {
    let mut document: Option<UploadedDocument> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limits))?
    {
        if field.name() == Some(FILE_FIELD) {
            if document.is_some() {
                return Err(ConvertError::MalformedUpload {
                    detail: format!("expected exactly one '{FILE_FIELD}' field"),
                });
            }
            document = Some(read_file(field, limits).await?);
        } else {
            let name = field.name().unwrap_or_default().to_string();
            while field
                .chunk()
                .await
                .map_err(|e| multipart_error(e, limits))?
                .is_some()
            {}
            debug!("Ignoring multipart field '{}'", name);
        }
    }

    let document = document.ok_or(ConvertError::MissingFile)?;
    debug!(
        "Received '{}' ({}, {} bytes{})",
        document.filename,
        document.mime_type,
        document.size_bytes,
        if document.spool_path().is_some() { ", spooled" } else { "" }
    );
    Ok(document)
}

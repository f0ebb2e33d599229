//! Documents flowing through the conversion pipeline.
//!
//! [`UploadedDocument`] is what the upload stage produces and the
//! orchestrator consumes; [`ConversionResult`] is what the orchestrator
//! hands to the response stage. Both are request-scoped: a spooled upload
//! deletes its temporary file when the document is dropped.

use crate::error::ConvertError;
use axum::body::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tempfile::TempPath;

/// MIME type of every conversion result.
pub const PDF_MIME: &str = "application/pdf";

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const PPTX_MIME: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// Fallback output name when the upload carries no usable filename.
pub const DEFAULT_OUTPUT_NAME: &str = "converted.pdf";

/// Where the uploaded bytes live.
#[derive(Debug)]
pub enum DocumentBody {
    /// Small uploads are kept in memory.
    InMemory(Bytes),
    /// Large uploads are spooled to a temp file, removed on drop.
    Spooled(TempPath),
}

/// A file received from the client, owned by one conversion.
#[derive(Debug)]
pub struct UploadedDocument {
    /// Client-supplied file name, stripped of any directory components.
    pub filename: String,
    /// Client-declared MIME type (`application/octet-stream` if absent).
    pub mime_type: String,
    pub size_bytes: u64,
    pub body: DocumentBody,
}

impl UploadedDocument {
    /// Build an in-memory document; mostly useful for library callers and tests.
    pub fn from_bytes(
        filename: impl AsRef<str>,
        mime_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        let bytes = bytes.into();
        Self {
            filename: base_name(filename.as_ref()),
            mime_type: mime_type.into(),
            size_bytes: bytes.len() as u64,
            body: DocumentBody::InMemory(bytes),
        }
    }

    /// Read the full payload. Spooled documents are read back from disk;
    /// the source is never modified.
    pub async fn read_bytes(&self) -> Result<Bytes, ConvertError> {
        match &self.body {
            DocumentBody::InMemory(bytes) => Ok(bytes.clone()),
            DocumentBody::Spooled(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|e| ConvertError::io("Failed to read spooled upload", e)),
        }
    }

    /// Path of the spooled temp file, if the upload was spooled.
    pub fn spool_path(&self) -> Option<&Path> {
        match &self.body {
            DocumentBody::Spooled(path) => Some(path),
            DocumentBody::InMemory(_) => None,
        }
    }

    /// Lower-case extension from the file name, falling back to the MIME type.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.filename).or_else(|| extension_for_mime(&self.mime_type).map(String::from))
    }

    /// Output name: the input name with its final extension replaced by `.pdf`.
    pub fn output_filename(&self) -> String {
        pdf_filename(&self.filename)
    }

    /// Reject the document unless its extension is on `allowed`.
    pub fn validate_extension(&self, allowed: &[String]) -> Result<String, ConvertError> {
        let ext = self.extension().unwrap_or_default();
        if !ext.is_empty() && allowed.iter().any(|a| a == &ext) {
            return Ok(ext);
        }
        Err(ConvertError::UnsupportedFormat {
            extension: if ext.is_empty() { "<none>".to_string() } else { ext },
            allowed: allowed.join(", "),
        })
    }
}

/// A finished PDF, ready to be written to the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub pdf_bytes: Bytes,
    pub suggested_filename: String,
}

impl ConversionResult {
    pub fn new(pdf_bytes: impl Into<Bytes>, suggested_filename: impl Into<String>) -> Self {
        Self {
            pdf_bytes: pdf_bytes.into(),
            suggested_filename: suggested_filename.into(),
        }
    }
}

/// Final path component of a client-supplied name (handles `/` and `\`).
pub fn base_name(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Lower-case final extension of `name`, if it has one.
pub fn extension_of(name: &str) -> Option<String> {
    let base = base_name(name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Extension implied by an office MIME type.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or_default().trim();
    match essence {
        DOCX_MIME => Some("docx"),
        PPTX_MIME => Some("pptx"),
        _ => None,
    }
}

/// Content type for a file served by name.
pub fn content_type_for(name: &str) -> &'static str {
    match extension_of(name).as_deref() {
        Some("docx") => DOCX_MIME,
        Some("pptx") => PPTX_MIME,
        Some("pdf") => PDF_MIME,
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Replace the final extension of `name` with `.pdf`.
///
/// `report.docx` → `report.pdf`, `deck.PPTX` → `deck.pdf`,
/// `notes` → `notes.pdf`, `` → `converted.pdf`.
pub fn pdf_filename(name: &str) -> String {
    let base = base_name(name);
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base.as_str(),
    };
    if stem.is_empty() || stem == "." || stem == ".." {
        return DEFAULT_OUTPUT_NAME.to_string();
    }
    format!("{stem}.pdf")
}

static UNSAFE_HEADER_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["\\\x00-\x1f\x7f]"#).expect("static regex"));

/// `Content-Disposition` value for downloading `filename` as an attachment.
///
/// Quotes, backslashes and control characters are replaced; names with
/// non-ASCII characters also get an RFC 5987 `filename*` parameter.
pub fn attachment_disposition(filename: &str) -> String {
    let cleaned = UNSAFE_HEADER_CHARS.replace_all(filename, "_");
    if cleaned.is_ascii() {
        return format!("attachment; filename=\"{cleaned}\"");
    }
    let ascii: String = cleaned
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{ascii}\"; filename*=UTF-8''{}",
        percent_encode(&cleaned)
    )
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

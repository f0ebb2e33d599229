//! Response streamer: turns a terminal conversion outcome into HTTP.
//!
//! Success writes the PDF as an attachment; failure becomes the JSON error
//! body produced by [`ConvertError`]'s `IntoResponse`. The uploaded document
//! is consumed here so its temporary storage is released on both paths.

use crate::document::{attachment_disposition, ConversionResult, UploadedDocument, PDF_MIME};
use crate::error::ConvertError;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;

/// `200 OK` with the PDF bytes as a download.
pub fn pdf_response(result: ConversionResult) -> Response {
    let disposition = HeaderValue::from_str(&attachment_disposition(&result.suggested_filename))
        .unwrap_or_else(|e| {
            warn!(
                "Unusable download name '{}': {}",
                result.suggested_filename, e
            );
            HeaderValue::from_static("attachment; filename=\"converted.pdf\"")
        });

    let mut response = Response::new(Body::from(result.pdf_bytes));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(PDF_MIME));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    response
}

/// Write `outcome`, then drop `doc` (and any spooled file) before returning.
pub fn respond(outcome: Result<ConversionResult, ConvertError>, doc: UploadedDocument) -> Response {
    drop(doc);
    match outcome {
        Ok(result) => pdf_response(result),
        Err(e) => e.into_response(),
    }
}

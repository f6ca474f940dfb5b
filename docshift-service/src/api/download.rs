//! Output file downloads.

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use mime::Mime;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::{I18nError, ServiceError};
use crate::service::sanitize_file_name;

use super::AppState;

/// Stream an output file
pub async fn download_handler(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, I18nError> {
    let not_found = || {
        state.i18n_error(ServiceError::FileNotFound {
            file_name: filename.clone(),
        })
    };

    if !is_plain_file_name(&filename) {
        return Err(not_found());
    }

    let path = state.service.output_dir().join(&filename);
    let metadata = tokio::fs::metadata(&path).await.map_err(|_| not_found())?;
    if !metadata.is_file() {
        return Err(not_found());
    }
    let file = tokio::fs::File::open(&path).await.map_err(|_| not_found())?;
    debug!(file = %filename, size_bytes = metadata.len(), "Serving download");

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, content_type(&filename).to_string()),
            (header::CONTENT_LENGTH, metadata.len().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", sanitize_file_name(&filename)),
            ),
        ],
        body,
    )
        .into_response())
}

/// A single visible path component: no separators, no leading dot
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

fn content_type(file_name: &str) -> Mime {
    let extension = std::path::Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let essence = match extension.as_str() {
        "pdf" => return mime::APPLICATION_PDF,
        "png" => return mime::IMAGE_PNG,
        "jpg" | "jpeg" => return mime::IMAGE_JPEG,
        "bmp" => return mime::IMAGE_BMP,
        "txt" => return mime::TEXT_PLAIN_UTF_8,
        "html" => return mime::TEXT_HTML_UTF_8,
        "csv" => return mime::TEXT_CSV_UTF_8,
        "tif" | "tiff" => "image/tiff",
        "rtf" => "application/rtf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "odt" => "application/vnd.oasis.opendocument.text",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        _ => return mime::APPLICATION_OCTET_STREAM,
    };
    essence.parse().unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

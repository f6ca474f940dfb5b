use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::i18n::I18n;
use crate::jobs::JobStatus;
use crate::toolchain::ToolKind;

/// Main service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("File not found: {file_name}")]
    FileNotFound { file_name: String },

    #[error("Job {job_id} is still {status}")]
    JobActive { job_id: String, status: JobStatus },

    #[error("No PDF file provided")]
    NoFileProvided,

    #[error("At least 2 PDF files required for merging")]
    NotEnoughMergeInputs,

    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("{0}")]
    Upload(#[from] UploadError),

    #[error("Conversion failed")]
    Conversion(#[from] ConversionError),

    #[error("Invalid job state")]
    JobState(#[from] JobStateError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Upload validation and storage errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Unsupported file format: {format}")]
    UnsupportedFormat { format: String },

    #[error("File too large: {size} bytes (max {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Too many files: {count} (max {max})")]
    TooManyFiles { count: usize, max: usize },

    #[error("Invalid PDF file format - missing PDF header: {file_name}")]
    InvalidPdf { file_name: String },

    #[error("Upload integrity check failed: {file_name}")]
    IntegrityMismatch { file_name: String },

    #[error("Failed to store upload")]
    Io(#[source] std::io::Error),
}

/// The OS refused to start an external executable
#[derive(Error, Debug)]
#[error("Failed to spawn {program}")]
pub struct SpawnError {
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

/// Errors surfaced by conversion adapters
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Input file not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    #[error("{tool} unavailable: {reason}")]
    ToolUnavailable { tool: ToolKind, reason: String },

    #[error("Failed to start {tool}")]
    Spawn {
        tool: ToolKind,
        #[source]
        source: SpawnError,
    },

    #[error("{tool} timed out after {}s", timeout.as_secs())]
    ProcessTimeout { tool: ToolKind, timeout: Duration },

    #[error("{tool} failed (exit code {code:?}): {stderr}")]
    ConversionFailed {
        tool: ToolKind,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} did not produce {expected}")]
    OutputMissing { tool: ToolKind, expected: String },

    #[error("Invalid conversion request: {message}")]
    InvalidRequest { message: String },

    #[error("I/O error during conversion")]
    Io(#[from] std::io::Error),
}

/// Job state machine violations
#[derive(Error, Debug)]
pub enum JobStateError {
    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
}

/// API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::JobNotFound { .. } | ServiceError::FileNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ServiceError::JobActive { .. } => StatusCode::CONFLICT,
            ServiceError::NoFileProvided
            | ServiceError::NotEnoughMergeInputs
            | ServiceError::UnsupportedOperation { .. }
            | ServiceError::InvalidRequest { .. }
            | ServiceError::Upload(UploadError::InvalidPdf { .. })
            | ServiceError::Conversion(ConversionError::InvalidRequest { .. }) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Upload(UploadError::FileTooLarge { .. })
            | ServiceError::Upload(UploadError::TooManyFiles { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ServiceError::Upload(UploadError::UnsupportedFormat { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::JobNotFound { .. } => "job_not_found",
            ServiceError::FileNotFound { .. } => "file_not_found",
            ServiceError::JobActive { .. } => "job_active",
            ServiceError::NoFileProvided => "no_file_provided",
            ServiceError::NotEnoughMergeInputs => "not_enough_merge_inputs",
            ServiceError::UnsupportedOperation { .. } => "unsupported_operation",
            ServiceError::InvalidRequest { .. } => "invalid_request",
            ServiceError::Upload(UploadError::UnsupportedFormat { .. }) => "unsupported_format",
            ServiceError::Upload(UploadError::FileTooLarge { .. }) => "file_too_large",
            ServiceError::Upload(UploadError::TooManyFiles { .. }) => "too_many_files",
            ServiceError::Upload(UploadError::InvalidPdf { .. }) => "invalid_pdf",
            ServiceError::Upload(UploadError::IntegrityMismatch { .. }) => "upload_integrity",
            ServiceError::Upload(UploadError::Io(_)) => "io_error",
            ServiceError::Conversion(ConversionError::InvalidRequest { .. }) => "invalid_request",
            ServiceError::Conversion(_) => "conversion_error",
            ServiceError::JobState(_) => "invalid_job_state",
            ServiceError::Config { .. } => "config_error",
            ServiceError::Internal { .. } => "internal_error",
        }
    }

    /// Get a user-friendly translated message. Anything that could carry a
    /// server path or tool output collapses to the generic internal message.
    pub fn user_message(&self, i18n: &I18n, locale: &str) -> String {
        match self {
            ServiceError::JobNotFound { job_id } => {
                i18n.format(locale, "error-job-not-found", &[("id", job_id)])
            }
            ServiceError::FileNotFound { .. } => i18n.get(locale, "error-file-not-found", None),
            ServiceError::JobActive { job_id, status } => i18n.format(
                locale,
                "error-job-active",
                &[("id", job_id), ("status", status.as_ref())],
            ),
            ServiceError::Upload(UploadError::Io(_))
            | ServiceError::Upload(UploadError::IntegrityMismatch { .. })
            | ServiceError::JobState(_)
            | ServiceError::Config { .. }
            | ServiceError::Internal { .. } => i18n.get(locale, "error-internal", None),
            ServiceError::Conversion(ConversionError::InvalidRequest { message }) => {
                message.clone()
            }
            ServiceError::Conversion(_) => i18n.get(locale, "error-internal", None),
            _ => self.to_string(),
        }
    }

    /// Convert to an error response with i18n support
    pub fn into_response_with_i18n(self, i18n: &I18n, locale: &str) -> Response {
        let status = self.status_code();
        let code = self.error_code().to_string();
        let message = self.user_message(i18n, locale);

        let response = ErrorResponse {
            message,
            code: Some(code),
        };

        (status, Json(response)).into_response()
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        self.into_response_with_i18n(&I18n::new(), "en")
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Error wrapper with i18n support for API responses
pub struct I18nError {
    pub error: ServiceError,
    pub i18n: std::sync::Arc<I18n>,
    pub locale: String,
}

impl I18nError {
    pub fn new(error: ServiceError, i18n: std::sync::Arc<I18n>, locale: impl Into<String>) -> Self {
        Self {
            error,
            i18n,
            locale: locale.into(),
        }
    }
}

impl IntoResponse for I18nError {
    fn into_response(self) -> Response {
        self.error.into_response_with_i18n(&self.i18n, &self.locale)
    }
}

impl std::fmt::Debug for I18nError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("I18nError")
            .field("error", &self.error)
            .field("locale", &self.locale)
            .finish()
    }
}

/// Render an error and all of its sources as `outer: inner: innermost`.
pub fn format_error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// Reduce raw tool diagnostics to something safe to show a client: every
/// whitespace-separated token that looks like a filesystem path becomes
/// `<path>`, whitespace is collapsed and the result is capped at `max_chars`.
pub fn sanitize_diagnostic(raw: &str, max_chars: usize) -> String {
    let mut tokens: Vec<&str> = Vec::new();
    for token in raw.split_whitespace() {
        let replacement = if looks_like_path(token) {
            "<path>"
        } else {
            token
        };
        // Consecutive paths collapse into a single placeholder
        if replacement == "<path>" && tokens.last() == Some(&"<path>") {
            continue;
        }
        tokens.push(replacement);
    }

    let joined = tokens.join(" ");
    if joined.chars().count() <= max_chars {
        return joined;
    }

    let mut truncated: String = joined.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

fn looks_like_path(token: &str) -> bool {
    let trimmed = token.trim_matches(|c: char| {
        matches!(c, '"' | '\'' | '(' | ')' | '[' | ']' | ',' | ';' | ':' | '`')
    });
    trimmed.contains('/') || trimmed.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_paths() {
        let raw = "Error: source file could not be loaded: /srv/data/uploads/abc_report.pdf";
        assert_eq!(
            sanitize_diagnostic(raw, 160),
            "Error: source file could not be loaded: <path>"
        );
    }

    #[test]
    fn test_sanitize_windows_paths_and_collapse() {
        let raw = "cannot open 'C:\\Temp\\in.pdf' \"/tmp/a\"\n\n  done";
        assert_eq!(sanitize_diagnostic(raw, 160), "cannot open <path> done");
    }

    #[test]
    fn test_sanitize_truncates() {
        let raw = "word ".repeat(100);
        let sanitized = sanitize_diagnostic(&raw, 20);
        assert_eq!(sanitized.chars().count(), 20);
        assert!(sanitized.ends_with('…'));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ServiceError::NotEnoughMergeInputs.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::JobNotFound {
                job_id: "x".to_string()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::Upload(UploadError::FileTooLarge { size: 2, max: 1 }).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_user_message_hides_internal_details() {
        let i18n = I18n::new();
        let error = ServiceError::Conversion(ConversionError::InputNotFound {
            path: PathBuf::from("/srv/secret/input.pdf"),
        });
        let message = error.user_message(&i18n, "en");
        assert!(!message.contains("/srv"));
        assert_eq!(message, "An internal error occurred");
    }

    #[test]
    fn test_validation_messages_are_fixed() {
        assert_eq!(ServiceError::NoFileProvided.to_string(), "No PDF file provided");
        assert_eq!(
            ServiceError::NotEnoughMergeInputs.to_string(),
            "At least 2 PDF files required for merging"
        );
    }

    #[test]
    fn test_format_error_chain() {
        let error = ConversionError::Spawn {
            tool: ToolKind::OcrEngine,
            source: SpawnError {
                program: "tesseract".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            },
        };
        assert_eq!(
            format_error_chain(&error),
            "Failed to start ocr-engine: Failed to spawn tesseract: no such file"
        );
    }
}

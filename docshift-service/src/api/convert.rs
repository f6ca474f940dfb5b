//! Job submission endpoint.

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{I18nError, ServiceError};
use crate::jobs::{JobKind, JobStatus};
use crate::service::{ConversionParams, UploadedFile};

use super::AppState;

/// Response for an accepted job
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub status_url: String,
    pub message: String,
}

/// Accept uploads for `operation` and queue a job
pub async fn convert_handler(
    State(state): State<Arc<AppState>>,
    Path(operation): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ConvertResponse>), I18nError> {
    let kind = JobKind::from_str(&operation).map_err(|_| {
        state.i18n_error(ServiceError::UnsupportedOperation {
            operation: operation.clone(),
        })
    })?;

    let mut files = Vec::new();
    let mut params = ConversionParams::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| state.i18n_error(invalid(e.to_string())))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" | "files" => {
                let file_name = field.file_name().unwrap_or("document").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| state.i18n_error(invalid(e.to_string())))?;
                files.push(UploadedFile { file_name, data });
            }
            _ => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| state.i18n_error(invalid(e.to_string())))?;
                apply_param(&mut params, &name, value.trim())
                    .map_err(|e| state.i18n_error(e))?;
            }
        }
    }

    let job_id = state
        .service
        .accept(kind, &params, files)
        .await
        .map_err(|e| state.i18n_error(e))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ConvertResponse {
            job_id: job_id.to_string(),
            status: JobStatus::Queued,
            status_url: format!("/api/job/{job_id}/status"),
            message: state.service.i18n.get("en", "job-accepted", None),
        }),
    ))
}

/// Fold one form field into `params`. Unknown fields are ignored.
fn apply_param(params: &mut ConversionParams, name: &str, value: &str) -> Result<(), ServiceError> {
    if value.is_empty() {
        return Ok(());
    }

    match name {
        "format" => params.format = Some(value.to_string()),
        "language" | "lang" => params.language = Some(value.to_string()),
        "dpi" => params.dpi = Some(parse_number(name, value)?),
        "page" => params.page = Some(parse_number(name, value)?),
        "oem" => params.oem = Some(parse_number(name, value)?),
        "psm" => params.psm = Some(parse_number(name, value)?),
        "confidence" => {
            params.confidence = matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
        }
        _ => {}
    }
    Ok(())
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T, ServiceError> {
    value
        .parse()
        .map_err(|_| invalid(format!("{name} must be a non-negative integer")))
}

fn invalid(message: String) -> ServiceError {
    ServiceError::InvalidRequest { message }
}

//! Job status, OCR words, listing and deletion.

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::adapters::OcrWords;
use crate::error::{I18nError, ServiceError};
use crate::jobs::{ConversionJob, JobKind, JobStatus};

use super::AppState;

/// OCR summary shown with a job
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrSummary {
    pub word_count: usize,
    pub average_confidence: Option<f32>,
}

/// Client view of a job. Never carries server paths.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub input_files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
    pub output_file: Option<String>,
    pub output_size_bytes: Option<u64>,
    pub download_url: Option<String>,
    pub ocr: Option<OcrSummary>,
    pub error: Option<String>,
}

impl From<&ConversionJob> for JobStatusResponse {
    fn from(job: &ConversionJob) -> Self {
        let output = job.output();
        Self {
            job_id: job.id.to_string(),
            kind: job.kind,
            status: job.status(),
            input_files: job.input_files.clone(),
            created_at: job.created_at,
            started_at: job.started_at(),
            completed_at: job.completed_at(),
            processing_time_ms: job.processing_time_ms(),
            output_file: output.map(|o| o.file_name.clone()),
            output_size_bytes: output.map(|o| o.size_bytes),
            download_url: output.map(|o| format!("/api/download/{}", o.file_name)),
            ocr: output.and_then(|o| o.ocr.as_ref()).map(|words| OcrSummary {
                word_count: words.word_count(),
                average_confidence: words.average_confidence,
            }),
            error: job.error().map(str::to_string),
        }
    }
}

/// Short form used by the job list
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub output_file: Option<String>,
}

/// Response for delete operations
#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

/// Get the current state of a job
pub async fn job_status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, I18nError> {
    let job = find_job(&state, &id)?;
    Ok(Json(JobStatusResponse::from(&job)))
}

/// Word-level OCR results of a completed OCR job
pub async fn job_words_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OcrWords>, I18nError> {
    let job = find_job(&state, &id)?;

    if job.kind != JobKind::Ocr {
        return Err(state.i18n_error(ServiceError::InvalidRequest {
            message: "Word results exist only for OCR jobs".to_string(),
        }));
    }
    if !job.status().is_terminal() {
        return Err(state.i18n_error(ServiceError::JobActive {
            job_id: id,
            status: job.status(),
        }));
    }

    job.output()
        .and_then(|output| output.ocr.clone())
        .map(Json)
        .ok_or_else(|| {
            state.i18n_error(ServiceError::InvalidRequest {
                message: "No word results for this job; submit with confidence=true".to_string(),
            })
        })
}

/// List all jobs, newest first
pub async fn list_jobs_handler(State(state): State<Arc<AppState>>) -> Json<Vec<JobSummary>> {
    let jobs = state
        .service
        .jobs
        .list()
        .iter()
        .map(|job| JobSummary {
            job_id: job.id.to_string(),
            kind: job.kind,
            status: job.status(),
            created_at: job.created_at,
            output_file: job.output().map(|o| o.file_name.clone()),
        })
        .collect();
    Json(jobs)
}

/// Delete a finished job and its output
pub async fn delete_job_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, I18nError> {
    let job_id = parse_job_id(&state, &id)?;
    state
        .service
        .delete_job(&job_id)
        .await
        .map_err(|e| state.i18n_error(e))?;

    Ok(Json(DeleteResponse {
        success: true,
        message: state.service.i18n.get("en", "job-deleted", None),
    }))
}

fn find_job(state: &AppState, id: &str) -> Result<ConversionJob, I18nError> {
    let job_id = parse_job_id(state, id)?;
    state
        .service
        .jobs
        .require(&job_id)
        .map_err(|e| state.i18n_error(e))
}

/// Malformed ids are reported as unknown jobs
fn parse_job_id(state: &AppState, id: &str) -> Result<Uuid, I18nError> {
    Uuid::parse_str(id).map_err(|_| {
        state.i18n_error(ServiceError::JobNotFound {
            job_id: id.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{BoundingBox, OcrWord};
    use crate::jobs::JobOutput;

    #[test]
    fn test_status_response_for_ocr_job() {
        let mut job = ConversionJob::new(
            JobKind::Ocr,
            vec!["scan.png".to_string()],
            vec!["/srv/uploads/abc_scan.png".into()],
        );
        job.start().unwrap();
        job.complete(JobOutput {
            file_name: "scan_1234abcd.txt".to_string(),
            size_bytes: 12,
            ocr: Some(OcrWords::from_words(vec![OcrWord {
                text: "Hello".to_string(),
                confidence: Some(91.5),
                page: 1,
                bbox: BoundingBox {
                    left: 1,
                    top: 2,
                    width: 3,
                    height: 4,
                },
            }])),
        })
        .unwrap();

        let json = serde_json::to_value(JobStatusResponse::from(&job)).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["kind"], "ocr");
        assert_eq!(json["downloadUrl"], "/api/download/scan_1234abcd.txt");
        assert_eq!(json["ocr"]["wordCount"], 1);
        assert_eq!(json["ocr"]["averageConfidence"], 91.5);
        assert!(json["error"].is_null());
        assert!(!json.to_string().contains("/srv/uploads"));
    }

    #[test]
    fn test_status_response_for_queued_job() {
        let job = ConversionJob::new(JobKind::Merge, vec!["a.pdf".into(), "b.pdf".into()], vec![]);
        let json = serde_json::to_value(JobStatusResponse::from(&job)).unwrap();
        assert_eq!(json["status"], "queued");
        assert!(json["startedAt"].is_null());
        assert!(json["processingTimeMs"].is_null());
        assert_eq!(json["inputFiles"].as_array().unwrap().len(), 2);
    }
}

//! Job submission and execution.
//!
//! `submit` records a queued job and returns at once. A supervising task then
//! moves the job to running, runs the adapter in a task of its own and
//! records exactly one terminal state, whatever the adapter does (including
//! panicking).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::{
    ConversionOptions, ConversionOutput, ConversionRequest, OcrOptions, OfficeOptions,
    RasterOptions,
};
use crate::error::{
    ConversionError, ServiceError, ServiceResult, format_error_chain, sanitize_diagnostic,
};
use crate::jobs::{ConversionJob, JobKind, JobOutput};
use crate::service::ConversionService;

use super::uploads::{
    StoredUpload, UploadedFile, extension_of, remove_file_quietly, remove_uploads,
    sanitize_file_name,
};

/// Longest tool diagnostic excerpt shown to clients
const MAX_DIAGNOSTIC_CHARS: usize = 160;

const IMAGE_INPUTS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

/// Operation parameters as supplied by the client, all optional
#[derive(Debug, Clone, Default)]
pub struct ConversionParams {
    pub format: Option<String>,
    pub dpi: Option<u32>,
    pub page: Option<u32>,
    pub language: Option<String>,
    pub oem: Option<u8>,
    pub psm: Option<u8>,
    pub confidence: bool,
}

/// A validated request ready to become a job
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub kind: JobKind,
    pub uploads: Vec<StoredUpload>,
    pub options: ConversionOptions,
}

impl ConversionService {
    /// Validate and store uploads, work out options and submit the job.
    ///
    /// Any failure leaves nothing behind: stored uploads are removed and no
    /// job record exists.
    pub async fn accept(
        self: &Arc<Self>,
        kind: JobKind,
        params: &ConversionParams,
        files: Vec<UploadedFile>,
    ) -> ServiceResult<Uuid> {
        let uploads = self.store_uploads(kind, files).await?;

        let options = match self.resolve_options(kind, params, &uploads[0].original_name) {
            Ok(options) => options,
            Err(e) => {
                remove_uploads(&uploads).await;
                return Err(e);
            }
        };

        let submission = JobSubmission {
            kind,
            uploads: uploads.clone(),
            options,
        };
        match self.submit(submission) {
            Ok(id) => Ok(id),
            Err(e) => {
                remove_uploads(&uploads).await;
                Err(e)
            }
        }
    }

    /// Work out adapter options for `kind` from client parameters.
    ///
    /// `first_input` is the first upload's name; it decides the default
    /// target and which conversions make sense.
    pub fn resolve_options(
        &self,
        kind: JobKind,
        params: &ConversionParams,
        first_input: &str,
    ) -> ServiceResult<ConversionOptions> {
        let input_ext = extension_of(first_input);

        let options = match kind {
            JobKind::Merge => ConversionOptions::Merge,
            JobKind::Ocr => ConversionOptions::Ocr(OcrOptions::new(
                params.language.as_deref(),
                params.oem,
                params.psm,
                params.dpi,
                params.confidence,
            )?),
            JobKind::Convert => {
                let format = match &params.format {
                    Some(format) => format.trim().to_ascii_lowercase(),
                    None => default_target(&input_ext).to_string(),
                };

                if RasterOptions::is_supported(&format) {
                    if input_ext != "pdf" && !IMAGE_INPUTS.contains(&input_ext.as_str()) {
                        return Err(invalid_request("Image output requires a PDF or image input"));
                    }
                    ConversionOptions::Raster(RasterOptions::new(&format, params.dpi, params.page)?)
                } else {
                    if format == input_ext {
                        return Err(invalid_request(&format!(
                            "File is already in {format} format"
                        )));
                    }
                    ConversionOptions::Office(OfficeOptions::new(&format)?)
                }
            }
        };

        Ok(options)
    }

    /// Queue a job and schedule it. Returns without waiting for any work.
    pub fn submit(self: &Arc<Self>, submission: JobSubmission) -> ServiceResult<Uuid> {
        let JobSubmission {
            kind,
            uploads,
            options,
        } = submission;

        if uploads.is_empty() {
            return Err(ServiceError::NoFileProvided);
        }
        if kind == JobKind::Merge && uploads.len() < 2 {
            return Err(ServiceError::NotEnoughMergeInputs);
        }
        let options_match = matches!(
            (kind, &options),
            (JobKind::Merge, ConversionOptions::Merge)
                | (JobKind::Ocr, ConversionOptions::Ocr(_))
                | (
                    JobKind::Convert,
                    ConversionOptions::Office(_) | ConversionOptions::Raster(_)
                )
        );
        if !options_match {
            return Err(ServiceError::InvalidRequest {
                message: format!("Options do not match a {kind} job"),
            });
        }

        let job = ConversionJob::new(
            kind,
            uploads.iter().map(|u| u.original_name.clone()).collect(),
            uploads.iter().map(|u| u.path.clone()).collect(),
        );
        let tag = job.tag();
        let request = ConversionRequest {
            output_name: canonical_output_name(
                kind,
                &uploads[0].original_name,
                &tag,
                options.output_extension(),
            ),
            job_key: job.staging_key(),
            inputs: job.input_paths.clone(),
            output_dir: self.output_dir(),
            timeout: self.operation_timeout(kind),
            options,
        };

        let id = self.jobs.insert(job);
        info!(job_id = %id, kind = %kind, inputs = uploads.len(), output = %request.output_name, "Job queued");

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.supervise(id, request).await;
        });

        Ok(id)
    }

    async fn supervise(self: Arc<Self>, id: Uuid, request: ConversionRequest) {
        if let Err(e) = self.jobs.start(&id) {
            // Only reachable if the record vanished or was already started
            error!(job_id = %id, error = %e, "Refusing to run job");
            remove_paths(&request.inputs).await;
            return;
        }
        info!(job_id = %id, "Job running");

        let adapter = self.adapters.for_options(&request.options);
        let worker_request = request.clone();
        let outcome = tokio::spawn(async move { adapter.convert(&worker_request).await }).await;

        // Inputs go before the terminal state is published
        remove_paths(&request.inputs).await;

        let recorded = match outcome {
            Ok(Ok(output)) => {
                info!(
                    job_id = %id,
                    output = %output.file_name,
                    size_bytes = output.size_bytes,
                    "Job completed"
                );
                self.jobs.complete(&id, job_output(output))
            }
            Ok(Err(e)) => {
                warn!(job_id = %id, error = %format_error_chain(&e), "Job failed");
                self.jobs.fail(&id, self.failure_message(&e))
            }
            Err(join_error) => {
                error!(job_id = %id, error = %join_error, "Job task did not finish");
                self.jobs
                    .fail(&id, self.i18n.get("en", "job-error-interrupted", None))
            }
        };

        if let Err(e) = recorded {
            error!(job_id = %id, error = %e, "Failed to record job outcome");
            // Nobody will ever point at the output now
            remove_file_quietly(&request.output_dir.join(&request.output_name)).await;
        }
    }

    /// Client-safe description of an adapter failure
    pub fn failure_message(&self, error: &ConversionError) -> String {
        let i18n = &self.i18n;
        match error {
            ConversionError::ToolUnavailable { tool, .. } | ConversionError::Spawn { tool, .. } => {
                i18n.format("en", "job-error-tool-unavailable", &[("tool", tool.as_ref())])
            }
            ConversionError::ProcessTimeout { timeout, .. } => i18n.format(
                "en",
                "job-error-timeout",
                &[("seconds", &timeout.as_secs().to_string())],
            ),
            ConversionError::ConversionFailed { stderr, .. } => {
                let detail = sanitize_diagnostic(stderr, MAX_DIAGNOSTIC_CHARS);
                if detail.is_empty() {
                    i18n.get("en", "job-error-failed-no-detail", None)
                } else {
                    i18n.format("en", "job-error-failed", &[("detail", &detail)])
                }
            }
            ConversionError::OutputMissing { .. } => {
                i18n.get("en", "job-error-output-missing", None)
            }
            ConversionError::InputNotFound { .. } => {
                i18n.get("en", "job-error-input-missing", None)
            }
            ConversionError::InvalidRequest { message } => i18n.format(
                "en",
                "job-error-failed",
                &[("detail", &sanitize_diagnostic(message, MAX_DIAGNOSTIC_CHARS))],
            ),
            ConversionError::Io(_) => i18n.get("en", "job-error-failed-no-detail", None),
        }
    }

    fn operation_timeout(&self, kind: JobKind) -> Option<Duration> {
        let timeouts = &self.config.timeouts;
        match kind {
            JobKind::Convert => timeouts.convert_secs,
            JobKind::Merge => timeouts.merge_secs,
            JobKind::Ocr => timeouts.ocr_secs,
        }
        .map(Duration::from_secs)
    }
}

fn invalid_request(message: &str) -> ServiceError {
    ConversionError::InvalidRequest {
        message: message.to_string(),
    }
    .into()
}

fn job_output(output: ConversionOutput) -> JobOutput {
    JobOutput {
        file_name: output.file_name,
        size_bytes: output.size_bytes,
        ocr: output.ocr,
    }
}

async fn remove_paths(paths: &[PathBuf]) {
    for path in paths {
        remove_file_quietly(path).await;
    }
}

/// Default target when the client names none
fn default_target(input_ext: &str) -> &'static str {
    match input_ext {
        "pdf" => "pptx",
        _ => "pdf",
    }
}

/// `<stem>_<tag>.<ext>`, or `merged_<tag>.pdf` for merges
pub fn canonical_output_name(kind: JobKind, original_name: &str, tag: &str, ext: &str) -> String {
    if kind == JobKind::Merge {
        return format!("merged_{tag}.pdf");
    }

    let stem = Path::new(original_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}_{tag}.{ext}", sanitize_file_name(&stem))
}

//! Conversion adapters.
//!
//! Each adapter turns a [`ConversionRequest`] into one or more invocations of
//! its external tool, then verifies and renames what the tool produced. Output
//! is staged in a job-private directory and only ever appears in the output
//! directory under its canonical name, fully written.

mod ocr;
mod office;
mod pdf;
mod raster;
mod staging;
mod tsv;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ConversionError;
use crate::toolchain::{ProcessOutcome, ProcessResult, ResolvedTool, ToolKind, ToolLocator};

pub use ocr::{OcrAdapter, OcrOptions};
pub use office::{OfficeAdapter, OfficeOptions};
pub use pdf::PdfAdapter;
pub use raster::{RasterAdapter, RasterOptions};
pub use staging::{STAGING_PREFIX, StagingDir};
pub use tsv::{BoundingBox, OcrWord, OcrWords};

/// Everything an adapter needs to run one conversion
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    /// Full job id in hex, naming the staging directory
    pub job_key: String,
    pub inputs: Vec<PathBuf>,
    pub output_dir: PathBuf,
    /// Name the result must end up under inside `output_dir`
    pub output_name: String,
    /// Overrides the tool's own timeout when set
    pub timeout: Option<Duration>,
    pub options: ConversionOptions,
}

/// Operation-specific settings; also selects the adapter
#[derive(Debug, Clone)]
pub enum ConversionOptions {
    Office(OfficeOptions),
    Raster(RasterOptions),
    Merge,
    Ocr(OcrOptions),
}

impl ConversionOptions {
    /// Extension of the file this operation produces
    pub fn output_extension(&self) -> &str {
        match self {
            ConversionOptions::Office(options) => options.extension(),
            ConversionOptions::Raster(options) => &options.format,
            ConversionOptions::Merge => "pdf",
            ConversionOptions::Ocr(_) => "txt",
        }
    }
}

/// What a successful conversion left behind
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub file_name: String,
    pub size_bytes: u64,
    pub ocr: Option<OcrWords>,
}

#[async_trait]
pub trait ConversionAdapter: Send + Sync {
    fn tool(&self) -> ToolKind;

    async fn convert(&self, request: &ConversionRequest)
    -> Result<ConversionOutput, ConversionError>;
}

/// The full adapter set, sharing one locator
pub struct Adapters {
    office: Arc<OfficeAdapter>,
    raster: Arc<RasterAdapter>,
    pdf: Arc<PdfAdapter>,
    ocr: Arc<OcrAdapter>,
}

impl Adapters {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        let pdf = Arc::new(PdfAdapter::new(Arc::clone(&locator)));
        Self {
            office: Arc::new(OfficeAdapter::new(Arc::clone(&locator))),
            raster: Arc::new(RasterAdapter::new(Arc::clone(&locator))),
            ocr: Arc::new(OcrAdapter::new(Arc::clone(&locator), Arc::clone(&pdf))),
            pdf,
        }
    }

    pub fn for_options(&self, options: &ConversionOptions) -> Arc<dyn ConversionAdapter> {
        match options {
            ConversionOptions::Office(_) => self.office.clone(),
            ConversionOptions::Raster(_) => self.raster.clone(),
            ConversionOptions::Merge => self.pdf.clone(),
            ConversionOptions::Ocr(_) => self.ocr.clone(),
        }
    }
}

/// Check the inputs are still there and make sure the output directory exists.
async fn prepare(request: &ConversionRequest) -> Result<(), ConversionError> {
    for input in &request.inputs {
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(ConversionError::InputNotFound {
                path: input.clone(),
            });
        }
    }
    tokio::fs::create_dir_all(&request.output_dir).await?;
    Ok(())
}

/// Run a resolved tool and turn anything short of a clean exit into an error.
async fn invoke(
    locator: &ToolLocator,
    tool: &ResolvedTool,
    args: &[OsString],
    timeout: Duration,
) -> Result<ProcessResult, ConversionError> {
    let result = locator
        .invoker()
        .run(&tool.path, args, timeout)
        .await
        .map_err(|source| ConversionError::Spawn {
            tool: tool.kind,
            source,
        })?;

    check_outcome(tool.kind, &result, timeout)?;
    Ok(result)
}

fn check_outcome(
    tool: ToolKind,
    result: &ProcessResult,
    timeout: Duration,
) -> Result<(), ConversionError> {
    match result.outcome {
        ProcessOutcome::Exited(0) => Ok(()),
        ProcessOutcome::TimedOut => Err(ConversionError::ProcessTimeout { tool, timeout }),
        ProcessOutcome::Exited(code) => Err(ConversionError::ConversionFailed {
            tool,
            code: Some(code),
            stderr: diagnostic_text(result),
        }),
        ProcessOutcome::Terminated => Err(ConversionError::ConversionFailed {
            tool,
            code: None,
            stderr: diagnostic_text(result),
        }),
    }
}

/// Some tools report errors on stdout; prefer stderr when it has anything.
fn diagnostic_text(result: &ProcessResult) -> String {
    if result.stderr.trim().is_empty() {
        result.stdout.clone()
    } else {
        result.stderr.clone()
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string())
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .is_some_and(|actual| actual.to_string_lossy().eq_ignore_ascii_case(ext))
}

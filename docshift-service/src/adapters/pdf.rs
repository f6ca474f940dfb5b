//! Ghostscript-backed PDF merging and page rendering.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::ConversionError;
use crate::toolchain::{ResolvedTool, ToolKind, ToolLocator};

use super::{
    ConversionAdapter, ConversionOptions, ConversionOutput, ConversionRequest, StagingDir, invoke,
    prepare,
};

const BATCH_FLAGS: &[&str] = &["-dSAFER", "-dBATCH", "-dNOPAUSE", "-dQUIET"];
const MERGED_NAME: &str = "merged.pdf";
const PAGE_PREFIX: &str = "page-";

pub struct PdfAdapter {
    locator: Arc<ToolLocator>,
}

impl PdfAdapter {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self { locator }
    }

    /// Render every page of `input` to `page-NNNN.png` inside `dir`, in page order.
    pub async fn render_pages(
        &self,
        input: &Path,
        dir: &Path,
        dpi: u32,
        timeout: Option<Duration>,
    ) -> Result<Vec<PathBuf>, ConversionError> {
        let tool = self.locator.resolve(ToolKind::PdfTool).await?;
        let args = render_args(input, dir, dpi);
        invoke(&self.locator, &tool, &args, timeout.unwrap_or(tool.timeout)).await?;

        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(PAGE_PREFIX) && name.ends_with(".png") {
                pages.push(entry.path());
            }
        }
        pages.sort();

        if pages.is_empty() {
            return Err(ConversionError::OutputMissing {
                tool: tool.kind,
                expected: format!("{PAGE_PREFIX}0001.png"),
            });
        }

        debug!(pages = pages.len(), "Rendered PDF pages");
        Ok(pages)
    }

    async fn merge_staged(
        &self,
        staging: &StagingDir,
        tool: &ResolvedTool,
        request: &ConversionRequest,
    ) -> Result<ConversionOutput, ConversionError> {
        let produced = staging.path().join(MERGED_NAME);
        let args = merge_args(&produced, &request.inputs);
        let timeout = request.timeout.unwrap_or(tool.timeout);
        info!(job = %request.job_key, inputs = request.inputs.len(), "Merging PDFs");

        invoke(&self.locator, tool, &args, timeout).await?;

        let size_bytes = staging
            .promote(tool.kind, &produced, &request.output_dir, &request.output_name)
            .await?;

        Ok(ConversionOutput {
            file_name: request.output_name.clone(),
            size_bytes,
            ocr: None,
        })
    }
}

#[async_trait]
impl ConversionAdapter for PdfAdapter {
    fn tool(&self) -> ToolKind {
        ToolKind::PdfTool
    }

    async fn convert(
        &self,
        request: &ConversionRequest,
    ) -> Result<ConversionOutput, ConversionError> {
        if !matches!(request.options, ConversionOptions::Merge) {
            return Err(ConversionError::InvalidRequest {
                message: "pdf adapter only merges".to_string(),
            });
        }
        if request.inputs.len() < 2 {
            return Err(ConversionError::InvalidRequest {
                message: "merging needs at least two inputs".to_string(),
            });
        }

        prepare(request).await?;
        let tool = self.locator.resolve(self.tool()).await?;
        let staging = StagingDir::create(&request.output_dir, &request.job_key).await?;
        let result = self.merge_staged(&staging, &tool, request).await;
        staging.close().await;
        result
    }
}

fn output_file_arg(path: &Path) -> OsString {
    let mut arg = OsString::from("-sOutputFile=");
    arg.push(path.as_os_str());
    arg
}

fn merge_args(produced: &Path, inputs: &[PathBuf]) -> Vec<OsString> {
    let mut args: Vec<OsString> = BATCH_FLAGS.iter().map(OsString::from).collect();
    args.push("-sDEVICE=pdfwrite".into());
    args.push(output_file_arg(produced));
    args.extend(inputs.iter().map(|input| input.as_os_str().to_owned()));
    args
}

fn render_args(input: &Path, dir: &Path, dpi: u32) -> Vec<OsString> {
    let mut args: Vec<OsString> = BATCH_FLAGS.iter().map(OsString::from).collect();
    args.push("-sDEVICE=png16m".into());
    args.push(format!("-r{dpi}").into());
    args.push(output_file_arg(&dir.join(format!("{PAGE_PREFIX}%04d.png"))));
    args.push(input.as_os_str().to_owned());
    args
}

//! ImageMagick-backed rasterisation and image format conversion.

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::ConversionError;
use crate::toolchain::{ResolvedTool, ToolKind, ToolLocator};

use super::{
    ConversionAdapter, ConversionOptions, ConversionOutput, ConversionRequest, StagingDir,
    file_stem, invoke, prepare,
};

const RASTER_FORMATS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];
const MIN_DPI: u32 = 36;
const MAX_DPI: u32 = 600;
pub const DEFAULT_DPI: u32 = 150;
const JPEG_QUALITY: &str = "92";

#[derive(Debug, Clone)]
pub struct RasterOptions {
    pub format: String,
    pub dpi: u32,
    /// Zero-based page (or frame) to render
    pub page: u32,
}

impl RasterOptions {
    pub fn new(format: &str, dpi: Option<u32>, page: Option<u32>) -> Result<Self, ConversionError> {
        let format = format.trim().to_ascii_lowercase();
        if !Self::is_supported(&format) {
            return Err(ConversionError::InvalidRequest {
                message: format!("Unsupported image format: {format}"),
            });
        }

        let dpi = dpi.unwrap_or(DEFAULT_DPI);
        if !(MIN_DPI..=MAX_DPI).contains(&dpi) {
            return Err(ConversionError::InvalidRequest {
                message: format!("DPI must be between {MIN_DPI} and {MAX_DPI}"),
            });
        }

        Ok(Self {
            format,
            dpi,
            page: page.unwrap_or(0),
        })
    }

    pub fn is_supported(format: &str) -> bool {
        RASTER_FORMATS.contains(&format.to_ascii_lowercase().as_str())
    }
}

pub struct RasterAdapter {
    locator: Arc<ToolLocator>,
}

impl RasterAdapter {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self { locator }
    }

    fn build_args(input: &Path, produced: &Path, options: &RasterOptions) -> Vec<OsString> {
        let mut source = input.as_os_str().to_owned();
        source.push(format!("[{}]", options.page));

        let mut args: Vec<OsString> = vec![
            "-density".into(),
            options.dpi.to_string().into(),
            source,
            "-background".into(),
            "white".into(),
            "-alpha".into(),
            "remove".into(),
            "-alpha".into(),
            "off".into(),
        ];
        if matches!(options.format.as_str(), "jpg" | "jpeg") {
            args.push("-quality".into());
            args.push(JPEG_QUALITY.into());
        }
        args.push(produced.as_os_str().to_owned());
        args
    }

    async fn convert_staged(
        &self,
        staging: &StagingDir,
        tool: &ResolvedTool,
        input: &Path,
        options: &RasterOptions,
        request: &ConversionRequest,
    ) -> Result<ConversionOutput, ConversionError> {
        let produced = staging
            .path()
            .join(format!("{}.{}", file_stem(input), options.format));
        let args = Self::build_args(input, &produced, options);
        let timeout = request.timeout.unwrap_or(tool.timeout);
        info!(job = %request.job_key, format = %options.format, dpi = options.dpi, page = options.page, "Running raster conversion");

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
impl ConversionAdapter for RasterAdapter {
    fn tool(&self) -> ToolKind {
        ToolKind::RasterTool
    }

    async fn convert(
        &self,
        request: &ConversionRequest,
    ) -> Result<ConversionOutput, ConversionError> {
        let ConversionOptions::Raster(options) = &request.options else {
            return Err(ConversionError::InvalidRequest {
                message: "raster conversion requires raster options".to_string(),
            });
        };
        let [input] = request.inputs.as_slice() else {
            return Err(ConversionError::InvalidRequest {
                message: "raster conversion takes exactly one input".to_string(),
            });
        };

        prepare(request).await?;
        let tool = self.locator.resolve(self.tool()).await?;
        let staging = StagingDir::create(&request.output_dir, &request.job_key).await?;
        let result = self
            .convert_staged(&staging, &tool, input, options, request)
            .await;
        staging.close().await;
        result
    }
}

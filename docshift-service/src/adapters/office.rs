//! LibreOffice-backed document conversion.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::ConversionError;
use crate::toolchain::{ResolvedTool, ToolKind, ToolLocator};

use super::{
    ConversionAdapter, ConversionOptions, ConversionOutput, ConversionRequest, StagingDir,
    file_stem, has_extension, invoke, prepare,
};

/// Target formats LibreOffice can export to
const OFFICE_FORMATS: &[&str] = &[
    "pdf", "docx", "doc", "odt", "rtf", "txt", "html", "pptx", "ppt", "odp", "xlsx", "xls",
    "ods", "csv",
];

const PRESENTATION_FORMATS: &[&str] = &["pptx", "ppt", "odp"];
const TEXT_FORMATS: &[&str] = &["docx", "doc", "odt", "rtf", "txt", "html"];

/// LibreOffice prints this, and still exits 0, when it has no route to the target
const NO_EXPORT_FILTER: &str = "no export filter";

#[derive(Debug, Clone)]
pub struct OfficeOptions {
    format: String,
}

impl OfficeOptions {
    pub fn new(format: &str) -> Result<Self, ConversionError> {
        let format = format.trim().to_ascii_lowercase();
        if !OFFICE_FORMATS.contains(&format.as_str()) {
            return Err(ConversionError::InvalidRequest {
                message: format!("Unsupported target format: {format}"),
            });
        }
        Ok(Self { format })
    }

    pub fn extension(&self) -> &str {
        &self.format
    }
}

pub struct OfficeAdapter {
    locator: Arc<ToolLocator>,
}

impl OfficeAdapter {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self { locator }
    }

    fn build_args(input: &Path, staging: &Path, options: &OfficeOptions) -> Vec<OsString> {
        // Separate profile per job so concurrent instances do not fight over the lock
        let profile = staging.join("profile");
        let mut args: Vec<OsString> = vec![
            format!("-env:UserInstallation={}", file_url(&profile)).into(),
            "--headless".into(),
            "--norestore".into(),
        ];

        if let Some(filter) = import_filter(input, &options.format) {
            args.push(format!("--infilter={filter}").into());
        }

        args.push("--convert-to".into());
        args.push(options.format.clone().into());
        args.push("--outdir".into());
        args.push(staging.as_os_str().to_owned());
        args.push(input.as_os_str().to_owned());
        args
    }

    async fn convert_staged(
        &self,
        staging: &StagingDir,
        tool: &ResolvedTool,
        input: &Path,
        options: &OfficeOptions,
        request: &ConversionRequest,
    ) -> Result<ConversionOutput, ConversionError> {
        let args = Self::build_args(input, staging.path(), options);
        let timeout = request.timeout.unwrap_or(tool.timeout);
        info!(job = %request.job_key, format = %options.format, "Running office conversion");

        let result = invoke(&self.locator, tool, &args, timeout).await?;
        if result.stderr.to_ascii_lowercase().contains(NO_EXPORT_FILTER) {
            warn!(job = %request.job_key, format = %options.format, "No export filter for conversion");
            return Err(ConversionError::ConversionFailed {
                tool: tool.kind,
                code: result.exit_code(),
                stderr: result.stderr,
            });
        }

        let produced = expected_output(staging.path(), input, &options.format);
        debug!(job = %request.job_key, produced = %produced.display(), "Expecting office output");

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
impl ConversionAdapter for OfficeAdapter {
    fn tool(&self) -> ToolKind {
        ToolKind::OfficeConverter
    }

    async fn convert(
        &self,
        request: &ConversionRequest,
    ) -> Result<ConversionOutput, ConversionError> {
        let ConversionOptions::Office(options) = &request.options else {
            return Err(ConversionError::InvalidRequest {
                message: "office conversion requires office options".to_string(),
            });
        };
        let [input] = request.inputs.as_slice() else {
            return Err(ConversionError::InvalidRequest {
                message: "office conversion takes exactly one input".to_string(),
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

/// LibreOffice names its output after the input with the extension replaced
fn expected_output(staging: &Path, input: &Path, format: &str) -> PathBuf {
    staging.join(format!("{}.{format}", file_stem(input)))
}

/// PDFs open in Draw by default; other targets need an explicit import filter.
fn import_filter(input: &Path, format: &str) -> Option<&'static str> {
    if !has_extension(input, "pdf") {
        return None;
    }
    if PRESENTATION_FORMATS.contains(&format) {
        Some("impress_pdf_import")
    } else if TEXT_FORMATS.contains(&format) {
        Some("writer_pdf_import")
    } else {
        None
    }
}

fn file_url(path: &Path) -> String {
    let display = path.to_string_lossy().replace('\\', "/");
    if display.starts_with('/') {
        format!("file://{display}")
    } else {
        format!("file:///{display}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_as_strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(OfficeOptions::new("exe").is_err());
        assert_eq!(OfficeOptions::new(" PPTX ").unwrap().extension(), "pptx");
    }

    #[test]
    fn test_pdf_to_presentation_args() {
        let options = OfficeOptions::new("pptx").unwrap();
        let args = OfficeAdapter::build_args(
            Path::new("/data/uploads/abc_deck.pdf"),
            Path::new("/data/outputs/.staging-1234abcd"),
            &options,
        );

        assert_eq!(
            args_as_strings(&args),
            vec![
                "-env:UserInstallation=file:///data/outputs/.staging-1234abcd/profile",
                "--headless",
                "--norestore",
                "--infilter=impress_pdf_import",
                "--convert-to",
                "pptx",
                "--outdir",
                "/data/outputs/.staging-1234abcd",
                "/data/uploads/abc_deck.pdf",
            ]
        );
    }

    #[test]
    fn test_import_filter_selection() {
        assert_eq!(import_filter(Path::new("a.PDF"), "docx"), Some("writer_pdf_import"));
        assert_eq!(import_filter(Path::new("a.pdf"), "png"), None);
        assert_eq!(import_filter(Path::new("a.docx"), "pptx"), None);
    }

    #[test]
    fn test_expected_output_replaces_extension() {
        assert_eq!(
            expected_output(Path::new("/s"), Path::new("/u/abc_report.final.docx"), "pdf"),
            PathBuf::from("/s/abc_report.final.pdf")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_no_export_filter_fails_despite_exit_zero() {
        use crate::toolchain::{ProcessInvoker, ToolDescriptor};
        use std::time::Duration;

        let dir = tempfile::TempDir::new().unwrap();
        let soffice = crate::test_support::write_script(
            dir.path(),
            "soffice",
            "echo 'Error: no export filter for /tmp/x found, aborting.' >&2",
        );
        let input = dir.path().join("deck.pdf");
        std::fs::write(&input, b"%PDF-1.4").unwrap();

        let locator = Arc::new(ToolLocator::with_descriptors(
            [ToolDescriptor::with_candidates(ToolKind::OfficeConverter, vec![soffice])],
            ProcessInvoker::new(Duration::from_millis(200)),
        ));
        let adapter = OfficeAdapter::new(locator);
        let request = ConversionRequest {
            job_key: "0badf00d".to_string(),
            inputs: vec![input],
            output_dir: dir.path().join("out"),
            output_name: "deck_0badf00d.pptx".to_string(),
            timeout: None,
            options: ConversionOptions::Office(OfficeOptions::new("pptx").unwrap()),
        };

        let err = adapter.convert(&request).await.unwrap_err();
        assert!(matches!(err, ConversionError::ConversionFailed { code: Some(0), .. }));
        assert!(!dir.path().join("out").join(".staging-0badf00d").exists());
    }
}

//! Tesseract-backed text recognition, for images and multi-page PDFs.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ConversionError;
use crate::toolchain::{ResolvedTool, ToolKind, ToolLocator};

use super::tsv::parse_tsv;
use super::{
    ConversionAdapter, ConversionOptions, ConversionOutput, ConversionRequest, OcrWord, OcrWords,
    PdfAdapter, StagingDir, file_stem, has_extension, invoke, prepare,
};

const DEFAULT_LANGUAGE: &str = "eng";
const DEFAULT_OEM: u8 = 3;
const DEFAULT_PSM: u8 = 3;
const DEFAULT_DPI: u32 = 300;
const MAX_LANGUAGE_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct OcrOptions {
    /// Tesseract language spec, e.g. `eng` or `eng+deu`
    pub language: String,
    pub oem: u8,
    pub psm: u8,
    /// Resolution PDF pages are rendered at before recognition
    pub dpi: u32,
    pub with_confidence: bool,
}

impl OcrOptions {
    pub fn new(
        language: Option<&str>,
        oem: Option<u8>,
        psm: Option<u8>,
        dpi: Option<u32>,
        with_confidence: bool,
    ) -> Result<Self, ConversionError> {
        let language = language
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .unwrap_or(DEFAULT_LANGUAGE)
            .to_string();
        let valid_language = language.len() <= MAX_LANGUAGE_LEN
            && language
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+');
        if !valid_language {
            return Err(invalid(format!("Invalid OCR language: {language}")));
        }

        let oem = oem.unwrap_or(DEFAULT_OEM);
        if oem > 3 {
            return Err(invalid("OCR engine mode must be between 0 and 3".to_string()));
        }
        let psm = psm.unwrap_or(DEFAULT_PSM);
        if psm > 13 {
            return Err(invalid("Page segmentation mode must be between 0 and 13".to_string()));
        }
        let dpi = dpi.unwrap_or(DEFAULT_DPI);
        if !(72..=600).contains(&dpi) {
            return Err(invalid("OCR DPI must be between 72 and 600".to_string()));
        }

        Ok(Self {
            language,
            oem,
            psm,
            dpi,
            with_confidence,
        })
    }
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            oem: DEFAULT_OEM,
            psm: DEFAULT_PSM,
            dpi: DEFAULT_DPI,
            with_confidence: false,
        }
    }
}

fn invalid(message: String) -> ConversionError {
    ConversionError::InvalidRequest { message }
}

/// One time budget shared by every tool run of an OCR job
struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// Time left for the next run, or a timeout once the budget is spent
    fn remaining(&self, tool: ToolKind) -> Result<Duration, ConversionError> {
        let left = self.budget.saturating_sub(self.started.elapsed());
        if left.is_zero() {
            return Err(ConversionError::ProcessTimeout {
                tool,
                timeout: self.budget,
            });
        }
        Ok(left)
    }

    /// Timeouts are reported against the whole budget, not the slice a run got
    fn restate(&self, err: ConversionError) -> ConversionError {
        match err {
            ConversionError::ProcessTimeout { tool, .. } => ConversionError::ProcessTimeout {
                tool,
                timeout: self.budget,
            },
            other => other,
        }
    }
}

pub struct OcrAdapter {
    locator: Arc<ToolLocator>,
    pdf: Arc<PdfAdapter>,
}

impl OcrAdapter {
    pub fn new(locator: Arc<ToolLocator>, pdf: Arc<PdfAdapter>) -> Self {
        Self { locator, pdf }
    }

    fn build_args(image: &Path, base: &Path, options: &OcrOptions, tsv: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            image.as_os_str().to_owned(),
            base.as_os_str().to_owned(),
            "-l".into(),
            options.language.clone().into(),
            "--oem".into(),
            options.oem.to_string().into(),
            "--psm".into(),
            options.psm.to_string().into(),
        ];
        if tsv {
            args.push("tsv".into());
        }
        args
    }

    /// Recognise one image; returns its text and, if asked, its words.
    async fn recognise_page(
        &self,
        tool: &ResolvedTool,
        image: &Path,
        base: &Path,
        page: u32,
        options: &OcrOptions,
        deadline: &Deadline,
    ) -> Result<(String, Vec<OcrWord>), ConversionError> {
        invoke(
            &self.locator,
            tool,
            &Self::build_args(image, base, options, false),
            deadline.remaining(tool.kind)?,
        )
        .await
        .map_err(|e| deadline.restate(e))?;
        let text_path = with_suffix(base, "txt");
        let text = match tokio::fs::read_to_string(&text_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConversionError::OutputMissing {
                    tool: tool.kind,
                    expected: file_name(&text_path),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if !options.with_confidence {
            return Ok((text, Vec::new()));
        }

        let tsv_path = with_suffix(base, "tsv");
        let tsv_run = invoke(
            &self.locator,
            tool,
            &Self::build_args(image, base, options, true),
            deadline.remaining(tool.kind)?,
        )
        .await;
        let content = match tsv_run {
            Ok(_) => tokio::fs::read_to_string(&tsv_path).await,
            Err(e @ ConversionError::ProcessTimeout { .. }) => {
                remove_quietly(&tsv_path).await;
                return Err(deadline.restate(e));
            }
            Err(e) => Err(io::Error::other(e.to_string())),
        };
        remove_quietly(&tsv_path).await;

        let words = match content {
            Ok(content) => parse_tsv(&content, Some(page)),
            Err(e) => {
                // Text is still usable without confidences
                warn!(image = %image.display(), page, error = %e, "Word confidence extraction failed");
                Vec::new()
            }
        };
        Ok((text, words))
    }

    /// Render and recognise every page within one shared time budget.
    async fn recognise_staged(
        &self,
        staging: &StagingDir,
        tool: &ResolvedTool,
        input: &Path,
        options: &OcrOptions,
        request: &ConversionRequest,
    ) -> Result<ConversionOutput, ConversionError> {
        let deadline = Deadline::new(request.timeout.unwrap_or(tool.timeout));

        let pages: Vec<PathBuf> = if has_extension(input, "pdf") {
            let pages_dir = staging.path().join("pages");
            tokio::fs::create_dir_all(&pages_dir).await?;
            let budget = deadline.remaining(ToolKind::PdfTool)?;
            self.pdf
                .render_pages(input, &pages_dir, options.dpi, Some(budget))
                .await
                .map_err(|e| deadline.restate(e))?
        } else {
            vec![input.to_path_buf()]
        };
        info!(job = %request.job_key, pages = pages.len(), language = %options.language, "Running OCR");

        let mut text = String::new();
        let mut words = Vec::new();
        for (index, image) in pages.iter().enumerate() {
            let page = index as u32 + 1;
            let base = staging.path().join(format!("ocr-{page:04}"));
            let (page_text, page_words) = self
                .recognise_page(tool, image, &base, page, options, &deadline)
                .await?;
            debug!(job = %request.job_key, page, chars = page_text.len(), words = page_words.len(), "Recognised page");
            text.push_str(&page_text);
            words.extend(page_words);
        }

        let produced = staging.path().join(format!("{}.txt", file_stem(input)));
        tokio::fs::write(&produced, text.as_bytes()).await?;
        let size_bytes = staging
            .promote(tool.kind, &produced, &request.output_dir, &request.output_name)
            .await?;

        Ok(ConversionOutput {
            file_name: request.output_name.clone(),
            size_bytes,
            ocr: options
                .with_confidence
                .then(|| OcrWords::from_words(words)),
        })
    }
}

#[async_trait]
impl ConversionAdapter for OcrAdapter {
    fn tool(&self) -> ToolKind {
        ToolKind::OcrEngine
    }

    async fn convert(
        &self,
        request: &ConversionRequest,
    ) -> Result<ConversionOutput, ConversionError> {
        let ConversionOptions::Ocr(options) = &request.options else {
            return Err(invalid("ocr requires ocr options".to_string()));
        };
        let [input] = request.inputs.as_slice() else {
            return Err(invalid("ocr takes exactly one input".to_string()));
        };

        prepare(request).await?;
        let tool = self.locator.resolve(self.tool()).await?;
        let staging = StagingDir::create(&request.output_dir, &request.job_key).await?;
        let result = self
            .recognise_staged(&staging, &tool, input, options, request)
            .await;
        staging.close().await;
        result
    }
}

fn with_suffix(base: &Path, ext: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(".");
    path.push(ext);
    PathBuf::from(path)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove temporary OCR output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults_and_validation() {
        let options = OcrOptions::new(None, None, None, None, false).unwrap();
        assert_eq!(options.language, "eng");
        assert_eq!((options.oem, options.psm, options.dpi), (3, 3, 300));

        assert!(OcrOptions::new(Some("eng+deu"), Some(1), Some(6), None, true).is_ok());
        assert!(OcrOptions::new(Some("eng; rm -rf"), None, None, None, false).is_err());
        assert!(OcrOptions::new(None, Some(4), None, None, false).is_err());
        assert!(OcrOptions::new(None, None, Some(14), None, false).is_err());
    }

    #[test]
    fn test_args() {
        let options = OcrOptions::default();
        let args: Vec<String> = OcrAdapter::build_args(
            Path::new("/s/page.png"),
            Path::new("/s/ocr-0001"),
            &options,
            true,
        )
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
        assert_eq!(
            args,
            vec!["/s/page.png", "/s/ocr-0001", "-l", "eng", "--oem", "3", "--psm", "3", "tsv"]
        );
    }

    #[cfg(unix)]
    mod with_stand_in_tools {
        use super::*;
        use crate::toolchain::{ProcessInvoker, ToolDescriptor};
        use std::time::Duration;
        use tempfile::TempDir;

        /// Writes `<base>.txt`, or `<base>.tsv` when the last argument is `tsv`.
        const FAKE_TESSERACT: &str = r#"base="$2"
for last in "$@"; do :; done
if [ "$last" = "tsv" ]; then
  printf 'level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n' > "$base.tsv"
  printf '1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t\n' >> "$base.tsv"
  printf '5\t1\t1\t1\t1\t1\t1\t2\t3\t4\t92\tHello\n' >> "$base.tsv"
  printf '5\t1\t1\t1\t1\t2\t5\t2\t3\t4\t88\tWorld\n' >> "$base.tsv"
else
  printf 'Hello World\n' > "$base.txt"
fi"#;

        const FAKE_GS: &str = r#"for arg in "$@"; do
  case "$arg" in
    -sOutputFile=*) pattern="${arg#-sOutputFile=}" ;;
  esac
done
for n in 1 2; do
  printf 'png' > "$(printf "$pattern" "$n")"
done"#;

        fn adapter(dir: &Path) -> OcrAdapter {
            let tesseract = crate::test_support::write_script(dir, "tesseract", FAKE_TESSERACT);
            let gs = crate::test_support::write_script(dir, "gs", FAKE_GS);
            let locator = Arc::new(ToolLocator::with_descriptors(
                [
                    ToolDescriptor::with_candidates(ToolKind::OcrEngine, vec![tesseract]),
                    ToolDescriptor::with_candidates(ToolKind::PdfTool, vec![gs]),
                ],
                ProcessInvoker::new(Duration::from_millis(200)),
            ));
            let pdf = Arc::new(PdfAdapter::new(Arc::clone(&locator)));
            OcrAdapter::new(locator, pdf)
        }

        fn request(input: PathBuf, out: PathBuf, with_confidence: bool) -> ConversionRequest {
            ConversionRequest {
                job_key: "c0ffee00".to_string(),
                inputs: vec![input],
                output_dir: out,
                output_name: "scan_c0ffee00.txt".to_string(),
                timeout: None,
                options: ConversionOptions::Ocr(OcrOptions {
                    with_confidence,
                    ..OcrOptions::default()
                }),
            }
        }

        #[tokio::test]
        async fn test_image_with_confidence() {
            let dir = TempDir::new().unwrap();
            let input = dir.path().join("scan.png");
            std::fs::write(&input, b"png").unwrap();
            let out = dir.path().join("out");

            let output = adapter(dir.path())
                .convert(&request(input, out.clone(), true))
                .await
                .unwrap();

            let ocr = output.ocr.unwrap();
            assert_eq!(ocr.word_count(), 2);
            assert_eq!(ocr.average_confidence, Some(90.0));
            assert_eq!(
                std::fs::read_to_string(out.join("scan_c0ffee00.txt")).unwrap(),
                "Hello World\n"
            );
            assert!(!out.join(".staging-c0ffee00").exists());
        }

        #[tokio::test]
        async fn test_timeout_covers_every_run_of_the_job() {
            let dir = TempDir::new().unwrap();
            let slow = format!("sleep 1\n{FAKE_TESSERACT}");
            let tesseract = crate::test_support::write_script(dir.path(), "tesseract", &slow);
            let locator = Arc::new(ToolLocator::with_descriptors(
                [ToolDescriptor::with_candidates(ToolKind::OcrEngine, vec![tesseract])],
                ProcessInvoker::new(Duration::from_millis(200)),
            ));
            let pdf = Arc::new(PdfAdapter::new(Arc::clone(&locator)));
            let input = dir.path().join("scan.png");
            std::fs::write(&input, b"png").unwrap();
            let out = dir.path().join("out");

            // Each run fits the budget on its own; text plus words does not
            let mut request = request(input, out.clone(), true);
            request.timeout = Some(Duration::from_millis(1500));
            let started = std::time::Instant::now();
            let err = OcrAdapter::new(locator, pdf)
                .convert(&request)
                .await
                .unwrap_err();

            assert!(matches!(
                err,
                ConversionError::ProcessTimeout { tool: ToolKind::OcrEngine, timeout }
                    if timeout == Duration::from_millis(1500)
            ));
            assert!(started.elapsed() < Duration::from_secs(4));
            assert!(!out.join("scan_c0ffee00.txt").exists());
        }

        #[tokio::test]
        async fn test_pdf_pages_are_concatenated() {
            let dir = TempDir::new().unwrap();
            let input = dir.path().join("scan.pdf");
            std::fs::write(&input, b"%PDF-1.4").unwrap();
            let out = dir.path().join("out");

            let output = adapter(dir.path())
                .convert(&request(input, out.clone(), true))
                .await
                .unwrap();

            assert_eq!(
                std::fs::read_to_string(out.join("scan_c0ffee00.txt")).unwrap(),
                "Hello World\nHello World\n"
            );
            let ocr = output.ocr.unwrap();
            let pages: Vec<u32> = ocr.words.iter().map(|w| w.page).collect();
            assert_eq!(pages, vec![1, 1, 2, 2]);
        }
    }
}

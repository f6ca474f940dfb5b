//! Static description of an external tool dependency.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::ToolConfig;

use super::ToolKind;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One external dependency: where it might live and how long it may run.
///
/// Built once at startup and never mutated. The candidate list is ordered:
/// configured override, platform install locations, bare command names (for
/// search-path resolution). It is never empty.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    kind: ToolKind,
    candidates: Vec<PathBuf>,
    version_args: Vec<String>,
    timeout: Duration,
    probe_timeout: Duration,
    enabled: bool,
}

impl ToolDescriptor {
    /// Build the descriptor for `kind` from its configuration block.
    pub fn from_config(kind: ToolKind, config: &ToolConfig) -> Self {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(path) = &config.path {
            candidates.push(path.clone());
        }
        candidates.extend(platform_locations(kind).iter().map(PathBuf::from));
        candidates.extend(command_names(kind).iter().map(PathBuf::from));

        Self {
            kind,
            candidates,
            version_args: version_args(kind),
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| default_timeout(kind)),
            probe_timeout: config
                .probe_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_PROBE_TIMEOUT),
            enabled: config.enabled,
        }
    }

    /// Build a descriptor with an explicit candidate list. An empty list falls
    /// back to the tool's bare command names.
    pub fn with_candidates(kind: ToolKind, candidates: Vec<PathBuf>) -> Self {
        let candidates = if candidates.is_empty() {
            command_names(kind).iter().map(PathBuf::from).collect()
        } else {
            candidates
        };

        Self {
            kind,
            candidates,
            version_args: version_args(kind),
            timeout: default_timeout(kind),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            enabled: true,
        }
    }

    pub fn with_timeouts(mut self, timeout: Duration, probe_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    pub fn version_args(&self) -> &[String] {
        &self.version_args
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

fn version_args(kind: ToolKind) -> Vec<String> {
    let flag = match kind {
        ToolKind::RasterTool => "-version",
        _ => "--version",
    };
    vec![flag.to_string()]
}

fn default_timeout(kind: ToolKind) -> Duration {
    match kind {
        ToolKind::OfficeConverter => Duration::from_secs(30),
        ToolKind::OcrEngine => Duration::from_secs(120),
        ToolKind::RasterTool | ToolKind::PdfTool => Duration::from_secs(60),
    }
}

fn platform_locations(kind: ToolKind) -> &'static [&'static str] {
    if cfg!(target_os = "windows") {
        match kind {
            ToolKind::OfficeConverter => &[
                "C:\\Program Files\\LibreOffice\\program\\soffice.exe",
                "C:\\Program Files (x86)\\LibreOffice\\program\\soffice.exe",
            ],
            ToolKind::OcrEngine => &[
                "C:\\Program Files\\Tesseract-OCR\\tesseract.exe",
                "C:\\Program Files (x86)\\Tesseract-OCR\\tesseract.exe",
            ],
            ToolKind::RasterTool => &["C:\\Program Files\\ImageMagick\\magick.exe"],
            ToolKind::PdfTool => &["C:\\Program Files\\gs\\bin\\gswin64c.exe"],
        }
    } else if cfg!(target_os = "macos") {
        match kind {
            ToolKind::OfficeConverter => &["/Applications/LibreOffice.app/Contents/MacOS/soffice"],
            ToolKind::OcrEngine => &["/opt/homebrew/bin/tesseract", "/usr/local/bin/tesseract"],
            ToolKind::RasterTool => &["/opt/homebrew/bin/magick", "/usr/local/bin/magick"],
            ToolKind::PdfTool => &["/opt/homebrew/bin/gs", "/usr/local/bin/gs"],
        }
    } else {
        match kind {
            ToolKind::OfficeConverter => &[
                "/usr/bin/soffice",
                "/usr/bin/libreoffice",
                "/usr/lib/libreoffice/program/soffice",
                "/opt/libreoffice/program/soffice",
                "/snap/bin/libreoffice",
            ],
            ToolKind::OcrEngine => &["/usr/bin/tesseract", "/usr/local/bin/tesseract"],
            ToolKind::RasterTool => &[
                "/usr/bin/magick",
                "/usr/local/bin/magick",
                "/usr/bin/convert",
            ],
            ToolKind::PdfTool => &["/usr/bin/gs", "/usr/local/bin/gs"],
        }
    }
}

fn command_names(kind: ToolKind) -> &'static [&'static str] {
    match kind {
        ToolKind::OfficeConverter => &["soffice", "libreoffice"],
        ToolKind::OcrEngine => &["tesseract"],
        ToolKind::RasterTool if cfg!(target_os = "windows") => &["magick"],
        ToolKind::RasterTool => &["magick", "convert"],
        ToolKind::PdfTool if cfg!(target_os = "windows") => &["gswin64c", "gswin32c"],
        ToolKind::PdfTool => &["gs"],
    }
}

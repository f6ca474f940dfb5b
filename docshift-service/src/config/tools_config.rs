//! External tool settings: path overrides, availability flags and timeouts.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::toolchain::ToolKind;

/// Per-tool configuration block (`tools.office`, `tools.ocr`, ...)
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    /// Explicit executable path. Tried before any built-in location.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub probe_timeout_secs: Option<u64>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            path: None,
            enabled: default_enabled(),
            timeout_secs: None,
            probe_timeout_secs: None,
        }
    }
}

/// All external tool settings
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// LibreOffice
    #[serde(default)]
    pub office: ToolConfig,

    /// Tesseract
    #[serde(default)]
    pub ocr: ToolConfig,

    /// ImageMagick
    #[serde(default)]
    pub raster: ToolConfig,

    /// Ghostscript
    #[serde(default)]
    pub pdf: ToolConfig,

    /// Time a tool gets to exit after SIGTERM before it is killed outright
    #[serde(default = "default_kill_grace_millis")]
    pub kill_grace_millis: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            office: ToolConfig::default(),
            ocr: ToolConfig::default(),
            raster: ToolConfig::default(),
            pdf: ToolConfig::default(),
            kill_grace_millis: default_kill_grace_millis(),
        }
    }
}

impl ToolsConfig {
    pub fn get(&self, kind: ToolKind) -> &ToolConfig {
        match kind {
            ToolKind::OfficeConverter => &self.office,
            ToolKind::OcrEngine => &self.ocr,
            ToolKind::RasterTool => &self.raster,
            ToolKind::PdfTool => &self.pdf,
        }
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_millis)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_kill_grace_millis() -> u64 {
    2000
}

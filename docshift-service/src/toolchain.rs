//! External executables: where to find them and how to run them.
//!
//! - [`ToolDescriptor`] describes one dependency and its candidate paths
//! - [`ToolLocator`] resolves descriptors to executables (cached, re-probeable)
//! - [`ProcessInvoker`] runs an executable under a timeout with captured output

mod descriptor;
mod invoker;
mod locator;

use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter, EnumString};

pub use descriptor::ToolDescriptor;
pub use invoker::{ProcessInvoker, ProcessOutcome, ProcessResult};
pub use locator::{ResolvedTool, ToolLocator, ToolStatus};

/// Logical names for the external tools this service drives
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ToolKind {
    /// LibreOffice (office document conversion)
    OfficeConverter,
    /// Tesseract (text recognition)
    OcrEngine,
    /// ImageMagick (rasterisation and image formats)
    RasterTool,
    /// Ghostscript (PDF merge and page rendering)
    PdfTool,
}

//! Job-private scratch directories for tool output.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ConversionError;
use crate::toolchain::ToolKind;

/// Name prefix of staging directories inside the output directory
pub const STAGING_PREFIX: &str = ".staging-";

/// A hidden directory next to the final outputs where tools write.
///
/// Living on the same filesystem as the output directory makes the final
/// `rename` atomic. Adapters remove it with [`StagingDir::close`]; a guard
/// dropped without closing (cancelled job, panic) removes it in the background.
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
    closed: bool,
}

impl StagingDir {
    pub async fn create(output_dir: &Path, job_key: &str) -> io::Result<Self> {
        let path = output_dir.join(format!("{STAGING_PREFIX}{job_key}"));
        tokio::fs::create_dir_all(&path).await?;
        debug!(path = %path.display(), "Created staging directory");
        Ok(Self {
            path,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move `produced` into `output_dir` as `canonical` and return its size.
    ///
    /// A missing or empty file counts as no output, whatever the tool's exit
    /// code said.
    pub async fn promote(
        &self,
        tool: ToolKind,
        produced: &Path,
        output_dir: &Path,
        canonical: &str,
    ) -> Result<u64, ConversionError> {
        let expected = produced
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let size = match tokio::fs::metadata(produced).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
            Ok(_) => return Err(ConversionError::OutputMissing { tool, expected }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConversionError::OutputMissing { tool, expected });
            }
            Err(e) => return Err(e.into()),
        };

        let target = output_dir.join(canonical);
        tokio::fs::rename(produced, &target).await?;
        debug!(from = %produced.display(), to = %target.display(), size, "Promoted output");
        Ok(size)
    }

    /// Remove the directory and whatever the tools left in it
    pub async fn close(mut self) {
        self.closed = true;
        let result = tokio::fs::remove_dir_all(&self.path).await;
        report_removal(&self.path, result);
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    let result = std::fs::remove_dir_all(&path);
                    report_removal(&path, result);
                });
            }
            Err(_) => {
                let result = std::fs::remove_dir_all(&path);
                report_removal(&path, result);
            }
        }
    }
}

fn report_removal(path: &Path, result: io::Result<()>) {
    match result {
        Ok(()) => debug!(path = %path.display(), "Removed staging directory"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_promote_renames_into_place() {
        let out = TempDir::new().unwrap();
        let staging = StagingDir::create(out.path(), "0a1b2c3d").await.unwrap();
        let produced = staging.path().join("report.pdf");
        std::fs::write(&produced, b"%PDF-1.7 body").unwrap();

        let size = staging
            .promote(ToolKind::OfficeConverter, &produced, out.path(), "report_0a1b2c3d.pdf")
            .await
            .unwrap();

        assert_eq!(size, 13);
        assert!(!produced.exists());
        assert_eq!(
            std::fs::read(out.path().join("report_0a1b2c3d.pdf")).unwrap(),
            b"%PDF-1.7 body"
        );
    }

    #[tokio::test]
    async fn test_missing_and_empty_output() {
        let out = TempDir::new().unwrap();
        let staging = StagingDir::create(out.path(), "0a1b2c3d").await.unwrap();

        let missing = staging.path().join("nothing.pdf");
        let err = staging
            .promote(ToolKind::PdfTool, &missing, out.path(), "x.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::OutputMissing { ref expected, .. } if expected == "nothing.pdf"));

        let empty = staging.path().join("empty.pdf");
        std::fs::write(&empty, b"").unwrap();
        let err = staging
            .promote(ToolKind::PdfTool, &empty, out.path(), "x.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::OutputMissing { .. }));
        assert!(!out.path().join("x.pdf").exists());
    }

    #[tokio::test]
    async fn test_close_removes_directory() {
        let out = TempDir::new().unwrap();
        let staging = StagingDir::create(out.path(), "feedface").await.unwrap();
        std::fs::create_dir(staging.path().join("profile")).unwrap();
        std::fs::write(staging.path().join("profile").join("registry.xcu"), b"<x/>").unwrap();
        let path = staging.path().to_path_buf();

        staging.close().await;

        assert!(path.ends_with(".staging-feedface"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_dropped_guard_removes_directory_in_background() {
        let out = TempDir::new().unwrap();
        let path = {
            let staging = StagingDir::create(out.path(), "feedface").await.unwrap();
            std::fs::write(staging.path().join("partial.png"), b"junk").unwrap();
            staging.path().to_path_buf()
        };

        for _ in 0..100 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_dropped_outside_runtime_removes_directory() {
        let out = TempDir::new().unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let staging = runtime
            .block_on(StagingDir::create(out.path(), "feedface"))
            .unwrap();
        let path = staging.path().to_path_buf();

        drop(staging);

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share_a_directory() {
        let out = TempDir::new().unwrap();
        let first = StagingDir::create(out.path(), "0123456789ab00000000000000000001")
            .await
            .unwrap();
        let second = StagingDir::create(out.path(), "0123456789ab00000000000000000002")
            .await
            .unwrap();
        let second_path = second.path().to_path_buf();

        first.close().await;

        assert!(second_path.is_dir());
        second.close().await;
    }
}

//! Upload validation and storage.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult, UploadError};
use crate::jobs::JobKind;
use crate::service::ConversionService;

const PDF_MAGIC: &[u8] = b"%PDF-";
const OCR_INPUT_FORMATS: &[&str] = &["pdf", "png", "jpg", "jpeg", "tif", "tiff", "bmp"];
const MAX_NAME_CHARS: usize = 100;

/// A file as received from the client
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Bytes,
}

/// An upload written to the upload directory, owned by the job it is given to
#[derive(Debug, Clone)]
pub struct StoredUpload {
    /// Sanitised client-side name
    pub original_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl ConversionService {
    /// Validate a batch of uploads for `kind` and persist them.
    ///
    /// Nothing is written until every file has passed validation; if storing
    /// one fails, the ones already stored are removed again.
    pub async fn store_uploads(
        &self,
        kind: JobKind,
        files: Vec<UploadedFile>,
    ) -> ServiceResult<Vec<StoredUpload>> {
        if files.is_empty() {
            return Err(ServiceError::NoFileProvided);
        }
        if kind == JobKind::Merge && files.len() < 2 {
            return Err(ServiceError::NotEnoughMergeInputs);
        }
        let max_files = self.config.limits.max_files_per_request;
        if files.len() > max_files {
            return Err(UploadError::TooManyFiles {
                count: files.len(),
                max: max_files,
            }
            .into());
        }

        for file in &files {
            self.validate_upload(kind, file)?;
        }

        let mut stored = Vec::with_capacity(files.len());
        for file in files {
            match self.store_upload(file).await {
                Ok(upload) => stored.push(upload),
                Err(e) => {
                    remove_uploads(&stored).await;
                    return Err(e.into());
                }
            }
        }

        info!(kind = %kind, count = stored.len(), "Stored uploads");
        Ok(stored)
    }

    fn validate_upload(&self, kind: JobKind, file: &UploadedFile) -> Result<(), UploadError> {
        let limits = &self.config.limits;
        let size = file.data.len() as u64;
        if size > limits.max_upload_size_bytes {
            return Err(UploadError::FileTooLarge {
                size,
                max: limits.max_upload_size_bytes,
            });
        }

        // Judge the name the file will actually be stored under
        let name = sanitize_file_name(&file.file_name);
        let extension = extension_of(&name);
        let accepted = limits.is_supported_format(&extension)
            && match kind {
                JobKind::Convert => true,
                JobKind::Merge => extension == "pdf",
                JobKind::Ocr => OCR_INPUT_FORMATS.contains(&extension.as_str()),
            };
        if !accepted {
            return Err(UploadError::UnsupportedFormat {
                format: if extension.is_empty() {
                    "unknown".to_string()
                } else {
                    extension
                },
            });
        }

        if extension == "pdf" && !file.data.starts_with(PDF_MAGIC) {
            return Err(UploadError::InvalidPdf { file_name: name });
        }

        Ok(())
    }

    /// Write to a temp file in the upload directory, read it back and compare
    /// digests, then give it its final unique name.
    async fn store_upload(&self, file: UploadedFile) -> Result<StoredUpload, UploadError> {
        let dir = self.upload_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(UploadError::Io)?;

        let original_name = sanitize_file_name(&file.file_name);
        let target = dir.join(format!("{}_{}", Uuid::new_v4().simple(), original_name));
        let size_bytes = file.data.len() as u64;

        let blocking_target = target.clone();
        let blocking_name = original_name.clone();
        tokio::task::spawn_blocking(move || {
            write_verified(&dir, &blocking_target, &blocking_name, &file.data)
        })
        .await
        .map_err(|e| UploadError::Io(std::io::Error::other(e)))??;

        debug!(path = %target.display(), size_bytes, "Upload stored");
        Ok(StoredUpload {
            original_name,
            path: target,
            size_bytes,
        })
    }
}

fn write_verified(dir: &Path, target: &Path, name: &str, data: &[u8]) -> Result<(), UploadError> {
    let expected = Sha256::digest(data);

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(UploadError::Io)?;
    temp.write_all(data).map_err(UploadError::Io)?;
    temp.as_file().sync_all().map_err(UploadError::Io)?;

    let mut written = Vec::with_capacity(data.len());
    temp.seek(SeekFrom::Start(0)).map_err(UploadError::Io)?;
    temp.read_to_end(&mut written).map_err(UploadError::Io)?;
    if Sha256::digest(&written) != expected {
        warn!(file = %name, "Stored upload does not match received bytes");
        // The temp file is deleted when dropped
        return Err(UploadError::IntegrityMismatch {
            file_name: name.to_string(),
        });
    }

    temp.persist(target).map_err(|e| UploadError::Io(e.error))?;
    Ok(())
}

/// Best-effort removal of stored uploads
pub(crate) async fn remove_uploads(uploads: &[StoredUpload]) {
    for upload in uploads {
        remove_file_quietly(&upload.path).await;
    }
}

pub(crate) async fn remove_file_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove file");
    }
}

/// Lowercase extension, empty when there is none
pub(crate) fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Reduce a client-supplied file name to a safe single path component.
///
/// Directory parts are dropped, anything outside `[A-Za-z0-9._-]` becomes
/// `_`, leading dots are stripped and the result is length-capped.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    let cleaned = if cleaned.chars().count() > MAX_NAME_CHARS {
        // Keep the extension when trimming
        let extension = extension_of(cleaned);
        let keep = MAX_NAME_CHARS.saturating_sub(extension.len() + 1);
        let stem: String = cleaned.chars().take(keep).collect();
        if extension.is_empty() {
            stem
        } else {
            format!("{stem}.{extension}")
        }
    } else {
        cleaned.to_string()
    };

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_' || c == '.') {
        "document".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::jobs::JobStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> ConversionService {
        let mut config = ServiceConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.limits.max_upload_size_bytes = 64;
        config.limits.max_files_per_request = 3;
        ConversionService::new(Arc::new(config), Arc::new(JobStore::new())).unwrap()
    }

    fn file(name: &str, data: &'static [u8]) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            data: Bytes::from_static(data),
        }
    }

    fn upload_count(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path().join("uploads")).unwrap().count()
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\My Report.pdf"), "My_Report.pdf");
        assert_eq!(sanitize_file_name(".hidden.pdf"), "hidden.pdf");
        assert_eq!(sanitize_file_name("..."), "document");
        assert_eq!(sanitize_file_name(""), "document");

        let long = format!("{}.docx", "a".repeat(300));
        let sanitized = sanitize_file_name(&long);
        assert_eq!(sanitized.chars().count(), MAX_NAME_CHARS);
        assert!(sanitized.ends_with(".docx"));
    }

    #[tokio::test]
    async fn test_validation_messages() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let err = service.store_uploads(JobKind::Convert, vec![]).await.unwrap_err();
        assert_eq!(err.to_string(), "No PDF file provided");

        let err = service
            .store_uploads(JobKind::Merge, vec![file("a.pdf", b"%PDF-1.4")])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "At least 2 PDF files required for merging");

        let err = service
            .store_uploads(JobKind::Convert, vec![file("a.exe", b"MZ")])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Upload(UploadError::UnsupportedFormat { .. })));

        let err = service
            .store_uploads(JobKind::Convert, vec![file("a.pdf", b"not a pdf")])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Upload(UploadError::InvalidPdf { .. })));

        let big: &'static [u8] = &[b'x'; 65];
        let err = service
            .store_uploads(JobKind::Convert, vec![file("a.docx", big)])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Upload(UploadError::FileTooLarge { size: 65, max: 64 })));

        let err = service
            .store_uploads(
                JobKind::Merge,
                vec![
                    file("a.pdf", b"%PDF-1"),
                    file("b.pdf", b"%PDF-1"),
                    file("c.pdf", b"%PDF-1"),
                    file("d.pdf", b"%PDF-1"),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Upload(UploadError::TooManyFiles { count: 4, max: 3 })));

        assert_eq!(upload_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_merge_and_ocr_restrict_formats() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let err = service
            .store_uploads(
                JobKind::Merge,
                vec![file("a.pdf", b"%PDF-1"), file("b.docx", b"PK")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Upload(UploadError::UnsupportedFormat { .. })));

        let err = service
            .store_uploads(JobKind::Ocr, vec![file("notes.odt", b"PK")])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Upload(UploadError::UnsupportedFormat { .. })));
        assert_eq!(upload_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_extension_lost_to_sanitising_is_rejected() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        // "..pdf" is stored as "pdf", which has no extension left
        let err = service
            .store_uploads(JobKind::Ocr, vec![file("..pdf", b"%PDF-1.4")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Upload(UploadError::UnsupportedFormat { ref format }) if format == "unknown"
        ));
        assert_eq!(upload_count(&dir), 0);

        let stored = service
            .store_uploads(JobKind::Ocr, vec![file(".scan.pdf", b"%PDF-1.4")])
            .await
            .unwrap();
        assert_eq!(stored[0].original_name, "scan.pdf");
        assert_eq!(extension_of(&stored[0].path.to_string_lossy()), "pdf");
    }

    #[tokio::test]
    async fn test_store_writes_unique_verified_files() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let stored = service
            .store_uploads(
                JobKind::Merge,
                vec![file("../x/part.pdf", b"%PDF-1.4 a"), file("part.pdf", b"%PDF-1.4 b")],
            )
            .await
            .unwrap();

        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].original_name, "part.pdf");
        assert_ne!(stored[0].path, stored[1].path);
        assert!(stored[0].path.starts_with(dir.path().join("uploads")));
        assert_eq!(std::fs::read(&stored[1].path).unwrap(), b"%PDF-1.4 b");
        assert_eq!(stored[1].size_bytes, 10);
        // No leftover temp files
        assert_eq!(upload_count(&dir), 2);
    }
}

//! Server, storage, limits and job lifecycle settings.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::tools_config::ToolsConfig;

/// Complete service configuration (startup-only)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub timeouts: OperationTimeouts,

    #[serde(default)]
    pub jobs: JobsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root for `uploads/` (job-owned temp inputs) and `outputs/` (canonical results)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.data_dir.join("outputs")
    }
}

/// Upload limits
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Per-file upload limit
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_bytes: u64,

    #[serde(default = "default_max_files_per_request")]
    pub max_files_per_request: usize,

    /// Lowercase extensions accepted for upload
    #[serde(default = "default_supported_input_formats")]
    pub supported_input_formats: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_size_bytes: default_max_upload_size(),
            max_files_per_request: default_max_files_per_request(),
            supported_input_formats: default_supported_input_formats(),
        }
    }
}

impl LimitsConfig {
    pub fn is_supported_format(&self, extension: &str) -> bool {
        self.supported_input_formats
            .iter()
            .any(|f| f.eq_ignore_ascii_case(extension))
    }

    /// Request body ceiling for the multipart upload route.
    pub fn max_request_body_bytes(&self) -> usize {
        let files = self.max_files_per_request.max(1) as u64;
        // Leave headroom for multipart framing and form fields
        self.max_upload_size_bytes
            .saturating_mul(files)
            .saturating_add(1024 * 1024)
            .min(usize::MAX as u64) as usize
    }
}

/// Per-operation timeout overrides. When unset, the tool's own timeout applies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationTimeouts {
    #[serde(default)]
    pub convert_secs: Option<u64>,

    #[serde(default)]
    pub merge_secs: Option<u64>,

    /// Covers the whole OCR job, rendering plus every recognition run
    #[serde(default)]
    pub ocr_secs: Option<u64>,
}

/// Job retention settings
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// How long terminal jobs and their outputs are kept
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl JobsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        // tokio::time::interval panics on a zero period
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

// ==================== Default Value Functions ====================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_upload_size() -> u64 {
    26_214_400 // 25MB
}

fn default_max_files_per_request() -> usize {
    10
}

fn default_supported_input_formats() -> Vec<String> {
    [
        "pdf", "doc", "docx", "odt", "rtf", "ppt", "pptx", "odp", "xls", "xlsx", "ods", "png",
        "jpg", "jpeg", "tif", "tiff", "bmp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60 // 24 hours
}

fn default_cleanup_interval_secs() -> u64 {
    60 * 60 // 1 hour
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.limits.max_upload_size_bytes, 25 * 1024 * 1024);
        assert_eq!(config.jobs.retention(), Duration::from_secs(86_400));
        assert_eq!(
            config.storage.output_dir(),
            PathBuf::from("./data").join("outputs")
        );
    }

    #[test]
    fn test_is_supported_format() {
        let limits = LimitsConfig::default();
        assert!(limits.is_supported_format("pdf"));
        assert!(limits.is_supported_format("PDF"));
        assert!(limits.is_supported_format("docx"));
        assert!(!limits.is_supported_format("exe"));
        assert!(!limits.is_supported_format(""));
    }

    #[test]
    fn test_cleanup_interval_never_zero() {
        let jobs = JobsConfig {
            retention_secs: 0,
            cleanup_interval_secs: 0,
        };
        assert_eq!(jobs.cleanup_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_max_request_body_covers_all_files() {
        let limits = LimitsConfig {
            max_upload_size_bytes: 1000,
            max_files_per_request: 3,
            supported_input_formats: vec![],
        };
        assert!(limits.max_request_body_bytes() >= 3000);
    }
}

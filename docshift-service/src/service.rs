//! The conversion service: job coordination, upload handling and housekeeping.
//!
//! - `coordinator`: submit jobs and drive them to a terminal state
//! - `uploads`: validate and persist incoming files
//! - `cleanup`: explicit job deletion and the retention sweep
//! - `health`: tool availability and job counts
//! - `workers`: background tasks

mod cleanup;
mod coordinator;
mod health;
mod uploads;
mod workers;

pub use coordinator::ConversionParams;
pub use health::HealthReport;
pub use uploads::{UploadedFile, sanitize_file_name};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::adapters::Adapters;
use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::i18n::I18n;
use crate::jobs::JobStore;
use crate::toolchain::ToolLocator;

/// Main service coordinator
pub struct ConversionService {
    pub config: Arc<ServiceConfig>,
    pub locator: Arc<ToolLocator>,
    pub adapters: Adapters,
    pub jobs: Arc<JobStore>,
    pub i18n: Arc<I18n>,
}

impl ConversionService {
    /// Create the service with tools located from configuration
    pub fn new(config: Arc<ServiceConfig>, jobs: Arc<JobStore>) -> ServiceResult<Self> {
        let locator = Arc::new(ToolLocator::from_config(&config.tools));
        Self::with_locator(config, jobs, locator)
    }

    /// Create the service around an existing locator
    pub fn with_locator(
        config: Arc<ServiceConfig>,
        jobs: Arc<JobStore>,
        locator: Arc<ToolLocator>,
    ) -> ServiceResult<Self> {
        for dir in [config.storage.upload_dir(), config.storage.output_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| ServiceError::Config {
                message: format!("Failed to create {}: {}", dir.display(), e),
            })?;
        }

        info!(
            uploads = %config.storage.upload_dir().display(),
            outputs = %config.storage.output_dir().display(),
            "Storage directories ready"
        );

        Ok(Self {
            adapters: Adapters::new(Arc::clone(&locator)),
            config,
            locator,
            jobs,
            i18n: Arc::new(I18n::new()),
        })
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.config.storage.upload_dir()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.config.storage.output_dir()
    }
}

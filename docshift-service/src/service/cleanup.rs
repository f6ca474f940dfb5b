//! Job deletion and the retention sweep.

use std::collections::HashSet;
use std::path::Path;
use std::time::SystemTime;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::STAGING_PREFIX;
use crate::error::{ServiceError, ServiceResult};
use crate::jobs::ConversionJob;
use crate::service::ConversionService;

use super::uploads::remove_file_quietly;

/// What a sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub jobs_removed: usize,
    pub files_removed: usize,
}

impl ConversionService {
    /// Forget a finished job and delete its files.
    ///
    /// Queued and running jobs are refused so their files are never pulled
    /// out from under a tool.
    pub async fn delete_job(&self, id: &Uuid) -> ServiceResult<ConversionJob> {
        let job = self.jobs.remove_terminal(id)?;
        self.remove_job_files(&job).await;
        info!(job_id = %id, status = %job.status(), "Job deleted");
        Ok(job)
    }

    /// Drop terminal jobs past retention, then files nothing refers to any more.
    pub async fn cleanup_expired(&self) -> CleanupReport {
        let retention = self.config.jobs.retention();
        let mut report = CleanupReport::default();

        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(1));
        for id in self.jobs.expired(cutoff) {
            match self.jobs.remove_terminal(&id) {
                Ok(job) => {
                    report.files_removed += self.remove_job_files(&job).await;
                    report.jobs_removed += 1;
                    debug!(job_id = %id, "Expired job removed");
                }
                // Deleted by a client in the meantime
                Err(ServiceError::JobNotFound { .. }) => {}
                Err(e) => warn!(job_id = %id, error = %e, "Failed to remove expired job"),
            }
        }

        let file_cutoff = SystemTime::now()
            .checked_sub(retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        report.files_removed += self.sweep_orphans(&self.upload_dir(), file_cutoff).await;
        report.files_removed += self.sweep_orphans(&self.output_dir(), file_cutoff).await;

        if report != CleanupReport::default() {
            info!(
                jobs_removed = report.jobs_removed,
                files_removed = report.files_removed,
                "Cleanup finished"
            );
        }
        report
    }

    async fn remove_job_files(&self, job: &ConversionJob) -> usize {
        let mut removed = 0;
        let mut paths: Vec<_> = job.input_paths.clone();
        if let Some(output) = job.output() {
            paths.push(self.output_dir().join(&output.file_name));
        }
        for path in paths {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                remove_file_quietly(&path).await;
                removed += 1;
            }
        }
        removed
    }

    /// Remove entries of `dir` older than `cutoff` that no job refers to.
    /// Staging directories are kept while their job is still active.
    async fn sweep_orphans(&self, dir: &Path, cutoff: SystemTime) -> usize {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to read directory for cleanup");
                return 0;
            }
        };

        let active_keys: HashSet<String> = self
            .jobs
            .list()
            .iter()
            .filter(|job| !job.status().is_terminal())
            .map(|job| job.staging_key())
            .collect();

        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Failed to list directory for cleanup");
                    break;
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let modified = metadata.modified().unwrap_or(SystemTime::now());
            if modified >= cutoff {
                continue;
            }

            let path = entry.path();
            if metadata.is_dir() {
                let Some(key) = name.strip_prefix(STAGING_PREFIX) else {
                    continue;
                };
                if active_keys.contains(key) {
                    continue;
                }
                match tokio::fs::remove_dir_all(&path).await {
                    Ok(()) => {
                        debug!(path = %path.display(), "Removed stale staging directory");
                        removed += 1;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging directory"),
                }
            } else if !self.jobs.references_file(&name) {
                remove_file_quietly(&path).await;
                debug!(path = %path.display(), "Removed orphaned file");
                removed += 1;
            }
        }
        removed
    }
}

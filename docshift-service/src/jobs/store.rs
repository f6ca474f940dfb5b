//! In-memory job table.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};

use super::{ConversionJob, JobOutput, JobStatus};

/// Number of jobs in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn total(&self) -> usize {
        self.queued + self.running + self.completed + self.failed
    }
}

/// Owner of every job record.
///
/// Created once at startup and handed to whoever needs it. Each update runs
/// under the record's shard lock, so a reader sees either the whole
/// transition or none of it.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: DashMap<Uuid, ConversionJob>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: ConversionJob) -> Uuid {
        let id = job.id;
        self.jobs.insert(id, job);
        id
    }

    /// Snapshot of a job
    pub fn get(&self, id: &Uuid) -> Option<ConversionJob> {
        self.jobs.get(id).map(|entry| entry.value().clone())
    }

    pub fn require(&self, id: &Uuid) -> ServiceResult<ConversionJob> {
        self.get(id).ok_or_else(|| not_found(id))
    }

    /// All jobs, newest first
    pub fn list(&self) -> Vec<ConversionJob> {
        let mut jobs: Vec<ConversionJob> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// `queued → running`. Fails for any job that has already been started.
    pub fn start(&self, id: &Uuid) -> ServiceResult<()> {
        let mut job = self.jobs.get_mut(id).ok_or_else(|| not_found(id))?;
        job.start()?;
        Ok(())
    }

    pub fn complete(&self, id: &Uuid, output: JobOutput) -> ServiceResult<()> {
        let mut job = self.jobs.get_mut(id).ok_or_else(|| not_found(id))?;
        job.complete(output)?;
        Ok(())
    }

    pub fn fail(&self, id: &Uuid, error: impl Into<String>) -> ServiceResult<()> {
        let mut job = self.jobs.get_mut(id).ok_or_else(|| not_found(id))?;
        job.fail(error)?;
        Ok(())
    }

    /// Remove a job that has finished. Queued and running jobs stay put.
    pub fn remove_terminal(&self, id: &Uuid) -> ServiceResult<ConversionJob> {
        if let Some((_, job)) = self.jobs.remove_if(id, |_, job| job.status().is_terminal()) {
            return Ok(job);
        }

        match self.jobs.get(id) {
            Some(job) => Err(ServiceError::JobActive {
                job_id: id.to_string(),
                status: job.status(),
            }),
            None => Err(not_found(id)),
        }
    }

    /// Terminal jobs that completed before `cutoff`
    pub fn expired(&self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        self.jobs
            .iter()
            .filter(|entry| entry.completed_at().is_some_and(|done| done < cutoff))
            .map(|entry| *entry.key())
            .collect()
    }

    /// Whether any job still references `file_name` as an input or output
    pub fn references_file(&self, file_name: &str) -> bool {
        self.jobs.iter().any(|entry| {
            entry.output().is_some_and(|output| output.file_name == file_name)
                || entry
                    .input_paths
                    .iter()
                    .any(|path| path.file_name().is_some_and(|name| name == file_name))
        })
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for entry in self.jobs.iter() {
            match entry.status() {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn not_found(id: &Uuid) -> ServiceError {
    ServiceError::JobNotFound {
        job_id: id.to_string(),
    }
}

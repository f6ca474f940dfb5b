//! Conversion jobs and their state machine.
//!
//! A job moves `queued → running → completed` or `queued → running → failed`
//! and never back. The output exists only in the completed state and the
//! error only in the failed state.

mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::adapters::OcrWords;
use crate::error::JobStateError;

pub use store::{JobCounts, JobStore};

/// What a job does
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    /// Single-file format conversion
    Convert,
    /// Concatenate several PDFs
    Merge,
    /// Text recognition
    Ocr,
}

/// Lifecycle position of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Result of a completed job
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub file_name: String,
    pub size_bytes: u64,
    pub ocr: Option<OcrWords>,
}

#[derive(Debug, Clone)]
pub enum JobState {
    Queued,
    Running {
        started_at: DateTime<Utc>,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        output: JobOutput,
    },
    Failed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        error: String,
    },
}

/// One conversion request and everything known about its progress
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: Uuid,
    pub kind: JobKind,
    /// Names the client uploaded, for display only
    pub input_files: Vec<String>,
    /// Stored uploads owned by this job; removed once it is terminal
    pub input_paths: Vec<PathBuf>,
    pub created_at: DateTime<Utc>,
    state: JobState,
}

impl ConversionJob {
    pub fn new(kind: JobKind, input_files: Vec<String>, input_paths: Vec<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            input_files,
            input_paths,
            created_at: Utc::now(),
            state: JobState::Queued,
        }
    }

    /// First twelve hex digits of the id, carried in output file names
    pub fn tag(&self) -> String {
        job_tag(&self.id)
    }

    /// The whole id in hex, naming the job's staging directory
    pub fn staging_key(&self) -> String {
        self.id.simple().to_string()
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn status(&self) -> JobStatus {
        match self.state {
            JobState::Queued => JobStatus::Queued,
            JobState::Running { .. } => JobStatus::Running,
            JobState::Completed { .. } => JobStatus::Completed,
            JobState::Failed { .. } => JobStatus::Failed,
        }
    }

    pub fn start(&mut self) -> Result<(), JobStateError> {
        match self.state {
            JobState::Queued => {
                self.state = JobState::Running {
                    started_at: Utc::now(),
                };
                Ok(())
            }
            _ => Err(self.invalid_transition(JobStatus::Running)),
        }
    }

    pub fn complete(&mut self, output: JobOutput) -> Result<(), JobStateError> {
        match self.state {
            JobState::Running { started_at } => {
                self.state = JobState::Completed {
                    started_at,
                    completed_at: Utc::now(),
                    output,
                };
                Ok(())
            }
            _ => Err(self.invalid_transition(JobStatus::Completed)),
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), JobStateError> {
        match self.state {
            JobState::Running { started_at } => {
                self.state = JobState::Failed {
                    started_at,
                    completed_at: Utc::now(),
                    error: error.into(),
                };
                Ok(())
            }
            _ => Err(self.invalid_transition(JobStatus::Failed)),
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            JobState::Queued => None,
            JobState::Running { started_at }
            | JobState::Completed { started_at, .. }
            | JobState::Failed { started_at, .. } => Some(started_at),
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            JobState::Completed { completed_at, .. } | JobState::Failed { completed_at, .. } => {
                Some(completed_at)
            }
            _ => None,
        }
    }

    pub fn output(&self) -> Option<&JobOutput> {
        match &self.state {
            JobState::Completed { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            JobState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Milliseconds between start and completion, once terminal
    pub fn processing_time_ms(&self) -> Option<i64> {
        Some((self.completed_at()? - self.started_at()?).num_milliseconds())
    }

    fn invalid_transition(&self, to: JobStatus) -> JobStateError {
        JobStateError::InvalidTransition {
            job_id: self.id,
            from: self.status(),
            to,
        }
    }
}

const TAG_HEX_DIGITS: usize = 12;

pub fn job_tag(id: &Uuid) -> String {
    let mut tag = id.simple().to_string();
    tag.truncate(TAG_HEX_DIGITS);
    tag
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> JobOutput {
        JobOutput {
            file_name: "a_12345678.pdf".to_string(),
            size_bytes: 10,
            ocr: None,
        }
    }

    #[test]
    fn test_happy_path() {
        let mut job = ConversionJob::new(JobKind::Convert, vec!["a.docx".to_string()], vec![]);
        assert_eq!(job.status(), JobStatus::Queued);
        assert!(job.started_at().is_none());

        job.start().unwrap();
        assert_eq!(job.status(), JobStatus::Running);
        assert!(job.processing_time_ms().is_none());

        job.complete(output()).unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.output().unwrap().file_name, "a_12345678.pdf");
        assert!(job.error().is_none());
        assert!(job.processing_time_ms().unwrap() >= 0);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = ConversionJob::new(JobKind::Ocr, vec![], vec![]);
        job.start().unwrap();
        job.fail("Conversion failed").unwrap();

        assert!(job.start().is_err());
        assert!(job.complete(output()).is_err());
        let err = job.fail("again").unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Job {} cannot move from failed to failed", job.id)
        );
        assert_eq!(job.error(), Some("Conversion failed"));
        assert!(job.output().is_none());
    }

    #[test]
    fn test_staging_key_separates_ids_sharing_a_tag() {
        let mut first = ConversionJob::new(JobKind::Convert, vec![], vec![]);
        let mut second = ConversionJob::new(JobKind::Convert, vec![], vec![]);
        first.id = Uuid::from_u128(0x0123_4567_89ab_0000_0000_0000_0000_0001);
        second.id = Uuid::from_u128(0x0123_4567_89ab_0000_0000_0000_0000_0002);

        assert_eq!(first.tag(), second.tag());
        assert_ne!(first.staging_key(), second.staging_key());
    }

    #[test]
    fn test_cannot_skip_running() {
        let mut job = ConversionJob::new(JobKind::Merge, vec![], vec![]);
        assert!(job.complete(output()).is_err());
        assert!(job.fail("nope").is_err());
        assert_eq!(job.status(), JobStatus::Queued);
    }

    #[test]
    fn test_tag_and_names() {
        let job = ConversionJob::new(JobKind::Convert, vec![], vec![]);
        assert_eq!(job.tag().len(), 12);
        assert!(job.id.simple().to_string().starts_with(&job.tag()));
        assert_eq!(job.staging_key(), job.id.simple().to_string());
        assert_eq!(JobStatus::Running.as_ref(), "running");
        assert_eq!(JobKind::Ocr.to_string(), "ocr");
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }
}

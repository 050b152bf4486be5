use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Row id assigned by the job store.
pub type JobId = i64;

/// Lifecycle of a segmentation job: `processing` then exactly one of
/// `completed` or `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Input of `JobStore::create_job`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub image_id: Uuid,
    pub image_url: String,
    pub model_name: String,
}

/// Input of `JobStore::complete_job`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobArtifacts {
    pub mask_url: String,
    pub overlay_url: String,
    pub inference_time_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub image_id: Uuid,
    pub image_url: String,
    pub model_name: String,
    pub status: JobStatus,
    pub mask_url: Option<String>,
    pub overlay_url: Option<String>,
    pub inference_time_ms: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, new_job: &NewJob) -> Self {
        Self {
            id,
            image_id: new_job.image_id,
            image_url: new_job.image_url.clone(),
            model_name: new_job.model_name.clone(),
            status: JobStatus::Processing,
            mask_url: None,
            overlay_url: None,
            inference_time_ms: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Returns `false` and leaves the job untouched unless it is still processing.
    pub fn complete(&mut self, artifacts: &JobArtifacts) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Completed;
        self.mask_url = Some(artifacts.mask_url.clone());
        self.overlay_url = Some(artifacts.overlay_url.clone());
        self.inference_time_ms = Some(artifacts.inference_time_ms);
        self.completed_at = Some(Utc::now());
        true
    }

    /// Returns `false` and leaves the job untouched unless it is still processing.
    pub fn fail(&mut self, reason: &str) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error_message = Some(reason.to_string());
        self.completed_at = Some(Utc::now());
        true
    }
}

//! Job and job-unit types.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

/// Execution status shared by jobs and their units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, not yet picked up by the worker.
    Pending,
    /// At least one unit is executing.
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal states never transition again through reconciliation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(JobError::InvalidStatus(other.to_string())),
        }
    }
}

/// One execution of a flattened task chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Root task the plan was flattened from.
    pub task_id: Uuid,
    pub status: JobStatus,
    /// Worker configuration sent with the dispatch.
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(task_id: Uuid, config: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            status: JobStatus::Pending,
            config,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// One leaf of a job's plan, at a fixed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUnit {
    pub id: Uuid,
    pub job_id: Uuid,
    /// Leaf task this unit was captured from.
    pub task_id: Uuid,
    pub position: i64,
    pub task_title: Option<String>,
    pub task_text: String,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobUnit {
    /// Projection without the (possibly large) result payload.
    pub fn lite(&self) -> UnitLite {
        UnitLite {
            id: self.id,
            task_id: self.task_id,
            position: self.position,
            task_title: self.task_title.clone(),
            task_text: self.task_text.clone(),
            status: self.status,
            result_summary: self
                .result
                .as_ref()
                .and_then(|r| r.get("summary"))
                .filter(|s| !s.is_null())
                .cloned(),
            error: self.error.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Lightweight unit view: result reduced to its `summary` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitLite {
    pub id: Uuid,
    pub task_id: Uuid,
    pub position: i64,
    pub task_title: Option<String>,
    pub task_text: String,
    pub status: JobStatus,
    #[serde(default)]
    pub result_summary: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A job together with its units, in position order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail<U> {
    #[serde(flatten)]
    pub job: Job,
    pub units: Vec<U>,
}

impl JobDetail<JobUnit> {
    pub fn lite(&self) -> JobDetail<UnitLite> {
        JobDetail {
            job: self.job.clone(),
            units: self.units.iter().map(JobUnit::lite).collect(),
        }
    }
}

/// What observers poll for.
pub type JobSnapshot = JobDetail<UnitLite>;

/// Job listing filter.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub task_id: Option<Uuid>,
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Per-task execution counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskJobStats {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub running: i64,
    pub pending: i64,
}

impl TaskJobStats {
    pub fn record(&mut self, status: JobStatus, count: i64) {
        self.total += count;
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Running => self.running += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
        }
    }
}

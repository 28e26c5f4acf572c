//! Derivation of a job's status from its units.
//!
//! `derive` is pure and order-insensitive, so callbacks and polls can race
//! without coordination: whoever writes last recomputes from the full set.

use chrono::{DateTime, Utc};

use crate::jobs::model::{Job, JobStatus};

/// Aggregate unit statuses into a job status.
///
/// Precedence: any running, then all completed, then any failed, otherwise
/// pending. An empty set is pending.
pub fn derive(statuses: &[JobStatus]) -> JobStatus {
    if statuses.is_empty() {
        return JobStatus::Pending;
    }
    if statuses.contains(&JobStatus::Running) {
        JobStatus::Running
    } else if statuses.iter().all(|s| *s == JobStatus::Completed) {
        JobStatus::Completed
    } else if statuses.contains(&JobStatus::Failed) {
        JobStatus::Failed
    } else {
        JobStatus::Pending
    }
}

/// Apply a derived status to `job`. Returns true if anything changed.
///
/// Terminal jobs are left alone. `started_at` is stamped the first time the
/// job leaves pending and `completed_at` when it reaches a terminal state.
pub fn apply(job: &mut Job, derived: JobStatus, now: DateTime<Utc>) -> bool {
    if job.status.is_terminal() || job.status == derived {
        return false;
    }
    job.status = derived;
    if derived != JobStatus::Pending && job.started_at.is_none() {
        job.started_at = Some(now);
    }
    if derived.is_terminal() && job.completed_at.is_none() {
        job.completed_at = Some(now);
    }
    true
}

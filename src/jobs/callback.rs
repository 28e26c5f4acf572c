//! Ingestion of worker callbacks.
//!
//! Unit callbacks overwrite the addressed unit and trigger reconciliation.
//! The job-completion callback sets the job's terminal status directly and
//! outranks anything reconciliation would derive. Both are safe to replay.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, JobError};
use crate::jobs::model::{Job, JobStatus};
use crate::jobs::service::JobStore;

/// Per-unit progress report from the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct UnitCallback {
    /// Position of the unit within the job.
    pub task_index: i64,
    /// Leaf task id the worker believes it executed.
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

/// Final report for the whole job.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionCallback {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

/// Accept RFC 3339, or a naive ISO timestamp taken as UTC.
fn parse_timestamp(field: &'static str, raw: &str) -> Result<DateTime<Utc>, JobError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(ndt.and_utc());
        }
    }
    Err(JobError::InvalidTimestamp {
        field,
        value: raw.to_string(),
    })
}

fn parse_optional(
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, JobError> {
    raw.filter(|s| !s.trim().is_empty())
        .map(|s| parse_timestamp(field, s))
        .transpose()
}

/// A unit callback that passed payload validation.
#[derive(Debug, Clone)]
struct UnitUpdate {
    position: i64,
    task_id: Uuid,
    status: JobStatus,
    result: Option<serde_json::Value>,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<UnitCallback> for UnitUpdate {
    type Error = JobError;

    fn try_from(cb: UnitCallback) -> Result<Self, Self::Error> {
        if cb.task_index < 0 {
            return Err(JobError::InvalidPosition(cb.task_index));
        }
        let task_id =
            Uuid::parse_str(cb.task_id.trim()).map_err(|_| JobError::InvalidTaskId(cb.task_id.clone()))?;
        Ok(Self {
            position: cb.task_index,
            task_id,
            status: cb.status.parse()?,
            started_at: parse_optional("started_at", cb.started_at.as_deref())?,
            completed_at: parse_optional("completed_at", cb.completed_at.as_deref())?,
            result: cb.result.filter(|r| !r.is_null()),
            error: cb.error,
        })
    }
}

/// Applies callbacks to the job store.
///
/// Read-modify-write cycles run under the store's write lock, so a unit
/// write and the reconciliation that follows it never interleave with
/// another callback or a dispatch failure.
pub struct CallbackIngest {
    store: JobStore,
}

impl CallbackIngest {
    pub fn new(store: JobStore) -> Self {
        Self { store }
    }

    /// Apply a unit callback and return the reconciled job.
    pub async fn apply_unit(&self, job_id: Uuid, callback: UnitCallback) -> Result<Job, Error> {
        let update = UnitUpdate::try_from(callback)?;
        let _guard = self.store.write_lock().await;

        self.store.get_job(job_id).await?;
        let mut unit = self
            .store
            .find_unit(job_id, update.position)
            .await?
            .ok_or(JobError::UnitNotFound {
                job_id,
                position: update.position,
            })?;

        if unit.task_id != update.task_id {
            warn!(
                job_id = %job_id,
                position = update.position,
                expected = %unit.task_id,
                actual = %update.task_id,
                "Unit callback task mismatch"
            );
            return Err(JobError::UnitTaskMismatch {
                job_id,
                position: update.position,
                expected: unit.task_id,
                actual: update.task_id,
            }
            .into());
        }

        unit.status = update.status;
        unit.result = update.result;
        unit.error = update.error;
        if update.started_at.is_some() {
            unit.started_at = update.started_at;
        }
        if update.completed_at.is_some() {
            unit.completed_at = update.completed_at;
        }
        self.store.save_unit(&unit).await?;
        info!(
            job_id = %job_id,
            position = unit.position,
            status = %unit.status,
            "Unit callback applied"
        );

        self.store.reconcile(job_id).await
    }

    /// Apply the job-completion callback. Only terminal statuses are accepted.
    pub async fn apply_completion(
        &self,
        job_id: Uuid,
        callback: CompletionCallback,
    ) -> Result<Job, Error> {
        let status: JobStatus = callback.status.parse()?;
        if !status.is_terminal() {
            return Err(JobError::NonTerminalCompletion(status).into());
        }
        let completed_at = parse_optional("completed_at", callback.completed_at.as_deref())?;

        let _guard = self.store.write_lock().await;
        let mut job = self.store.get_job(job_id).await?;
        let previous = job.status;

        job.status = status;
        job.error = callback.error;
        job.completed_at = completed_at.or(job.completed_at).or_else(|| Some(Utc::now()));
        self.store.save(&job).await?;

        info!(job_id = %job_id, from = %previous, to = %status, "Job completion callback applied");
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::folders::model::Folder;
    use crate::jobs::model::{JobDetail, JobUnit};
    use crate::store::{Database, LibSqlBackend};
    use crate::tasks::model::Task;

    async fn setup(leaves: usize) -> (CallbackIngest, JobStore, JobDetail<JobUnit>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let folder = Folder::new("f", None);
        db.insert_folder(&folder).await.unwrap();

        let mut subs = Vec::new();
        for i in 0..leaves {
            let leaf = Task::new(folder.id, format!("step {i}"));
            db.insert_task(&leaf).await.unwrap();
            subs.push(leaf.id);
        }
        let root = Task::new(folder.id, "root").with_sub_ids(subs);
        db.insert_task(&root).await.unwrap();

        let store = JobStore::new(db);
        let detail = store.create_job(root.id, json!({})).await.unwrap();
        (CallbackIngest::new(store.clone()), store, detail)
    }

    fn unit_cb(unit: &JobUnit, status: &str) -> UnitCallback {
        UnitCallback {
            task_index: unit.position,
            task_id: unit.task_id.to_string(),
            status: status.into(),
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    fn completion(status: &str) -> CompletionCallback {
        CompletionCallback {
            status: status.into(),
            error: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn completed_first_unit_keeps_job_pending_until_second_runs() {
        let (ingest, _store, detail) = setup(2).await;
        let job_id = detail.job.id;

        let job = ingest
            .apply_unit(job_id, unit_cb(&detail.units[0], "completed"))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let job = ingest
            .apply_unit(job_id, unit_cb(&detail.units[1], "running"))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn unit_fields_are_overwritten() {
        let (ingest, store, detail) = setup(1).await;
        let job_id = detail.job.id;
        let unit = &detail.units[0];

        let mut cb = unit_cb(unit, "failed");
        cb.error = Some("element not found".into());
        cb.result = Some(json!({"summary": "partial"}));
        cb.started_at = Some("2026-03-01T10:00:00".into());
        cb.completed_at = Some("2026-03-01T10:00:05Z".into());
        let job = ingest.apply_unit(job_id, cb).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);

        // A later report without error or result clears them, but keeps
        // timestamps it did not mention.
        ingest
            .apply_unit(job_id, unit_cb(unit, "completed"))
            .await
            .unwrap();
        let stored = store.get_unit(job_id, 0).await.unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.error.is_none());
        assert!(stored.result.is_none());
        assert_eq!(
            stored.started_at.unwrap().to_rfc3339(),
            "2026-03-01T10:00:00+00:00"
        );
        assert!(stored.completed_at.is_some());

        // Job stayed failed: terminal is sticky for reconciliation.
        assert_eq!(store.get_job(job_id).await.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn replayed_callback_is_idempotent() {
        let (ingest, store, detail) = setup(1).await;
        let job_id = detail.job.id;
        let cb = unit_cb(&detail.units[0], "completed");

        let first = ingest.apply_unit(job_id, cb.clone()).await.unwrap();
        let second = ingest.apply_unit(job_id, cb).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.status, JobStatus::Completed);
        assert_eq!(store.detail(job_id).await.unwrap().units.len(), 1);
    }

    #[tokio::test]
    async fn validation_failures_change_nothing() {
        let (ingest, store, detail) = setup(1).await;
        let job_id = detail.job.id;
        let unit = &detail.units[0];

        let mut bad_index = unit_cb(unit, "running");
        bad_index.task_index = -1;
        assert_eq!(
            ingest.apply_unit(job_id, bad_index).await.unwrap_err().kind(),
            ErrorKind::Invalid
        );

        let bad_status = unit_cb(unit, "done");
        assert_eq!(
            ingest.apply_unit(job_id, bad_status).await.unwrap_err().kind(),
            ErrorKind::Invalid
        );

        let mut bad_time = unit_cb(unit, "running");
        bad_time.started_at = Some("yesterday".into());
        assert_eq!(
            ingest.apply_unit(job_id, bad_time).await.unwrap_err().kind(),
            ErrorKind::Invalid
        );

        let mut missing = unit_cb(unit, "running");
        missing.task_index = 3;
        assert_eq!(
            ingest.apply_unit(job_id, missing).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let mut mismatch = unit_cb(unit, "running");
        mismatch.task_id = Uuid::new_v4().to_string();
        assert_eq!(
            ingest.apply_unit(job_id, mismatch).await.unwrap_err().kind(),
            ErrorKind::Conflict
        );

        assert_eq!(
            ingest
                .apply_unit(Uuid::new_v4(), unit_cb(unit, "running"))
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );

        let after = store.detail(job_id).await.unwrap();
        assert_eq!(after, detail);
    }

    #[tokio::test]
    async fn completion_overrides_units() {
        let (ingest, _store, detail) = setup(2).await;
        let job_id = detail.job.id;
        for unit in &detail.units {
            ingest
                .apply_unit(job_id, unit_cb(unit, "completed"))
                .await
                .unwrap();
        }

        let mut cb = completion("failed");
        cb.error = Some("assertion failed on final page".into());
        let job = ingest.apply_completion(job_id, cb).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("assertion failed on final page"));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn completion_is_idempotent_and_terminal_only() {
        let (ingest, _store, detail) = setup(1).await;
        let job_id = detail.job.id;

        let err = ingest
            .apply_completion(job_id, completion("running"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Job(JobError::NonTerminalCompletion(JobStatus::Running))));

        let first = ingest
            .apply_completion(job_id, completion("completed"))
            .await
            .unwrap();
        let second = ingest
            .apply_completion(job_id, completion("completed"))
            .await
            .unwrap();
        assert_eq!(first, second);

        let err = ingest
            .apply_completion(Uuid::new_v4(), completion("failed"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn unit_callbacks_after_completion_do_not_revert_job() {
        let (ingest, store, detail) = setup(2).await;
        let job_id = detail.job.id;

        ingest
            .apply_completion(job_id, completion("completed"))
            .await
            .unwrap();
        let job = ingest
            .apply_unit(job_id, unit_cb(&detail.units[0], "running"))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        // The straggler update itself is still recorded.
        let unit = store.get_unit(job_id, 0).await.unwrap();
        assert_eq!(unit.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn reads_see_reconciled_status() {
        let (ingest, store, detail) = setup(2).await;
        let job_id = detail.job.id;

        ingest
            .apply_unit(job_id, unit_cb(&detail.units[1], "running"))
            .await
            .unwrap();
        assert_eq!(store.snapshot(job_id).await.unwrap().job.status, JobStatus::Running);

        for unit in &detail.units {
            ingest
                .apply_unit(job_id, unit_cb(unit, "completed"))
                .await
                .unwrap();
        }
        let full = store.detail(job_id).await.unwrap();
        assert_eq!(full.job.status, JobStatus::Completed);
        assert!(full.units.iter().all(|u| u.status == JobStatus::Completed));
    }

    #[tokio::test]
    async fn late_dispatch_failure_keeps_completion() {
        let (ingest, store, detail) = setup(1).await;
        let job_id = detail.job.id;

        ingest
            .apply_completion(job_id, completion("completed"))
            .await
            .unwrap();
        let job = store
            .mark_dispatch_failed(job_id, "operation timed out")
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());

        let stored = store.get_job(job_id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.error.is_none());
    }

    #[tokio::test]
    async fn dispatch_failure_waits_for_inflight_callback() {
        let (ingest, store, detail) = setup(1).await;
        let job_id = detail.job.id;

        let (completed, failed) = tokio::join!(
            ingest.apply_completion(job_id, completion("completed")),
            store.mark_dispatch_failed(job_id, "operation timed out"),
        );
        completed.unwrap();
        failed.unwrap();

        // Whichever ran first, the completion callback has the last word.
        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn concurrent_callbacks_converge() {
        let (ingest, store, detail) = setup(4).await;
        let job_id = detail.job.id;

        let updates = detail
            .units
            .iter()
            .map(|unit| ingest.apply_unit(job_id, unit_cb(unit, "completed")));
        for result in futures::future::join_all(updates).await {
            result.unwrap();
        }

        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn timestamp_formats() {
        assert!(parse_timestamp("t", "2026-03-01T10:00:00.123456").is_ok());
        assert!(parse_timestamp("t", "2026-03-01 10:00:00").is_ok());
        assert!(parse_timestamp("t", "2026-03-01T10:00:00+02:00").is_ok());
        assert!(parse_timestamp("t", "03/01/2026").is_err());
    }
}

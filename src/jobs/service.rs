//! Job persistence operations: plan materialization, projections and
//! status reconciliation.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, JobError};
use crate::jobs::model::{Job, JobDetail, JobFilter, JobSnapshot, JobStatus, JobUnit, TaskJobStats};
use crate::jobs::reconcile;
use crate::store::Database;
use crate::tasks::flatten::{LeafRef, flatten};

/// Clones share the database handle and the write lock.
#[derive(Clone)]
pub struct JobStore {
    db: Arc<dyn Database>,
    writes: Arc<Mutex<()>>,
}

impl JobStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Serializes read-modify-write cycles on job status. Not reentrant:
    /// nothing called while holding it may take it again.
    pub(crate) async fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().await
    }

    /// Flatten `task_id` and persist a pending job with one pending unit per
    /// leaf. A root that expands to nothing runs as a single unit of itself.
    pub async fn create_job(
        &self,
        task_id: Uuid,
        config: serde_json::Value,
    ) -> Result<JobDetail<JobUnit>, Error> {
        if !config.is_object() {
            return Err(JobError::InvalidConfig.into());
        }
        let root = self
            .db
            .get_task(task_id)
            .await?
            .ok_or(JobError::TaskNotFound { id: task_id })?;

        let mut leaves = flatten(self.db.as_ref(), task_id).await?;
        if leaves.is_empty() {
            debug!(task_id = %task_id, "Chain has no leaves, running root as a single unit");
            leaves.push(LeafRef::from(&root));
        }

        let job = Job::new(task_id, config);
        let units: Vec<JobUnit> = leaves
            .into_iter()
            .enumerate()
            .map(|(i, leaf)| JobUnit {
                id: Uuid::new_v4(),
                job_id: job.id,
                task_id: leaf.id,
                position: i as i64,
                task_title: leaf.title,
                task_text: leaf.text,
                status: JobStatus::Pending,
                result: None,
                error: None,
                started_at: None,
                completed_at: None,
            })
            .collect();

        self.db.insert_job(&job, &units).await?;
        info!(job_id = %job.id, task_id = %task_id, units = units.len(), "Job created");
        Ok(JobDetail { job, units })
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Job, Error> {
        self.db
            .get_job(id)
            .await?
            .ok_or_else(|| JobError::NotFound { id }.into())
    }

    /// Job with every unit's full result payload.
    ///
    /// The stored status is returned as is. Every unit write reconciles
    /// before releasing the write lock, so it never lags the units.
    pub async fn detail(&self, id: Uuid) -> Result<JobDetail<JobUnit>, Error> {
        let job = self.get_job(id).await?;
        let units = self.db.list_units(id).await?;
        Ok(JobDetail { job, units })
    }

    /// Job with units reduced to their result summaries.
    pub async fn snapshot(&self, id: Uuid) -> Result<JobSnapshot, Error> {
        Ok(self.detail(id).await?.lite())
    }

    pub async fn get_unit(&self, job_id: Uuid, position: i64) -> Result<JobUnit, Error> {
        self.get_job(job_id).await?;
        self.db
            .get_unit(job_id, position)
            .await?
            .ok_or_else(|| JobError::UnitNotFound { job_id, position }.into())
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, Error> {
        Ok(self.db.list_jobs(filter).await?)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), Error> {
        if !self.db.delete_job(id).await? {
            return Err(JobError::NotFound { id }.into());
        }
        info!(job_id = %id, "Job deleted");
        Ok(())
    }

    pub async fn task_stats(&self, task_ids: &[Uuid]) -> Result<Vec<(Uuid, TaskJobStats)>, Error> {
        Ok(self.db.task_job_stats(task_ids).await?)
    }

    /// Recompute the job status from its persisted units and store it.
    pub async fn reconcile(&self, id: Uuid) -> Result<Job, Error> {
        let mut job = self.get_job(id).await?;
        let statuses = self.db.unit_statuses(id).await?;
        let derived = reconcile::derive(&statuses);
        let previous = job.status;

        if reconcile::apply(&mut job, derived, Utc::now()) {
            self.db.update_job(&job).await?;
            info!(job_id = %id, from = %previous, to = %job.status, "Job status reconciled");
        } else if previous.is_terminal() && derived != previous {
            debug!(job_id = %id, status = %previous, derived = %derived, "Terminal job left unchanged");
        }
        Ok(job)
    }

    /// Record a failed dispatch: the job becomes failed with `cause` and a
    /// completion time. Units are not touched. A job that already reached a
    /// terminal status through callbacks is returned unchanged.
    pub async fn mark_dispatch_failed(&self, id: Uuid, cause: &str) -> Result<Job, Error> {
        let _guard = self.write_lock().await;
        let mut job = self.get_job(id).await?;
        if job.status.is_terminal() {
            debug!(job_id = %id, status = %job.status, cause, "Late dispatch failure ignored");
            return Ok(job);
        }
        job.status = JobStatus::Failed;
        job.error = Some(format!("dispatch failed: {cause}"));
        job.completed_at = Some(Utc::now());
        self.db.update_job(&job).await?;
        warn!(job_id = %id, cause, "Job dispatch failed");
        Ok(job)
    }

    /// Persist an already-modified job.
    pub(crate) async fn save(&self, job: &Job) -> Result<(), Error> {
        Ok(self.db.update_job(job).await?)
    }

    pub(crate) async fn save_unit(&self, unit: &JobUnit) -> Result<(), Error> {
        Ok(self.db.update_unit(unit).await?)
    }

    pub(crate) async fn find_unit(
        &self,
        job_id: Uuid,
        position: i64,
    ) -> Result<Option<JobUnit>, Error> {
        Ok(self.db.get_unit(job_id, position).await?)
    }
}

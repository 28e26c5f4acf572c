//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::folders::model::{Folder, FolderDeletion, FolderListing};
use crate::jobs::model::{Job, JobFilter, JobStatus, JobUnit, TaskJobStats};
use crate::tasks::model::{Task, TaskFilter};

/// Backend-agnostic database trait covering folders, tasks, jobs and settings.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Folders ─────────────────────────────────────────────────────

    async fn insert_folder(&self, folder: &Folder) -> Result<(), DatabaseError>;

    async fn get_folder(&self, id: Uuid) -> Result<Option<Folder>, DatabaseError>;

    /// All folders with their direct task counts, unsorted.
    async fn list_folders(&self) -> Result<Vec<FolderListing>, DatabaseError>;

    /// Persist name, parent and order of an existing folder.
    async fn update_folder(&self, folder: &Folder) -> Result<(), DatabaseError>;

    /// The folder and every folder beneath it, deepest first.
    async fn folder_subtree(&self, id: Uuid) -> Result<Vec<Uuid>, DatabaseError>;

    /// Rewrite each listed folder's order to its index and its parent to `parent_id`.
    async fn reorder_folders(
        &self,
        ids: &[Uuid],
        parent_id: Option<Uuid>,
    ) -> Result<(), DatabaseError>;

    /// Delete a folder, its descendants, their tasks and every job derived
    /// from those tasks. Returns what was removed.
    async fn delete_folder_tree(&self, id: Uuid) -> Result<FolderDeletion, DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    async fn insert_task(&self, task: &Task) -> Result<(), DatabaseError>;

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, DatabaseError>;

    /// Tasks matching the filter, newest first.
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, DatabaseError>;

    async fn update_task(&self, task: &Task) -> Result<(), DatabaseError>;

    /// Delete a task and the jobs derived from it. Returns false if absent.
    async fn delete_task(&self, id: Uuid) -> Result<bool, DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    /// Insert a job and its units. On failure nothing is left behind.
    async fn insert_job(&self, job: &Job, units: &[JobUnit]) -> Result<(), DatabaseError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError>;

    /// Jobs matching the filter, newest first.
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, DatabaseError>;

    /// Persist status, error and timestamps of an existing job.
    async fn update_job(&self, job: &Job) -> Result<(), DatabaseError>;

    /// Delete a job and its units. Returns false if absent.
    async fn delete_job(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Per-task job counts by status. Every requested id gets an entry.
    async fn task_job_stats(
        &self,
        task_ids: &[Uuid],
    ) -> Result<Vec<(Uuid, TaskJobStats)>, DatabaseError>;

    // ── Job units ───────────────────────────────────────────────────

    /// Units of a job in position order.
    async fn list_units(&self, job_id: Uuid) -> Result<Vec<JobUnit>, DatabaseError>;

    async fn get_unit(&self, job_id: Uuid, position: i64)
    -> Result<Option<JobUnit>, DatabaseError>;

    /// Unit statuses only, skipping result payloads.
    async fn unit_statuses(&self, job_id: Uuid) -> Result<Vec<JobStatus>, DatabaseError>;

    /// Persist status, result, error and timestamps of an existing unit.
    async fn update_unit(&self, unit: &JobUnit) -> Result<(), DatabaseError>;

    // ── Settings ────────────────────────────────────────────────────

    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, DatabaseError>;

    async fn set_setting(&self, key: &str, value: &serde_json::Value)
    -> Result<(), DatabaseError>;
}

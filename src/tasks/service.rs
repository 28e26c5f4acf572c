//! Task CRUD.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, TaskError};
use crate::store::Database;
use crate::tasks::model::{NewTask, Task, TaskFilter, TaskPatch};

/// Task listing request as it arrives from callers.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub folder_id: Option<Uuid>,
    /// Include tasks of every folder below `folder_id`.
    pub subtree: bool,
    pub query: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Clone)]
pub struct TaskService {
    db: Arc<dyn Database>,
}

fn clean_text(text: &str) -> Result<String, TaskError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(TaskError::TextRequired);
    }
    Ok(text.to_string())
}

fn clean_title(title: Option<String>) -> Option<String> {
    title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

impl TaskService {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    async fn ensure_folder(&self, folder_id: Uuid) -> Result<(), Error> {
        if self.db.get_folder(folder_id).await?.is_none() {
            return Err(TaskError::FolderNotFound { id: folder_id }.into());
        }
        Ok(())
    }

    fn build(req: NewTask) -> Result<Task, TaskError> {
        let mut task = Task::new(req.folder_id, clean_text(&req.text)?).with_sub_ids(req.sub_ids);
        task.title = clean_title(req.title);
        Ok(task)
    }

    pub async fn create(&self, req: NewTask) -> Result<Task, Error> {
        self.ensure_folder(req.folder_id).await?;
        let task = Self::build(req)?;
        self.db.insert_task(&task).await?;
        info!(task_id = %task.id, folder_id = %task.folder_id, "Task created");
        Ok(task)
    }

    /// Create several tasks at once. Each gets a creation time one
    /// millisecond after the previous, so recency order follows input order.
    /// Nothing is written unless every item is valid.
    pub async fn create_batch(&self, reqs: Vec<NewTask>) -> Result<Vec<Task>, Error> {
        if reqs.is_empty() {
            return Err(TaskError::EmptyBatch.into());
        }

        let base = Utc::now();
        let mut tasks = Vec::with_capacity(reqs.len());
        for (i, req) in reqs.into_iter().enumerate() {
            self.ensure_folder(req.folder_id).await?;
            let mut task = Self::build(req)?;
            task.created_at = base + Duration::milliseconds(i as i64);
            tasks.push(task);
        }

        for task in &tasks {
            self.db.insert_task(task).await?;
        }
        info!(count = tasks.len(), "Task batch created");
        Ok(tasks)
    }

    pub async fn get(&self, id: Uuid) -> Result<Task, Error> {
        self.db
            .get_task(id)
            .await?
            .ok_or_else(|| TaskError::NotFound { id }.into())
    }

    pub async fn list(&self, query: TaskQuery) -> Result<Vec<Task>, Error> {
        let folder_ids = match query.folder_id {
            Some(folder_id) if query.subtree => Some(self.db.folder_subtree(folder_id).await?),
            Some(folder_id) => Some(vec![folder_id]),
            None => None,
        };
        let filter = TaskFilter {
            folder_ids,
            query: query.query,
            limit: query.limit,
            offset: query.offset,
        };
        Ok(self.db.list_tasks(&filter).await?)
    }

    pub async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<Task, Error> {
        let mut task = self.get(id).await?;

        if let Some(text) = patch.text {
            task.text = clean_text(&text)?;
        }
        if let Some(title) = patch.title {
            task.title = clean_title(title);
        }
        if let Some(folder_id) = patch.folder_id {
            self.ensure_folder(folder_id).await?;
            task.folder_id = folder_id;
        }
        if let Some(sub_ids) = patch.sub_ids {
            task.sub_ids = sub_ids;
        }

        self.db.update_task(&task).await?;
        Ok(task)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), Error> {
        if !self.db.delete_task(id).await? {
            return Err(TaskError::NotFound { id }.into());
        }
        info!(task_id = %id, "Task deleted");
        Ok(())
    }
}

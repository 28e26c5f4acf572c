//! Task types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::patch::nullable;

/// A unit of authored work. A task with no `sub_ids` is a leaf; otherwise
/// it is a chain whose references expand in stored order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub title: Option<String>,
    pub text: String,
    #[serde(default)]
    pub sub_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(folder_id: Uuid, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            folder_id,
            title: None,
            text: text.into(),
            sub_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_sub_ids(mut self, sub_ids: Vec<Uuid>) -> Self {
        self.sub_ids = sub_ids;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.sub_ids.is_empty()
    }
}

/// Request to create a task.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub folder_id: Uuid,
    pub text: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub sub_ids: Vec<Uuid>,
}

/// Partial task update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub title: Option<Option<String>>,
    #[serde(default)]
    pub folder_id: Option<Uuid>,
    #[serde(default)]
    pub sub_ids: Option<Vec<Uuid>>,
}

/// Task listing filter.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to tasks held by any of these folders.
    pub folder_ids: Option<Vec<Uuid>>,
    /// Case-insensitive substring match on title or text.
    pub query: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

//! Folder types and read-time sibling ordering.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::patch::nullable;

/// A node in the folder tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: Uuid,
    pub name: String,
    /// `None` for root-level folders.
    pub parent_id: Option<Uuid>,
    /// Explicit position among siblings. `None` means unordered.
    pub order_index: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Folder {
    pub fn new(name: impl Into<String>, parent_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            parent_id,
            order_index: None,
            created_at: Utc::now(),
        }
    }
}

/// A folder plus the number of tasks it directly holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderListing {
    #[serde(flatten)]
    pub folder: Folder,
    pub task_count: i64,
}

/// Request to create a folder.
#[derive(Debug, Clone, Deserialize)]
pub struct NewFolder {
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

/// Partial folder update. Absent fields are left alone; explicit `null`
/// clears `parent_id` (move to root) or `order_index` (back to unordered).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FolderPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub parent_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    pub order_index: Option<Option<i64>>,
}

/// Reorder request: the listed folders become children of `parent_id`
/// in the given order.
#[derive(Debug, Clone, Deserialize)]
pub struct ReorderRequest {
    pub order: Vec<Uuid>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

/// Counts removed by a cascading folder delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FolderDeletion {
    pub folders: u64,
    pub tasks: u64,
    pub jobs: u64,
}

/// Sibling comparison: explicitly ordered folders first by `order_index`,
/// then unordered ones newest first.
pub fn sibling_order(a: &Folder, b: &Folder) -> Ordering {
    match (a.order_index, b.order_index) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| b.created_at.cmp(&a.created_at)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.created_at.cmp(&a.created_at),
    }
}

/// Sort listings in place with [`sibling_order`].
pub fn sort_siblings(listings: &mut [FolderListing]) {
    listings.sort_by(|a, b| sibling_order(&a.folder, &b.folder));
}

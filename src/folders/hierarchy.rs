//! Folder tree integrity: cycle checks on reparent and sibling order assignment.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::{Error, FolderError};
use crate::store::Database;

/// Guards structural folder mutations.
///
/// Every call re-reads the current tree, so concurrent moves are validated
/// against whatever was last written.
#[derive(Clone)]
pub struct HierarchyGuard {
    db: Arc<dyn Database>,
}

impl HierarchyGuard {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Check that `id` may be placed under `parent_id` (`None` = root).
    ///
    /// Rejects a missing parent, the folder itself, or any of its descendants.
    pub async fn validate_reparent(
        &self,
        id: Uuid,
        parent_id: Option<Uuid>,
    ) -> Result<(), Error> {
        let Some(parent_id) = parent_id else {
            return Ok(());
        };
        if parent_id == id {
            return Err(FolderError::Cycle { id, parent_id }.into());
        }
        if self.db.get_folder(parent_id).await?.is_none() {
            return Err(FolderError::ParentNotFound { id: parent_id }.into());
        }
        let subtree = self.db.folder_subtree(id).await?;
        if subtree.contains(&parent_id) {
            return Err(FolderError::Cycle { id, parent_id }.into());
        }
        Ok(())
    }

    /// Make `sibling_ids` the children of `parent_id`, ordered by list position.
    ///
    /// Repeated ids keep their first position.
    pub async fn assign_order(
        &self,
        sibling_ids: &[Uuid],
        parent_id: Option<Uuid>,
    ) -> Result<Vec<Uuid>, Error> {
        let mut seen = HashSet::new();
        let ordered: Vec<Uuid> = sibling_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        if ordered.is_empty() {
            return Err(FolderError::EmptyOrder.into());
        }

        for id in &ordered {
            if self.db.get_folder(*id).await?.is_none() {
                return Err(FolderError::NotFound { id: *id }.into());
            }
            self.validate_reparent(*id, parent_id).await?;
        }

        self.db.reorder_folders(&ordered, parent_id).await?;
        info!(
            parent_id = ?parent_id,
            count = ordered.len(),
            "Folders reordered"
        );
        Ok(ordered)
    }
}

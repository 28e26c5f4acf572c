//! Folder CRUD on top of the hierarchy guard.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::{Error, FolderError};
use crate::folders::hierarchy::HierarchyGuard;
use crate::folders::model::{
    Folder, FolderDeletion, FolderListing, FolderPatch, NewFolder, ReorderRequest, sort_siblings,
};
use crate::store::Database;

/// Which folders a listing should include.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParentScope {
    #[default]
    Any,
    Root,
    Children(Uuid),
}

#[derive(Clone)]
pub struct FolderService {
    db: Arc<dyn Database>,
    guard: HierarchyGuard,
}

impl FolderService {
    pub fn new(db: Arc<dyn Database>) -> Self {
        let guard = HierarchyGuard::new(Arc::clone(&db));
        Self { db, guard }
    }

    pub fn guard(&self) -> &HierarchyGuard {
        &self.guard
    }

    pub async fn create(&self, req: NewFolder) -> Result<Folder, Error> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(FolderError::NameRequired.into());
        }
        if let Some(parent_id) = req.parent_id
            && self.db.get_folder(parent_id).await?.is_none()
        {
            return Err(FolderError::ParentNotFound { id: parent_id }.into());
        }

        let folder = Folder::new(name, req.parent_id);
        self.db.insert_folder(&folder).await?;
        info!(folder_id = %folder.id, parent_id = ?folder.parent_id, "Folder created");
        Ok(folder)
    }

    pub async fn get(&self, id: Uuid) -> Result<Folder, Error> {
        self.db
            .get_folder(id)
            .await?
            .ok_or_else(|| FolderError::NotFound { id }.into())
    }

    /// Folders in sibling order, optionally scoped to one parent and
    /// filtered by a case-insensitive name match.
    pub async fn list(
        &self,
        scope: ParentScope,
        query: Option<&str>,
    ) -> Result<Vec<FolderListing>, Error> {
        let needle = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase);

        let mut listings: Vec<FolderListing> = self
            .db
            .list_folders()
            .await?
            .into_iter()
            .filter(|l| match scope {
                ParentScope::Any => true,
                ParentScope::Root => l.folder.parent_id.is_none(),
                ParentScope::Children(parent) => l.folder.parent_id == Some(parent),
            })
            .filter(|l| match &needle {
                Some(n) => l.folder.name.to_lowercase().contains(n.as_str()),
                None => true,
            })
            .collect();
        sort_siblings(&mut listings);
        Ok(listings)
    }

    pub async fn update(&self, id: Uuid, patch: FolderPatch) -> Result<Folder, Error> {
        let mut folder = self.get(id).await?;

        if let Some(name) = patch.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(FolderError::NameRequired.into());
            }
            folder.name = name.to_string();
        }
        if let Some(parent_id) = patch.parent_id {
            self.guard.validate_reparent(id, parent_id).await?;
            if folder.parent_id != parent_id {
                info!(folder_id = %id, from = ?folder.parent_id, to = ?parent_id, "Folder reparented");
            }
            folder.parent_id = parent_id;
        }
        if let Some(order_index) = patch.order_index {
            folder.order_index = order_index;
        }

        self.db.update_folder(&folder).await?;
        Ok(folder)
    }

    pub async fn reorder(&self, req: ReorderRequest) -> Result<Vec<Uuid>, Error> {
        self.guard.assign_order(&req.order, req.parent_id).await
    }

    /// Delete the folder with everything beneath it.
    pub async fn delete(&self, id: Uuid) -> Result<FolderDeletion, Error> {
        self.get(id).await?;
        let deleted = self.db.delete_folder_tree(id).await?;
        info!(
            folder_id = %id,
            folders = deleted.folders,
            tasks = deleted.tasks,
            jobs = deleted.jobs,
            "Folder tree deleted"
        );
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::LibSqlBackend;

    async fn service() -> FolderService {
        FolderService::new(Arc::new(LibSqlBackend::new_memory().await.unwrap()))
    }

    fn new_folder(name: &str, parent_id: Option<Uuid>) -> NewFolder {
        NewFolder {
            name: name.into(),
            parent_id,
        }
    }

    #[tokio::test]
    async fn create_trims_and_validates() {
        let svc = service().await;
        let folder = svc.create(new_folder("  Smoke  ", None)).await.unwrap();
        assert_eq!(folder.name, "Smoke");

        let err = svc.create(new_folder("   ", None)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);

        let err = svc
            .create(new_folder("orphan", Some(Uuid::new_v4())))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn list_scopes() {
        let svc = service().await;
        let root = svc.create(new_folder("Root", None)).await.unwrap();
        let child = svc.create(new_folder("Child", Some(root.id))).await.unwrap();

        let roots = svc.list(ParentScope::Root, None).await.unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].folder.id, root.id);

        let children = svc.list(ParentScope::Children(root.id), None).await.unwrap();
        assert_eq!(children[0].folder.id, child.id);

        let named = svc.list(ParentScope::Any, Some("chi")).await.unwrap();
        assert_eq!(named.len(), 1);
    }

    #[tokio::test]
    async fn update_moves_to_root_and_rejects_cycles() {
        let svc = service().await;
        let root = svc.create(new_folder("Root", None)).await.unwrap();
        let child = svc.create(new_folder("Child", Some(root.id))).await.unwrap();

        let err = svc
            .update(
                root.id,
                FolderPatch {
                    parent_id: Some(Some(child.id)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let moved = svc
            .update(
                child.id,
                FolderPatch {
                    parent_id: Some(None),
                    name: Some("Top".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(moved.parent_id.is_none());
        assert_eq!(svc.get(child.id).await.unwrap().name, "Top");
    }

    #[tokio::test]
    async fn delete_unknown_is_not_found() {
        let svc = service().await;
        let err = svc.delete(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

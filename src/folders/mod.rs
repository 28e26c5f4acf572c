//! Folder tree holding tasks.

pub mod hierarchy;
pub mod model;
pub mod service;

pub use hierarchy::HierarchyGuard;
pub use model::{Folder, FolderListing};
pub use service::{FolderService, ParentScope};

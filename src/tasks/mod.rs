//! Authored tasks and their flattening into execution plans.

pub mod flatten;
pub mod model;
pub mod service;

pub use flatten::{LeafRef, TaskLookup, flatten};
pub use model::Task;
pub use service::{TaskQuery, TaskService};

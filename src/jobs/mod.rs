//! Jobs: plan materialization, reconciliation, callbacks and polling.

pub mod callback;
pub mod model;
pub mod poller;
pub mod reconcile;
pub mod service;

pub use callback::{CallbackIngest, CompletionCallback, UnitCallback};
pub use model::{Job, JobDetail, JobSnapshot, JobStatus, JobUnit, UnitLite};
pub use poller::{HttpJobSource, JobSource, PollClient, PollHandle};
pub use service::JobStore;

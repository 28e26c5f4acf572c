//! taskpilot: task-chain orchestrator for a remote execution worker.

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod folders;
pub mod jobs;
pub mod patch;
pub mod settings;
pub mod store;
pub mod tasks;

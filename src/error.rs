//! Error types for taskpilot.

use std::time::Duration;

use uuid::Uuid;

use crate::jobs::model::JobStatus;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Folder error: {0}")]
    Folder(#[from] FolderError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is malformed.
    Invalid,
    /// A referenced entity does not exist.
    NotFound,
    /// The request is well-formed but contradicts stored state.
    Conflict,
    /// A downstream dependency (the worker) is unreachable.
    Unavailable,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Internal,
            Self::Database(DatabaseError::NotFound { .. }) => ErrorKind::NotFound,
            Self::Database(DatabaseError::Constraint(_)) => ErrorKind::Conflict,
            Self::Database(_) => ErrorKind::Internal,
            Self::Folder(e) => match e {
                FolderError::NotFound { .. } | FolderError::ParentNotFound { .. } => {
                    ErrorKind::NotFound
                }
                FolderError::Cycle { .. } => ErrorKind::Conflict,
                FolderError::NameRequired | FolderError::EmptyOrder => ErrorKind::Invalid,
            },
            Self::Task(e) => match e {
                TaskError::NotFound { .. } | TaskError::FolderNotFound { .. } => {
                    ErrorKind::NotFound
                }
                TaskError::TextRequired | TaskError::EmptyBatch => ErrorKind::Invalid,
            },
            Self::Job(e) => match e {
                JobError::NotFound { .. }
                | JobError::TaskNotFound { .. }
                | JobError::UnitNotFound { .. } => ErrorKind::NotFound,
                JobError::UnitTaskMismatch { .. } => ErrorKind::Conflict,
                JobError::InvalidConfig
                | JobError::InvalidStatus(_)
                | JobError::NonTerminalCompletion(_)
                | JobError::InvalidTimestamp { .. }
                | JobError::InvalidPosition(_)
                | JobError::InvalidTaskId(_) => ErrorKind::Invalid,
            },
            Self::Agent(_) => ErrorKind::Unavailable,
            Self::Settings(SettingsError::NotAnObject) => ErrorKind::Invalid,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Folder hierarchy errors.
#[derive(Debug, thiserror::Error)]
pub enum FolderError {
    #[error("Folder {id} not found")]
    NotFound { id: Uuid },

    #[error("Folder name is required")]
    NameRequired,

    #[error("Parent folder {id} not found")]
    ParentNotFound { id: Uuid },

    #[error("Folder {id} cannot be moved under {parent_id}: it would create a cycle")]
    Cycle { id: Uuid, parent_id: Uuid },

    #[error("Reorder list is empty")]
    EmptyOrder,
}

/// Task-related errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} not found")]
    NotFound { id: Uuid },

    #[error("Task text is required")]
    TextRequired,

    #[error("Folder {id} not found")]
    FolderNotFound { id: Uuid },

    #[error("Batch contains no tasks")]
    EmptyBatch,
}

/// Job-related errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Task {id} not found")]
    TaskNotFound { id: Uuid },

    #[error("Job config must be a JSON object")]
    InvalidConfig,

    #[error("Job {job_id} has no unit at position {position}")]
    UnitNotFound { job_id: Uuid, position: i64 },

    #[error("Unit {position} of job {job_id} belongs to task {expected}, not {actual}")]
    UnitTaskMismatch {
        job_id: Uuid,
        position: i64,
        expected: Uuid,
        actual: Uuid,
    },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Completion status must be completed or failed, got {0}")]
    NonTerminalCompletion(JobStatus),

    #[error("Invalid timestamp for {field}: {value}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("Invalid task_index: {0}")]
    InvalidPosition(i64),

    #[error("Invalid task_id: {0}")]
    InvalidTaskId(String),
}

/// Errors talking to the remote worker.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent at {url} is not connected: {reason}")]
    NotConnected { url: String, reason: String },

    #[error("Agent request failed: {0}")]
    Transport(String),

    #[error("Agent request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Agent responded with HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("Agent rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("Invalid response from agent: {0}")]
    InvalidResponse(String),
}

/// Settings errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Setting value must be a JSON object")]
    NotAnObject,
}

/// Result type alias for taskpilot.
pub type Result<T> = std::result::Result<T, Error>;

//! Configuration types.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default worker base URL.
pub const DEFAULT_AGENT_URL: &str = "http://127.0.0.1:8000";

/// Where the remote worker lives and how long we wait for it.
#[derive(Debug, Clone)]
pub struct AgentEndpoint {
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// Upper bound on every request made to the worker.
    pub timeout: Duration,
}

impl AgentEndpoint {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

impl Default for AgentEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_URL, Duration::from_secs(10))
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server listens on.
    pub bind: SocketAddr,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Externally reachable base URL, used to build callback addresses.
    pub public_url: String,
    pub agent: AgentEndpoint,
    /// Optional directory for daily-rolling log files.
    pub log_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Load configuration from `TASKPILOT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_raw = lookup("TASKPILOT_BIND").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind: SocketAddr = bind_raw.parse().map_err(|e| ConfigError::InvalidValue {
            key: "TASKPILOT_BIND".into(),
            message: format!("{bind_raw}: {e}"),
        })?;

        let db_path = lookup("TASKPILOT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/taskpilot.db"));

        let public_url = lookup("TASKPILOT_PUBLIC_URL")
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", bind.port()))
            .trim_end_matches('/')
            .to_string();

        let agent_url =
            lookup("TASKPILOT_AGENT_URL").unwrap_or_else(|| DEFAULT_AGENT_URL.to_string());

        let timeout_secs: u64 = match lookup("TASKPILOT_AGENT_TIMEOUT_SECS") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "TASKPILOT_AGENT_TIMEOUT_SECS".into(),
                message: format!("expected whole seconds, got {raw:?}"),
            })?,
            None => 10,
        };
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TASKPILOT_AGENT_TIMEOUT_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }

        let log_dir = lookup("TASKPILOT_LOG_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            bind,
            db_path,
            public_url,
            agent: AgentEndpoint::new(agent_url, Duration::from_secs(timeout_secs)),
            log_dir,
        })
    }
}

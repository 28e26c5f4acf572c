//! Persisted worker configuration.
//!
//! The agent configuration is a free-form JSON object stored under a single
//! settings key. It is used as the job configuration whenever a run request
//! does not carry its own.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::info;

use crate::error::{Error, SettingsError};
use crate::store::Database;

pub const AGENT_CONFIG_KEY: &str = "agent_config";

/// Defaults written by the initial migration.
pub fn default_agent_config() -> Value {
    json!({
        "gemini_model": "gemini-3-flash-preview",
        "max_steps": 1000,
        "headless": false,
        "use_vision": true,
        "max_failures": 10,
        "max_actions_per_step": 1,
        "use_thinking": false,
        "flash_mode": true,
        "llm_timeout": 240,
        "step_timeout": 240,
        "override_system_message": "",
        "extend_system_message": ""
    })
}

#[derive(Clone)]
pub struct AgentSettings {
    db: Arc<dyn Database>,
}

impl AgentSettings {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Stored configuration, or the defaults if none is stored.
    pub async fn agent_config(&self) -> Result<Value, Error> {
        match self.db.get_setting(AGENT_CONFIG_KEY).await? {
            Some(value) if value.is_object() => Ok(value),
            _ => Ok(default_agent_config()),
        }
    }

    /// Replace the stored configuration. Must be a JSON object.
    pub async fn set_agent_config(&self, value: Value) -> Result<Value, Error> {
        if !value.is_object() {
            return Err(SettingsError::NotAnObject.into());
        }
        self.db.set_setting(AGENT_CONFIG_KEY, &value).await?;
        info!("Agent config updated");
        Ok(value)
    }
}

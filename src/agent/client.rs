//! HTTP client for the remote worker.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::api::envelope::Envelope;
use crate::config::AgentEndpoint;
use crate::error::AgentError;

/// Identity of the worker process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub pid: Option<i64>,
}

/// Liveness report returned by the worker's connect endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub uptime_seconds: Option<f64>,
    #[serde(default)]
    pub service: ServiceInfo,
}

/// Talks to one worker. Every request is bounded by the endpoint timeout.
#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    endpoint: AgentEndpoint,
}

impl AgentClient {
    pub fn new(endpoint: AgentEndpoint) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| AgentError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &AgentEndpoint {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint.base_url)
    }

    fn transport_error(&self, e: reqwest::Error) -> AgentError {
        if e.is_timeout() {
            AgentError::Timeout(self.endpoint.timeout)
        } else {
            AgentError::Transport(e.to_string())
        }
    }

    /// Read an envelope and fail unless it reports success.
    async fn read_envelope(resp: reqwest::Response) -> Result<Option<Value>, AgentError> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;
        if !status.is_success() {
            debug!(status = status.as_u16(), body = %body, "Agent returned error status");
            return Err(AgentError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let envelope: Envelope<Value> = serde_json::from_str(&body)
            .map_err(|e| AgentError::InvalidResponse(format!("{e}: {body}")))?;
        if !envelope.is_ok() {
            return Err(AgentError::Rejected {
                code: envelope.code,
                message: envelope.message,
            });
        }
        Ok(envelope.data)
    }

    /// Probe worker liveness. Any failure, including a non-zero code or a
    /// missing payload, means "not connected".
    pub async fn probe(&self) -> Result<AgentInfo, AgentError> {
        let url = self.url("/system/connect");
        let not_connected = |reason: String| AgentError::NotConnected {
            url: self.endpoint.base_url.clone(),
            reason,
        };

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| not_connected(self.transport_error(e).to_string()))?;
        let data = Self::read_envelope(resp)
            .await
            .map_err(|e| not_connected(e.to_string()))?
            .ok_or_else(|| not_connected("empty connect response".to_string()))?;

        serde_json::from_value(data).map_err(|e| not_connected(format!("bad agent info: {e}")))
    }

    /// Submit a run request. Success only means the worker accepted it.
    pub async fn run(&self, body: &Value) -> Result<Option<Value>, AgentError> {
        let resp = self
            .http
            .post(self.url("/autopilot/run"))
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        Self::read_envelope(resp).await
    }
}

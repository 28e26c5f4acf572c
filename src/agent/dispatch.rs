//! Hands flattened plans to the worker.
//!
//! A run is probe, create, dispatch. The worker's synchronous answer only
//! acknowledges the request; progress arrives later through callbacks.

use serde_json::{Map, Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::client::AgentClient;
use crate::error::{AgentError, Error};
use crate::jobs::model::{JobDetail, JobUnit};
use crate::jobs::service::JobStore;
use crate::settings::AgentSettings;

/// Result of handing a job to the worker.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The worker accepted the request.
    Accepted(JobDetail<JobUnit>),
    /// The request failed; the job has already been marked failed.
    Failed {
        detail: JobDetail<JobUnit>,
        cause: AgentError,
    },
}

impl DispatchOutcome {
    pub fn detail(&self) -> &JobDetail<JobUnit> {
        match self {
            Self::Accepted(detail) | Self::Failed { detail, .. } => detail,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

#[derive(Clone)]
pub struct DispatchClient {
    agent: AgentClient,
    jobs: JobStore,
    settings: AgentSettings,
    public_url: String,
}

impl DispatchClient {
    pub fn new(
        agent: AgentClient,
        jobs: JobStore,
        settings: AgentSettings,
        public_url: impl Into<String>,
    ) -> Self {
        let public_url: String = public_url.into();
        Self {
            agent,
            jobs,
            settings,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn agent(&self) -> &AgentClient {
        &self.agent
    }

    /// Base the worker appends `/task` and `/complete` to.
    pub fn callback_url(&self, job_id: Uuid) -> String {
        format!("{}/api/jobs/{job_id}/callback", self.public_url)
    }

    /// Request body: config keys at top level, then the reserved
    /// `job_id`, `tasks` and `callback_url` keys (which win on collision).
    pub fn build_request(&self, detail: &JobDetail<JobUnit>) -> Value {
        let mut body = match &detail.job.config {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };

        let mut units: Vec<&JobUnit> = detail.units.iter().collect();
        units.sort_by_key(|u| u.position);
        let tasks: Vec<Value> = units
            .iter()
            .map(|u| json!({"id": u.task_id, "text": u.task_text}))
            .collect();

        body.insert("job_id".into(), json!(detail.job.id));
        body.insert("tasks".into(), Value::Array(tasks));
        body.insert(
            "callback_url".into(),
            Value::String(self.callback_url(detail.job.id)),
        );
        Value::Object(body)
    }

    /// Send an existing job. On failure the job is moved to failed with the
    /// cause recorded; it is never retried.
    pub async fn dispatch(&self, detail: JobDetail<JobUnit>) -> Result<DispatchOutcome, Error> {
        let body = self.build_request(&detail);
        match self.agent.run(&body).await {
            Ok(_) => {
                info!(job_id = %detail.job.id, units = detail.units.len(), "Dispatch accepted");
                Ok(DispatchOutcome::Accepted(detail))
            }
            Err(cause) => {
                let job = self
                    .jobs
                    .mark_dispatch_failed(detail.job.id, &cause.to_string())
                    .await?;
                Ok(DispatchOutcome::Failed {
                    detail: JobDetail {
                        job,
                        units: detail.units,
                    },
                    cause,
                })
            }
        }
    }

    /// Probe the worker, create a job for `task_id` and dispatch it.
    ///
    /// An unreachable worker refuses the run before anything is persisted.
    /// Without an explicit config the stored agent configuration is used.
    pub async fn run(&self, task_id: Uuid, config: Option<Value>) -> Result<DispatchOutcome, Error> {
        if let Err(e) = self.agent.probe().await {
            warn!(task_id = %task_id, error = %e, "Run refused, worker not connected");
            return Err(e.into());
        }

        let config = match config {
            Some(config) => config,
            None => self.settings.agent_config().await?,
        };
        let detail = self.jobs.create_job(task_id, config).await?;
        self.dispatch(detail).await
    }
}

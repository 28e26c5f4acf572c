//! Observer-side polling of a job until it reaches a terminal status.
//!
//! Polling never writes; it only converges on whatever callbacks and
//! reconciliation have already persisted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::envelope::Envelope;
use crate::error::{AgentError, Error, JobError};
use crate::jobs::model::JobSnapshot;
use crate::jobs::service::JobStore;

/// Where a poller reads job state from.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn fetch_job(&self, id: Uuid) -> Result<JobSnapshot, Error>;
}

#[async_trait]
impl JobSource for JobStore {
    async fn fetch_job(&self, id: Uuid) -> Result<JobSnapshot, Error> {
        self.snapshot(id).await
    }
}

/// Reads jobs from a running orchestrator over its admin API.
#[derive(Clone)]
pub struct HttpJobSource {
    http: reqwest::Client,
    base_url: String,
}

impl HttpJobSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Transport(format!("failed to build HTTP client: {e}")))?;
        let base_url: String = base_url.into();
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    async fn fetch_job(&self, id: Uuid) -> Result<JobSnapshot, Error> {
        let resp = self
            .http
            .get(format!("{}/api/admin/jobs/{id}", self.base_url))
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(JobError::NotFound { id }.into());
        }
        if !status.is_success() {
            return Err(AgentError::HttpStatus {
                status: status.as_u16(),
            }
            .into());
        }

        let envelope: Envelope<JobSnapshot> = resp
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;
        if !envelope.is_ok() {
            return Err(AgentError::Rejected {
                code: envelope.code,
                message: envelope.message,
            }
            .into());
        }
        envelope
            .data
            .ok_or_else(|| AgentError::InvalidResponse("missing job payload".into()).into())
    }
}

/// Running poll loop. Dropping the handle does not stop the loop.
pub struct PollHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl PollHandle {
    /// Ask the loop to exit at its next wake.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to exit.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

pub struct PollClient;

impl PollClient {
    /// Fetch `job_id` every `interval`, passing each successful snapshot to
    /// `on_update`. Exits after the first terminal snapshot or when stopped.
    /// Fetch errors are logged and retried on the next tick.
    pub fn poll<F>(
        source: Arc<dyn JobSource>,
        job_id: Uuid,
        interval: Duration,
        mut on_update: F,
    ) -> PollHandle
    where
        F: FnMut(&JobSnapshot) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = tokio::spawn(async move {
            loop {
                if stop_flag.load(Ordering::Relaxed) {
                    debug!(job_id = %job_id, "Poller stopped");
                    return;
                }

                match source.fetch_job(job_id).await {
                    Ok(snapshot) => {
                        on_update(&snapshot);
                        if snapshot.job.status.is_terminal() {
                            info!(job_id = %job_id, status = %snapshot.job.status, "Poller observed terminal job");
                            return;
                        }
                    }
                    Err(e) => debug!(job_id = %job_id, error = %e, "Job poll failed"),
                }

                if stop_flag.load(Ordering::Relaxed) {
                    return;
                }
                tokio::time::sleep(interval).await;
            }
        });

        PollHandle { stop, handle }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicI64, AtomicUsize};

    use serde_json::json;

    use super::*;
    use crate::folders::model::Folder;
    use crate::jobs::model::{JobStatus, JobUnit};
    use crate::store::{Database, LibSqlBackend};
    use crate::tasks::model::Task;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    async fn store_with_job() -> (Arc<dyn Database>, JobStore, Uuid, JobUnit) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let folder = Folder::new("f", None);
        db.insert_folder(&folder).await.unwrap();
        let task = Task::new(folder.id, "t");
        db.insert_task(&task).await.unwrap();
        let store = JobStore::new(Arc::clone(&db));
        let detail = store.create_job(task.id, json!({})).await.unwrap();
        let unit = detail.units[0].clone();
        (db, store, detail.job.id, unit)
    }

    #[tokio::test]
    async fn exits_on_terminal_status() {
        let (db, store, job_id, mut unit) = store_with_job().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let handle = PollClient::poll(
            Arc::new(store.clone()),
            job_id,
            Duration::from_millis(20),
            move |s| sink.lock().unwrap().push(s.job.status),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        unit.status = JobStatus::Completed;
        db.update_unit(&unit).await.unwrap();
        store.reconcile(job_id).await.unwrap();

        tokio::time::timeout(TEST_TIMEOUT, handle.join())
            .await
            .expect("poller should exit");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.first(), Some(&JobStatus::Pending));
        assert_eq!(seen.last(), Some(&JobStatus::Completed));
    }

    #[tokio::test]
    async fn stop_ends_a_pending_poll() {
        let (_db, store, job_id, _unit) = store_with_job().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let handle = PollClient::poll(
            Arc::new(store),
            job_id,
            Duration::from_millis(10),
            move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            },
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
        tokio::time::timeout(TEST_TIMEOUT, handle.join())
            .await
            .expect("poller should stop");
        assert!(calls.load(Ordering::Relaxed) >= 1);
    }

    struct Flaky {
        inner: JobStore,
        failures: AtomicI64,
    }

    #[async_trait]
    impl JobSource for Flaky {
        async fn fetch_job(&self, id: Uuid) -> Result<JobSnapshot, Error> {
            if self.failures.fetch_sub(1, Ordering::Relaxed) > 0 {
                return Err(AgentError::Transport("connection reset".into()).into());
            }
            self.inner.fetch_job(id).await
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let (_db, store, job_id, _unit) = store_with_job().await;
        store.mark_dispatch_failed(job_id, "down").await.unwrap();

        let source = Arc::new(Flaky {
            inner: store,
            failures: AtomicI64::new(2),
        });
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let handle = PollClient::poll(source, job_id, Duration::from_millis(5), move |s| {
            *sink.lock().unwrap() = Some(s.job.status);
        });

        tokio::time::timeout(TEST_TIMEOUT, handle.join())
            .await
            .expect("poller should finish");
        assert_eq!(*seen.lock().unwrap(), Some(JobStatus::Failed));
    }
}

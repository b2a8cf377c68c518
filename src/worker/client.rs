//! # Model Worker Client
//!
//! HTTP client for seismicity forecast model workers.
//!
//! ## Overview
//!
//! A worker exposes one collection resource, `v1/sfm/run`, relative to its
//! base URL:
//!
//! - `POST v1/sfm/run` submits a task and answers `202` with its id
//! - `GET v1/sfm/run/{id}` reports the task's state (see [`classify_poll_response`])
//! - `DELETE v1/sfm/run/{id}` drops the task and its result on the worker
//!
//! The client performs exactly one request per call. Retry policy belongs to
//! the caller: submissions are never retried, queries are retried by the
//! poller against its failure budget.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{header, Client, Url};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::errors::{WorkerError, WorkerResult};
use super::payload::RunPayload;
use super::protocol::{classify_poll_response, classify_submit_response, TaskStatus};
use crate::config::WorkerClientConfig;
use crate::constants::worker_protocol::RUN_ENDPOINT;
use crate::models::{ModelReference, RemoteTaskId};

/// One remote model worker
#[async_trait]
pub trait ModelWorker: Send + Sync {
    /// Submit a task; returns the worker's task id
    async fn submit(&self, payload: &RunPayload) -> WorkerResult<RemoteTaskId>;

    /// Query the current state of a task
    async fn query(&self, task: &RemoteTaskId) -> WorkerResult<TaskStatus>;

    /// Drop a task and its result on the worker
    async fn delete(&self, task: &RemoteTaskId) -> WorkerResult<()>;

    fn base_url(&self) -> &str;
}

/// Resolves the worker serving a model
pub trait WorkerProvider: Send + Sync {
    fn worker_for(&self, model: &ModelReference) -> WorkerResult<Arc<dyn ModelWorker>>;
}

pub struct HttpModelWorker {
    client: Client,
    base_url: Url,
}

impl std::fmt::Debug for HttpModelWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpModelWorker")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl HttpModelWorker {
    pub fn new(base_url: &str, config: &WorkerClientConfig) -> WorkerResult<Self> {
        Self::with_client(build_http_client(config)?, base_url)
    }

    /// Share an existing connection pool
    pub fn with_client(client: Client, base_url: &str) -> WorkerResult<Self> {
        let invalid = |reason: String| WorkerError::InvalidUrl {
            url: base_url.to_string(),
            reason,
        };

        let mut url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(invalid("URL cannot be a base".to_string()));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url: url,
        })
    }

    fn run_url(&self, task: Option<&RemoteTaskId>) -> WorkerResult<Url> {
        let relative = match task {
            Some(task) => format!("{RUN_ENDPOINT}/{task}"),
            None => RUN_ENDPOINT.to_string(),
        };
        self.base_url
            .join(&relative)
            .map_err(|e| WorkerError::InvalidUrl {
                url: format!("{}{relative}", self.base_url),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ModelWorker for HttpModelWorker {
    async fn submit(&self, payload: &RunPayload) -> WorkerResult<RemoteTaskId> {
        let url = self.run_url(None)?;
        let body = payload.encode()?;

        debug!(url = %url, bytes = body.len(), "Submitting model run");

        let response = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        let task = classify_submit_response(status, &text)?;
        info!(worker = %self.base_url, task_id = %task, "Model worker accepted task");
        Ok(task)
    }

    async fn query(&self, task: &RemoteTaskId) -> WorkerResult<TaskStatus> {
        let url = self.run_url(Some(task))?;

        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        debug!(task_id = %task, http_status = status, "Queried model worker task");
        classify_poll_response(status, &text)
    }

    async fn delete(&self, task: &RemoteTaskId) -> WorkerResult<()> {
        let url = self.run_url(Some(task))?;

        let response = self.client.delete(url).send().await?;
        let status = response.status();
        if status.is_success() {
            debug!(task_id = %task, "Deleted model worker task");
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        warn!(task_id = %task, http_status = status.as_u16(), "Model worker refused task deletion");
        Err(WorkerError::Http {
            status: status.as_u16(),
            detail,
        })
    }

    fn base_url(&self) -> &str {
        self.base_url.as_str()
    }
}

fn build_http_client(config: &WorkerClientConfig) -> WorkerResult<Client> {
    Client::builder()
        .timeout(config.request_timeout())
        .connect_timeout(config.connect_timeout())
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| WorkerError::Connection(format!("Failed to create HTTP client: {e}")))
}

/// Hands out one [`HttpModelWorker`] per worker base URL, all sharing one
/// connection pool
pub struct HttpWorkerProvider {
    client: Client,
    workers: DashMap<String, Arc<HttpModelWorker>>,
}

impl HttpWorkerProvider {
    pub fn new(config: &WorkerClientConfig) -> WorkerResult<Self> {
        Ok(Self {
            client: build_http_client(config)?,
            workers: DashMap::new(),
        })
    }

    pub fn cached_workers(&self) -> usize {
        self.workers.len()
    }
}

impl WorkerProvider for HttpWorkerProvider {
    fn worker_for(&self, model: &ModelReference) -> WorkerResult<Arc<dyn ModelWorker>> {
        if let Some(worker) = self.workers.get(&model.url) {
            let worker: Arc<dyn ModelWorker> = worker.value().clone();
            return Ok(worker);
        }

        let created = Arc::new(HttpModelWorker::with_client(
            self.client.clone(),
            &model.url,
        )?);
        let worker: Arc<dyn ModelWorker> = self
            .workers
            .entry(model.url.clone())
            .or_insert(created)
            .value()
            .clone();
        Ok(worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(base: &str) -> HttpModelWorker {
        HttpModelWorker::new(base, &WorkerClientConfig::default()).unwrap()
    }

    #[test]
    fn test_run_urls() {
        let plain = worker("http://worker:5000");
        assert_eq!(
            plain.run_url(None).unwrap().as_str(),
            "http://worker:5000/v1/sfm/run"
        );

        let prefixed = worker("http://gateway/models/etas");
        assert_eq!(
            prefixed
                .run_url(Some(&RemoteTaskId::new("abc")))
                .unwrap()
                .as_str(),
            "http://gateway/models/etas/v1/sfm/run/abc"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpModelWorker::new("not a url", &WorkerClientConfig::default()),
            Err(WorkerError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_provider_caches_per_url() {
        let provider = HttpWorkerProvider::new(&WorkerClientConfig::default()).unwrap();
        let etas = ModelReference::new("etas", "http://worker-a:5000");
        let em1 = ModelReference::new("em1", "http://worker-a:5000");
        let other = ModelReference::new("oq", "http://worker-b:5000");

        provider.worker_for(&etas).unwrap();
        provider.worker_for(&em1).unwrap();
        provider.worker_for(&other).unwrap();
        assert_eq!(provider.cached_workers(), 2);
    }
}

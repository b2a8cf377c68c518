use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use seismo_forecast::models::{ModelReference, ModelResult, RemoteTaskId};
use seismo_forecast::worker::{
    ModelWorker, RunPayload, TaskStatus, WorkerError, WorkerProvider, WorkerResult,
};

/// Runs while a submit is in flight, before the worker answers
pub type SubmitHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Scripted stand-in for a remote model worker
///
/// Queries answer from the poll script in order; once it is exhausted every
/// query reports the task complete. Every call is recorded.
pub struct MockWorker {
    base_url: String,
    submit_failure: Mutex<Option<WorkerError>>,
    submit_hook: Mutex<Option<SubmitHook>>,
    poll_script: Mutex<VecDeque<WorkerResult<TaskStatus>>>,
    result: ModelResult,
    next_task: AtomicUsize,
    submits: Mutex<Vec<RunPayload>>,
    queries: Mutex<Vec<RemoteTaskId>>,
    deletes: Mutex<Vec<RemoteTaskId>>,
}

impl MockWorker {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            submit_failure: Mutex::new(None),
            submit_hook: Mutex::new(None),
            poll_script: Mutex::new(VecDeque::new()),
            result: completed_result(),
            next_task: AtomicUsize::new(1),
            submits: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
        }
    }

    /// Every submit fails with `error`
    pub fn reject_submits(&self, error: WorkerError) {
        *self.submit_failure.lock() = Some(error);
    }

    pub fn accept_submits(&self) {
        *self.submit_failure.lock() = None;
    }

    /// Await `hook` inside every submit
    pub fn on_submit<F>(&self, hook: F)
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        *self.submit_hook.lock() = Some(Arc::new(hook));
    }

    /// Queue query replies, answered in order
    pub fn script(&self, replies: impl IntoIterator<Item = WorkerResult<TaskStatus>>) {
        self.poll_script.lock().extend(replies);
    }

    pub fn submits(&self) -> Vec<RunPayload> {
        self.submits.lock().clone()
    }

    pub fn submit_count(&self) -> usize {
        self.submits.lock().len()
    }

    pub fn queries(&self) -> Vec<RemoteTaskId> {
        self.queries.lock().clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn deletes(&self) -> Vec<RemoteTaskId> {
        self.deletes.lock().clone()
    }
}

impl std::fmt::Debug for MockWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockWorker")
            .field("base_url", &self.base_url)
            .field("submits", &self.submit_count())
            .field("queries", &self.query_count())
            .finish()
    }
}

#[async_trait]
impl ModelWorker for MockWorker {
    async fn submit(&self, payload: &RunPayload) -> WorkerResult<RemoteTaskId> {
        self.submits.lock().push(payload.clone());
        let hook = self.submit_hook.lock().clone();
        if let Some(hook) = hook {
            hook().await;
        }
        if let Some(error) = self.submit_failure.lock().clone() {
            return Err(error);
        }
        let n = self.next_task.fetch_add(1, Ordering::SeqCst);
        Ok(RemoteTaskId::new(format!("task-{n}")))
    }

    async fn query(&self, task: &RemoteTaskId) -> WorkerResult<TaskStatus> {
        self.queries.lock().push(task.clone());
        let scripted = self.poll_script.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(TaskStatus::Complete(self.result.clone())))
    }

    async fn delete(&self, task: &RemoteTaskId) -> WorkerResult<()> {
        self.deletes.lock().push(task.clone());
        Ok(())
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// One [`MockWorker`] per worker URL, created on first use
#[derive(Debug, Default)]
pub struct MockWorkerProvider {
    workers: Mutex<HashMap<String, Arc<MockWorker>>>,
}

impl MockWorkerProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker(&self, url: &str) -> Arc<MockWorker> {
        self.workers
            .lock()
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(MockWorker::new(url)))
            .clone()
    }

    pub fn total_submits(&self) -> usize {
        self.workers
            .lock()
            .values()
            .map(|worker| worker.submit_count())
            .sum()
    }
}

impl WorkerProvider for MockWorkerProvider {
    fn worker_for(&self, model: &ModelReference) -> WorkerResult<Arc<dyn ModelWorker>> {
        let worker: Arc<dyn ModelWorker> = self.worker(&model.url);
        Ok(worker)
    }
}

pub fn completed_result() -> ModelResult {
    ModelResult::from_payload(serde_json::json!({
        "samples": [{
            "starttime": "2024-05-01T00:00:00Z",
            "endtime": "2024-05-01T06:00:00Z",
            "rate": 1.7,
            "b_value": 1.1,
            "a_value": 2.3,
            "mc": 0.4
        }],
        "bounding_box": {"x_min": 0.0, "x_max": 1000.0, "y_min": 0.0, "y_max": 1000.0}
    }))
    .expect("valid forecast payload")
}

pub fn http_error(status: u16) -> WorkerError {
    WorkerError::Http {
        status,
        detail: format!("worker returned status {status}"),
    }
}

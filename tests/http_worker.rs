//! The HTTP worker client against an in-process worker stub.

mod common;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

use common::*;
use seismo_forecast::config::{EngineConfig, WorkerClientConfig};
use seismo_forecast::models::{ModelReference, Project, RemoteTaskId};
use seismo_forecast::orchestration::{ForecastExecutor, StaticInputProvider};
use seismo_forecast::state_machine::Status;
use seismo_forecast::store::{ForecastStore, InMemoryForecastStore};
use seismo_forecast::worker::{
    HttpModelWorker, HttpWorkerProvider, ModelWorker, RunPayload, TaskStatus, WorkerError,
    WorkerProvider,
};

#[derive(Clone)]
struct StubState {
    submit_status: Arc<Mutex<u16>>,
    submitted: Arc<Mutex<Vec<Value>>>,
    replies: Arc<Mutex<VecDeque<(u16, Value)>>>,
    queried: Arc<Mutex<Vec<String>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

impl Default for StubState {
    fn default() -> Self {
        Self {
            submit_status: Arc::new(Mutex::new(202)),
            submitted: Arc::default(),
            replies: Arc::default(),
            queried: Arc::default(),
            deleted: Arc::default(),
        }
    }
}

struct WorkerStub {
    base_url: String,
    state: StubState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl WorkerStub {
    async fn start() -> Self {
        let state = StubState::default();
        let app = Router::new()
            .route("/v1/sfm/run", post(submit_task))
            .route("/v1/sfm/run/:task_id", get(query_task).delete(delete_task))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind worker stub");
        let addr: SocketAddr = listener.local_addr().expect("stub address");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = server.await;
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            shutdown: Some(shutdown_tx),
        }
    }

    fn reply(&self, status: u16, body: Value) {
        self.state.replies.lock().push_back((status, body));
    }

    fn client(&self) -> HttpModelWorker {
        HttpModelWorker::new(&self.base_url, &WorkerClientConfig::default()).unwrap()
    }
}

impl Drop for WorkerStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn submit_task(
    State(state): State<StubState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let submitted = {
        let mut submitted = state.submitted.lock();
        submitted.push(body);
        submitted.len()
    };
    let status = *state.submit_status.lock();
    if !matches!(status, 200 | 202) {
        return (
            StatusCode::from_u16(status).unwrap(),
            Json(json!({"errors": [{"title": "Unprocessable", "detail": "payload rejected"}]})),
        );
    }
    (
        StatusCode::from_u16(status).unwrap(),
        Json(json!({
            "data": {
                "id": format!("task-{submitted}"),
                "attributes": {"status": "TaskAccepted", "status_code": 202}
            }
        })),
    )
}

async fn query_task(
    State(state): State<StubState>,
    Path(task_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    state.queried.lock().push(task_id.clone());
    let scripted = state.replies.lock().pop_front();
    let (status, body) = scripted.unwrap_or_else(|| (200, completed_body(&task_id)));
    (StatusCode::from_u16(status).unwrap(), Json(body))
}

async fn delete_task(State(state): State<StubState>, Path(task_id): Path<String>) -> StatusCode {
    state.deleted.lock().push(task_id);
    StatusCode::NO_CONTENT
}

fn completed_body(task_id: &str) -> Value {
    json!({
        "data": {
            "id": task_id,
            "attributes": {
                "status": "TaskComplete",
                "status_code": 200,
                "forecast": {
                    "samples": [{
                        "starttime": "2024-05-01T00:00:00Z",
                        "endtime": "2024-05-01T06:00:00Z",
                        "rate": 2.5,
                        "b_value": 1.0
                    }],
                    "bounding_box": {"x_min": -500.0, "x_max": 500.0}
                }
            }
        }
    })
}

fn status_body(status: &str, code: u16) -> Value {
    json!({"data": {"id": "task-1", "attributes": {"status": status, "status_code": code}}})
}

fn sample_payload() -> RunPayload {
    let project = Project::new("basel");
    let forecast = seismicity_forecast(&project, vec![etas_run()]);
    let scenario = &forecast.scenarios[0];
    let stage = &scenario.stages[0];
    RunPayload::build(&project, &forecast, scenario, stage, &stage.runs[0]).unwrap()
}

#[tokio::test]
async fn test_submit_posts_payload_and_returns_task_id() {
    let stub = WorkerStub::start().await;

    let task = stub.client().submit(&sample_payload()).await.unwrap();

    assert_eq!(task, RemoteTaskId::new("task-1"));
    let submitted = stub.state.submitted.lock().clone();
    assert_eq!(submitted.len(), 1);
    let attributes = &submitted[0]["data"]["attributes"];
    assert_eq!(
        attributes["seismic_catalog"]["quakeml"],
        "<quakeml><eventParameters/></quakeml>"
    );
    assert_eq!(attributes["scenario"]["well"]["rate_m3_min"], 0.4);
    assert_eq!(
        attributes["model_parameters"]["forecast_start"],
        "2024-05-01T00:00:00Z"
    );
    assert_eq!(
        attributes["model_parameters"]["forecast_end"],
        "2024-05-01T06:00:00Z"
    );
}

#[tokio::test]
async fn test_submit_accepted_in_body_of_200() {
    let stub = WorkerStub::start().await;
    *stub.state.submit_status.lock() = 200;

    let task = stub.client().submit(&sample_payload()).await.unwrap();

    assert_eq!(task, RemoteTaskId::new("task-1"));
}

#[tokio::test]
async fn test_rejected_submit_surfaces_status() {
    let stub = WorkerStub::start().await;
    *stub.state.submit_status.lock() = 422;

    let err = stub.client().submit(&sample_payload()).await.unwrap_err();

    match err {
        WorkerError::RemoteWorker { status, detail } => {
            assert_eq!(status, 422);
            assert!(detail.contains("payload rejected"));
        }
        other => panic!("expected remote worker error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_query_classifies_status_codes() {
    let stub = WorkerStub::start().await;
    let client = stub.client();
    let task = RemoteTaskId::new("task-1");

    stub.reply(202, status_body("TaskAccepted", 202));
    stub.reply(423, status_body("TaskProcessing", 423));
    stub.reply(
        418,
        json!({"data": {"id": "task-1", "attributes": {"status": "TaskError", "status_code": 418, "warning": "catalog too sparse"}}}),
    );
    stub.reply(299, json!({}));

    assert_eq!(client.query(&task).await.unwrap(), TaskStatus::Accepted);
    assert_eq!(client.query(&task).await.unwrap(), TaskStatus::Processing);
    assert_eq!(
        client.query(&task).await.unwrap(),
        TaskStatus::Error("418: catalog too sparse".to_string())
    );
    assert!(matches!(
        client.query(&task).await,
        Err(WorkerError::Http { status: 299, .. })
    ));

    match client.query(&task).await.unwrap() {
        TaskStatus::Complete(result) => {
            assert_eq!(result.sample_count(), 1);
            assert_eq!(result.samples[0].rate, Some(2.5));
            assert_eq!(result.bounding_box.unwrap().x_min, Some(-500.0));
        }
        other => panic!("expected completed task, got {other:?}"),
    }
    assert_eq!(stub.state.queried.lock().len(), 5);
}

#[tokio::test]
async fn test_body_status_code_wins_over_200() {
    let stub = WorkerStub::start().await;
    stub.reply(200, status_body("TaskProcessing", 423));

    let status = stub
        .client()
        .query(&RemoteTaskId::new("task-1"))
        .await
        .unwrap();
    assert_eq!(status, TaskStatus::Processing);
}

#[tokio::test]
async fn test_delete_hits_task_url() {
    let stub = WorkerStub::start().await;

    stub.client()
        .delete(&RemoteTaskId::new("task-77"))
        .await
        .unwrap();

    assert_eq!(*stub.state.deleted.lock(), vec!["task-77".to_string()]);
}

#[tokio::test]
async fn test_unreachable_worker_is_connection_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client =
        HttpModelWorker::new(&format!("http://{addr}"), &WorkerClientConfig::default()).unwrap();
    let err = client
        .query(&RemoteTaskId::new("task-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::Connection(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_provider_shares_one_worker_per_url() {
    let provider = HttpWorkerProvider::new(&WorkerClientConfig::default()).unwrap();

    let first = provider
        .worker_for(&ModelReference::new("etas", "http://etas:5000"))
        .unwrap();
    provider
        .worker_for(&ModelReference::new("etas-variant", "http://etas:5000"))
        .unwrap();
    provider
        .worker_for(&ModelReference::new("em1", "http://em1:5000"))
        .unwrap();

    assert_eq!(provider.cached_workers(), 2);
    assert_eq!(first.base_url(), "http://etas:5000/");
    assert!(provider
        .worker_for(&ModelReference::new("broken", "not a url"))
        .is_err());
}

#[tokio::test]
async fn test_forecast_runs_end_to_end_over_http() {
    let stub = WorkerStub::start().await;
    stub.reply(202, status_body("TaskAccepted", 202));
    stub.reply(423, status_body("TaskProcessing", 423));

    let project = Project::new("basel");
    let run = seismo_forecast::models::ModelRun::new(ModelReference::new("etas", &stub.base_url));
    let forecast = seismicity_forecast(&project, vec![run.clone()]);
    let store = Arc::new(InMemoryForecastStore::new());
    store.insert_project(project);
    store.insert_forecast(forecast.clone());

    let config: EngineConfig = fast_config();
    let executor = ForecastExecutor::new(
        store.clone(),
        Arc::new(HttpWorkerProvider::new(&config.worker_client).unwrap()),
        Arc::new(StaticInputProvider::new(catalog_inputs())),
        &config,
    )
    .unwrap();

    let summary = executor.execute_forecast(forecast.id).await.unwrap();

    assert_eq!(summary.status, Status::Complete);
    let stored = store.load_model_run(run.id).await.unwrap();
    assert_eq!(stored.status, Status::Complete);
    assert_eq!(stored.runid, Some(RemoteTaskId::new("task-1")));
    assert_eq!(stored.result.unwrap().sample_count(), 1);
    assert_eq!(*stub.state.queried.lock(), vec!["task-1"; 3]);
    assert_eq!(*stub.state.deleted.lock(), vec!["task-1".to_string()]);
}

//! # Worker Protocol
//!
//! Response envelopes of the model worker HTTP API and their classification
//! into [`TaskStatus`].
//!
//! Workers report a task's state through the HTTP status code. Some workers
//! always answer `200` and put the real code into
//! `data.attributes.status_code`; for those the body code wins.

use serde::Deserialize;
use serde_json::Value;

use super::errors::{WorkerError, WorkerResult};
use crate::constants::worker_protocol::status_codes;
use crate::models::{ModelResult, RemoteTaskId};

/// State of a remote task as reported by its worker
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Accepted,
    Processing,
    Complete(ModelResult),
    /// The worker doesn't know the task (any more)
    NotAvailable,
    /// The task failed inside the worker; detail surfaced verbatim
    Error(String),
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Accepted | Self::Processing)
    }
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    data: Option<ResponseData>,
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ResponseData {
    id: Option<String>,
    #[serde(default)]
    attributes: Option<TaskAttributes>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskAttributes {
    status: Option<String>,
    status_code: Option<u16>,
    forecast: Option<Value>,
    warning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    detail: Option<String>,
    title: Option<String>,
}

fn parse_envelope(body: &str) -> Option<ResponseEnvelope> {
    if body.trim().is_empty() {
        return None;
    }
    serde_json::from_str(body).ok()
}

fn error_detail(status: u16, envelope: Option<&ResponseEnvelope>, body: &str) -> String {
    let from_envelope = envelope.and_then(|envelope| {
        let attributes = envelope
            .data
            .as_ref()
            .and_then(|data| data.attributes.as_ref());
        attributes
            .and_then(|attrs| attrs.warning.clone())
            .or_else(|| {
                envelope
                    .errors
                    .first()
                    .and_then(|entry| entry.detail.clone().or_else(|| entry.title.clone()))
            })
            .or_else(|| attributes.and_then(|attrs| attrs.status.clone()))
    });

    match from_envelope {
        Some(detail) => format!("{status}: {detail}"),
        None if body.trim().is_empty() => format!("worker returned status {status}"),
        None => format!("{status}: {}", body.trim()),
    }
}

/// The code a response stands for: on HTTP 200 the body `status_code` wins
fn effective_status(http_status: u16, envelope: Option<&ResponseEnvelope>) -> u16 {
    let body_code = envelope
        .and_then(|envelope| envelope.data.as_ref())
        .and_then(|data| data.attributes.as_ref())
        .and_then(|attrs| attrs.status_code);

    match (http_status, body_code) {
        (status_codes::COMPLETE, Some(code)) => code,
        (status, _) => status,
    }
}

/// Interpret the response to a task submission
pub fn classify_submit_response(http_status: u16, body: &str) -> WorkerResult<RemoteTaskId> {
    let envelope = parse_envelope(body);

    let code = effective_status(http_status, envelope.as_ref());
    if code != status_codes::ACCEPTED {
        return Err(WorkerError::RemoteWorker {
            status: code,
            detail: error_detail(code, envelope.as_ref(), body),
        });
    }

    envelope
        .as_ref()
        .and_then(|envelope| envelope.data.as_ref())
        .and_then(|data| data.id.clone())
        .filter(|id| !id.is_empty())
        .map(RemoteTaskId::from)
        .ok_or_else(|| WorkerError::Decoding("accepted response carries no task id".to_string()))
}

/// Interpret the response to a task status query
pub fn classify_poll_response(http_status: u16, body: &str) -> WorkerResult<TaskStatus> {
    let envelope = parse_envelope(body);

    let code = effective_status(http_status, envelope.as_ref());
    match code {
        status_codes::ACCEPTED => Ok(TaskStatus::Accepted),
        status_codes::PROCESSING => Ok(TaskStatus::Processing),
        status_codes::COMPLETE => {
            let forecast = envelope
                .and_then(|envelope| envelope.data)
                .and_then(|data| data.attributes)
                .and_then(|attrs| attrs.forecast)
                .ok_or_else(|| {
                    WorkerError::Decoding("completed task carries no forecast".to_string())
                })?;
            ModelResult::from_payload(forecast)
                .map(TaskStatus::Complete)
                .map_err(|e| WorkerError::Decoding(format!("invalid forecast payload: {e}")))
        }
        status_codes::NOT_AVAILABLE => Ok(TaskStatus::NotAvailable),
        status_codes::METHOD_NOT_ALLOWED
        | status_codes::TASK_ERROR
        | status_codes::UNPROCESSABLE
        | status_codes::INTERNAL_ERROR => Ok(TaskStatus::Error(error_detail(
            code,
            envelope.as_ref(),
            body,
        ))),
        other => Err(WorkerError::Http {
            status: other,
            detail: error_detail(other, envelope.as_ref(), body),
        }),
    }
}

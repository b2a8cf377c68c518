//! # Poller
//!
//! Drives a dispatched model run to a terminal status by querying its worker.
//!
//! ## Overview
//!
//! ```text
//! DISPATCHED --Accepted/Processing--> DISPATCHED (wait, query again)
//! DISPATCHED --Complete-->            COMPLETE (store result, delete remote task)
//! DISPATCHED --Error/NotAvailable-->  ERROR
//! DISPATCHED --query failure-->       DISPATCHED (retry) --budget spent--> ERROR
//! DISPATCHED --past run timeout-->    ERROR
//! ```
//!
//! Everything the poller needs is read from the stored run, so polling can
//! resume after a restart without submitting anything. One call performs at
//! most `max_polls_per_round` queries and then hands the run back to the
//! executor for its next round.
//!
//! ## Key Features
//!
//! - **Exponential backoff with jitter** between queries, via
//!   [`BackoffCalculator`]
//! - **Failure budget**: consecutive failed queries are counted across calls
//!   until the run succeeds, fails or the budget runs out
//! - **Cancellable waits**: cancelling stops polling and leaves the run
//!   `DISPATCHED`

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::backoff_calculator::BackoffCalculator;
use super::coordinator::{pause, ConcurrencyLimiter};
use super::errors::PollError;
use super::types::{PollOutcome, PollReport};
use crate::config::EngineConfig;
use crate::events::{EventPublisher, StatusChangeEvent};
use crate::logging::log_run_operation;
use crate::models::{ModelRun, RemoteTaskId};
use crate::state_machine::{RunTransition, Status, TransitionOutcome};
use crate::store::{ForecastStore, StoreError};
use crate::worker::{ModelWorker, TaskStatus, WorkerProvider};

#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Consecutive failed queries tolerated before the run is failed
    pub max_retries: u32,
    pub max_polls_per_round: u32,
    /// Measured from `dispatched_at`
    pub run_timeout: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for PollerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.backoff.max_retries,
            max_polls_per_round: config.orchestration.max_polls_per_round.max(1),
            run_timeout: config.orchestration.run_timeout(),
        }
    }
}

pub struct Poller {
    store: Arc<dyn ForecastStore>,
    workers: Arc<dyn WorkerProvider>,
    limiter: ConcurrencyLimiter,
    backoff: BackoffCalculator,
    events: EventPublisher,
    config: PollerConfig,
    /// Consecutive failed queries per run, kept between calls
    failures: DashMap<Uuid, u32>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("config", &self.config)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl Poller {
    pub fn new(
        store: Arc<dyn ForecastStore>,
        workers: Arc<dyn WorkerProvider>,
        limiter: ConcurrencyLimiter,
        backoff: BackoffCalculator,
        events: EventPublisher,
        config: PollerConfig,
    ) -> Self {
        Self {
            store,
            workers,
            limiter,
            backoff,
            events,
            config,
            failures: DashMap::new(),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Drop the failure count kept for a run
    pub fn forget(&self, run_id: Uuid) {
        self.failures.remove(&run_id);
    }

    /// Number of runs with consecutive query failures on record
    pub fn tracked_failures(&self) -> usize {
        self.failures.len()
    }

    /// Query the run's remote task until it is terminal, the round's query
    /// budget is spent or `cancel` fires.
    ///
    /// The failure count survives only a `StillRunning` outcome, so the next
    /// round continues the same retry budget.
    #[instrument(skip(self, cancel), fields(run_id = %run_id))]
    pub async fn poll(
        &self,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<PollReport, PollError> {
        let result = self.poll_run(run_id, cancel).await;
        if !matches!(
            result,
            Ok(PollReport {
                outcome: PollOutcome::StillRunning,
                ..
            })
        ) {
            self.forget(run_id);
        }
        result
    }

    async fn poll_run(
        &self,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<PollReport, PollError> {
        let report = PollReport::new(run_id);

        let run = match self.store.load_model_run(run_id).await {
            Ok(run) => run,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                debug!(error = %e, "Run vanished before polling");
                return Ok(report.finish(PollOutcome::Discarded));
            }
        };

        let task = match (&run.runid, run.status) {
            (Some(task), Status::Dispatched) => task.clone(),
            _ => {
                debug!(status = %run.status, "Run is not awaiting a remote task");
                return Ok(report.finish(PollOutcome::Discarded));
            }
        };

        let worker = match self.workers.worker_for(&run.model) {
            Ok(worker) => worker,
            Err(e) => {
                let outcome = self.fail(&run, &task, e.to_string()).await?;
                return Ok(report.finish(outcome));
            }
        };

        self.drive(&run, &task, worker.as_ref(), cancel, report).await
    }

    async fn drive(
        &self,
        run: &ModelRun,
        task: &RemoteTaskId,
        worker: &dyn ModelWorker,
        cancel: &CancellationToken,
        mut report: PollReport,
    ) -> Result<PollReport, PollError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(report.finish(PollOutcome::Cancelled));
            }
            if let Some(detail) = self.timed_out(run) {
                let outcome = self.fail(run, task, detail).await?;
                return Ok(report.finish(outcome));
            }

            let response = {
                let _permit = self.limiter.acquire().await?;
                worker.query(task).await
            };
            report.queries += 1;

            match response {
                Ok(TaskStatus::Complete(result)) => {
                    let applied = self
                        .record(run, task, RunTransition::Complete { result }, None)
                        .await?;
                    if let Err(e) = worker.delete(task).await {
                        warn!(task_id = %task, error = %e, "Failed to delete completed remote task");
                    }
                    let outcome = if applied {
                        PollOutcome::Completed
                    } else {
                        PollOutcome::Discarded
                    };
                    return Ok(report.finish(outcome));
                }
                Ok(TaskStatus::Error(detail)) => {
                    let outcome = self.fail(run, task, detail).await?;
                    return Ok(report.finish(outcome));
                }
                Ok(TaskStatus::NotAvailable) => {
                    let outcome = self
                        .fail(run, task, "204: task not available on worker".to_string())
                        .await?;
                    return Ok(report.finish(outcome));
                }
                Ok(status) => {
                    debug!(task_id = %task, ?status, "Remote task still running");
                    self.failures.remove(&run.id);
                }
                Err(e) if e.is_retryable() => {
                    let failures = {
                        let mut entry = self.failures.entry(run.id).or_insert(0);
                        *entry += 1;
                        *entry
                    };
                    warn!(task_id = %task, error = %e, failures, "Query for remote task failed");
                    if failures > self.config.max_retries {
                        let detail = format!("polling exceeded retries: {e}");
                        let outcome = self.fail(run, task, detail).await?;
                        return Ok(report.finish(outcome));
                    }
                }
                Err(e) => {
                    let outcome = self.fail(run, task, e.to_string()).await?;
                    return Ok(report.finish(outcome));
                }
            }

            if report.queries >= self.config.max_polls_per_round {
                return Ok(report.finish(PollOutcome::StillRunning));
            }

            let delay = self.backoff.delay_for_attempt(report.waits.len() as u32);
            report.waits.push(delay);
            if !pause(delay, cancel).await {
                return Ok(report.finish(PollOutcome::Cancelled));
            }
        }
    }

    fn timed_out(&self, run: &ModelRun) -> Option<String> {
        let timeout = self.config.run_timeout?;
        let dispatched_at = run.dispatched_at?;
        let elapsed = Utc::now().signed_duration_since(dispatched_at).to_std().ok()?;
        (elapsed > timeout).then(|| format!("timed out after {}s", timeout.as_secs()))
    }

    async fn fail(
        &self,
        run: &ModelRun,
        task: &RemoteTaskId,
        detail: String,
    ) -> Result<PollOutcome, PollError> {
        let transition = RunTransition::Fail {
            detail: detail.clone(),
        };
        if self.record(run, task, transition, Some(&detail)).await? {
            Ok(PollOutcome::Failed { detail })
        } else {
            Ok(PollOutcome::Discarded)
        }
    }

    /// Apply a terminal transition; `false` when it no longer applied
    async fn record(
        &self,
        run: &ModelRun,
        task: &RemoteTaskId,
        transition: RunTransition,
        detail: Option<&str>,
    ) -> Result<bool, PollError> {
        match self.store.apply_run_transition(run.id, transition).await {
            Ok(TransitionOutcome::Applied { from, to }) => {
                self.events.publish(StatusChangeEvent::run(
                    run.id,
                    from,
                    to,
                    detail.map(str::to_string),
                ));
                log_run_operation(
                    "poll",
                    run.id,
                    &run.model.name,
                    Some(task.as_str()),
                    to.as_str(),
                    detail,
                );
                Ok(true)
            }
            Ok(TransitionOutcome::Discarded { current }) => {
                info!(run_id = %run.id, status = %current, "Discarding late result for run");
                Ok(false)
            }
            Err(e @ (StoreError::Guard(_) | StoreError::NotFound { .. })) => {
                debug!(run_id = %run.id, error = %e, "Run moved on while polling");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

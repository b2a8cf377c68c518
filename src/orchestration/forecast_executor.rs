//! # Forecast Executor
//!
//! ## Architecture: Activation Loop
//!
//! One activation takes a forecast from whatever state it is stored in to the
//! furthest point reachable right now:
//!
//! 1. Refresh the upstream inputs, unless a run has already consumed them
//! 2. Dispatch every pending run, in parallel and bounded
//! 3. Poll every dispatched run in rounds, with a growing pause between rounds
//! 4. Aggregate statuses bottom-up from a fresh snapshot and persist them
//!
//! ## Key Features
//!
//! - **Resumable**: runs left `DISPATCHED` by an earlier activation are polled,
//!   never submitted again
//! - **Run isolation**: a failing run ends in `ERROR` and never stops its
//!   siblings; only store failures end an activation early
//! - **Cancellation**: [`ForecastExecutor::cancel_forecast`] cancels the runs
//!   and interrupts the activation's waits
//! - **Status events**: every run transition and aggregated status change is
//!   broadcast through the [`EventPublisher`]
//!
//! ## Usage
//!
//! ```rust,no_run
//! use seismo_forecast::config::EngineConfig;
//! use seismo_forecast::models::ForecastInputs;
//! use seismo_forecast::orchestration::{ForecastExecutor, StaticInputProvider};
//! use seismo_forecast::store::InMemoryForecastStore;
//! use seismo_forecast::worker::HttpWorkerProvider;
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     forecast_id: uuid::Uuid,
//! #     inputs: ForecastInputs,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! // refreshed into every forecast before its first dispatch
//! let executor = ForecastExecutor::new(
//!     Arc::new(InMemoryForecastStore::new()),
//!     Arc::new(HttpWorkerProvider::new(&config.worker_client)?),
//!     Arc::new(StaticInputProvider::new(inputs)),
//!     &config,
//! )?;
//!
//! let summary = executor.execute_forecast(forecast_id).await?;
//! println!("forecast finished as {}", summary.status);
//! # Ok(())
//! # }
//! ```

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::backoff_calculator::{BackoffCalculator, BackoffCalculatorConfig};
use super::coordinator::{pause, ConcurrencyLimiter, ResourceReservation};
use super::dispatcher::Dispatcher;
use super::errors::{DispatchError, PollError};
use super::input_provider::InputProvider;
use super::poller::{Poller, PollerConfig};
use super::run_discovery;
use super::types::{DispatchOutcome, ExecutionSummary, PollOutcome, PollReport};
use crate::config::{EngineConfig, OrchestrationConfig};
use crate::constants::system::PAYLOAD_ENCODER_RESOURCE;
use crate::error::{EngineError, Result};
use crate::events::{EventPublisher, StatusChangeEvent};
use crate::logging::log_forecast_operation;
use crate::models::{Forecast, ModelRun, Project};
use crate::state_machine::{
    aggregate_forecast, AggregatedStatuses, EntityKind, RunTransition, Status, TransitionOutcome,
};
use crate::store::{ForecastStore, StoreError};
use crate::worker::WorkerProvider;

/// Unregisters an activation however its future ends, dropped callers
/// included, stops the poll tasks it spawned and clears the failure counts
/// of the runs it polled
struct ActiveRegistration<'a> {
    active: &'a DashMap<Uuid, CancellationToken>,
    poller: &'a Poller,
    forecast_id: Uuid,
    cancel: CancellationToken,
    polled: Mutex<HashSet<Uuid>>,
}

impl ActiveRegistration<'_> {
    fn record_polled(&self, runs: &[Uuid]) {
        self.polled.lock().extend(runs.iter().copied());
    }
}

impl Drop for ActiveRegistration<'_> {
    fn drop(&mut self) {
        self.cancel.cancel();
        for run_id in self.polled.get_mut().drain() {
            self.poller.forget(run_id);
        }
        self.active.remove(&self.forecast_id);
    }
}

/// A forecast activation running in the background
#[derive(Debug)]
pub struct ExecutionHandle {
    forecast_id: Uuid,
    cancel: CancellationToken,
    join: JoinHandle<Result<ExecutionSummary>>,
}

impl ExecutionHandle {
    pub fn forecast_id(&self) -> Uuid {
        self.forecast_id
    }

    /// Stop starting new polls and rounds; runs keep their statuses
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn join(self) -> Result<ExecutionSummary> {
        self.join
            .await
            .map_err(|e| EngineError::Internal(format!("forecast activation aborted: {e}")))?
    }
}

pub struct ForecastExecutor {
    store: Arc<dyn ForecastStore>,
    workers: Arc<dyn WorkerProvider>,
    inputs: Arc<dyn InputProvider>,
    dispatcher: Arc<Dispatcher>,
    poller: Arc<Poller>,
    events: EventPublisher,
    config: OrchestrationConfig,
    round_backoff: BackoffCalculator,
    /// Cancellation tokens of running activations
    active: DashMap<Uuid, CancellationToken>,
}

impl std::fmt::Debug for ForecastExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastExecutor")
            .field("config", &self.config)
            .field("active", &self.active.len())
            .finish()
    }
}

impl ForecastExecutor {
    pub fn new(
        store: Arc<dyn ForecastStore>,
        workers: Arc<dyn WorkerProvider>,
        inputs: Arc<dyn InputProvider>,
        config: &EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let events = EventPublisher::new(config.events.channel_capacity);
        let limiter = ConcurrencyLimiter::new(config.execution.max_concurrent_remote_calls);
        let reservation = ResourceReservation::new(
            PAYLOAD_ENCODER_RESOURCE,
            config.reservation.acquire_timeout(),
        );

        let dispatcher = Dispatcher::new(
            store.clone(),
            workers.clone(),
            limiter.clone(),
            reservation,
            events.clone(),
        );
        let poller = Poller::new(
            store.clone(),
            workers.clone(),
            limiter,
            BackoffCalculator::new(BackoffCalculatorConfig::from(&config.backoff))?,
            events.clone(),
            PollerConfig::from(config),
        );

        Ok(Self {
            store,
            workers,
            inputs,
            dispatcher: Arc::new(dispatcher),
            poller: Arc::new(poller),
            events,
            config: config.orchestration.clone(),
            round_backoff: BackoffCalculator::new(BackoffCalculatorConfig::for_rounds(
                &config.orchestration,
            ))?,
            active: DashMap::new(),
        })
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn is_active(&self, forecast_id: Uuid) -> bool {
        self.active.contains_key(&forecast_id)
    }

    pub async fn execute_forecast(&self, forecast_id: Uuid) -> Result<ExecutionSummary> {
        self.execute_with_cancellation(forecast_id, CancellationToken::new())
            .await
    }

    /// Run one activation; `cancel` interrupts its waits
    #[instrument(skip(self, cancel), fields(forecast_id = %forecast_id))]
    pub async fn execute_with_cancellation(
        &self,
        forecast_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<ExecutionSummary> {
        let activation = cancel.child_token();
        match self.active.entry(forecast_id) {
            Entry::Occupied(_) => {
                return Err(EngineError::Validation(format!(
                    "forecast {forecast_id} is already executing"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(activation.clone());
            }
        }

        let registration = ActiveRegistration {
            active: &self.active,
            poller: self.poller.as_ref(),
            forecast_id,
            cancel: activation,
            polled: Mutex::new(HashSet::new()),
        };
        let result = self.activate(forecast_id, &registration).await;
        drop(registration);

        match &result {
            Ok(summary) => log_forecast_operation(
                "execute",
                forecast_id,
                summary.status.as_str(),
                Some(&format!(
                    "dispatched={} completed={} failed={} still_running={} rounds={}",
                    summary.dispatched,
                    summary.completed,
                    summary.failed,
                    summary.still_running,
                    summary.rounds
                )),
            ),
            Err(e) => {
                error!(forecast_id = %forecast_id, error = %e, "Forecast activation aborted");
                log_forecast_operation("execute", forecast_id, "ABORTED", Some(&e.to_string()));
            }
        }
        result
    }

    /// Run an activation on its own task
    pub fn spawn(self: &Arc<Self>, forecast_id: Uuid) -> ExecutionHandle {
        let cancel = CancellationToken::new();
        let executor = Arc::clone(self);
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            executor
                .execute_with_cancellation(forecast_id, token)
                .await
        });

        ExecutionHandle {
            forecast_id,
            cancel,
            join,
        }
    }

    async fn activate(
        &self,
        forecast_id: Uuid,
        registration: &ActiveRegistration<'_>,
    ) -> Result<ExecutionSummary> {
        let cancel = &registration.cancel;
        let forecast = self.store.load_forecast(forecast_id).await?;
        let project = Arc::new(self.store.load_project(forecast.project_id).await?);
        log_forecast_operation("execute", forecast_id, "STARTED", None);

        let forecast = Arc::new(self.refresh_inputs(&project, forecast).await?);

        let dispatched = if cancel.is_cancelled() {
            0
        } else {
            self.dispatch_pending(&project, &forecast).await?
        };

        let rounds = self.poll_rounds(forecast_id, registration).await?;

        let (statuses, snapshot) = self.aggregate(forecast_id).await?;
        Ok(ExecutionSummary {
            forecast_id,
            dispatched,
            completed: run_discovery::count_with_status(&snapshot, Status::Complete),
            failed: run_discovery::count_with_status(&snapshot, Status::Error),
            still_running: run_discovery::count_with_status(&snapshot, Status::Dispatched),
            rounds,
            status: statuses.forecast,
        })
    }

    async fn refresh_inputs(
        &self,
        project: &Project,
        forecast: Forecast,
    ) -> Result<Forecast> {
        if !self.config.refresh_inputs {
            return Ok(forecast);
        }
        if run_discovery::any_started(&forecast) {
            debug!(forecast_id = %forecast.id, "Runs already started, keeping current inputs");
            return Ok(forecast);
        }

        match self.inputs.fetch_inputs(project, &forecast).await {
            Ok(inputs) => {
                self.store
                    .update_forecast_inputs(forecast.id, inputs)
                    .await?;
                info!(forecast_id = %forecast.id, "Refreshed forecast inputs");
                Ok(self.store.load_forecast(forecast.id).await?)
            }
            Err(e) => {
                warn!(forecast_id = %forecast.id, error = %e, "Input refresh failed, using stored inputs");
                Ok(forecast)
            }
        }
    }

    /// Submit every pending run; returns how many the workers accepted
    async fn dispatch_pending(
        &self,
        project: &Arc<Project>,
        forecast: &Arc<Forecast>,
    ) -> Result<usize> {
        let pending = run_discovery::pending_runs(project, forecast);
        if pending.is_empty() {
            return Ok(0);
        }
        debug!(forecast_id = %forecast.id, runs = pending.len(), "Dispatching pending runs");

        let handles = pending.into_iter().map(|context| {
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move { dispatcher.dispatch(&context).await })
        });

        let mut dispatched = 0;
        let mut fatal = None;
        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(DispatchOutcome::Dispatched { .. })) => dispatched += 1,
                Ok(Ok(outcome)) => debug!(?outcome, "Run not dispatched"),
                Ok(Err(e)) if e.is_fatal() => {
                    fatal.get_or_insert(e);
                }
                Ok(Err(e)) => warn!(error = %e, "Run skipped by dispatcher"),
                Err(e) => error!(error = %e, "Dispatch task panicked"),
            }
        }

        match fatal {
            Some(DispatchError::Store(e)) => Err(e.into()),
            Some(other) => Err(EngineError::Internal(other.to_string())),
            None => Ok(dispatched),
        }
    }

    /// Poll dispatched runs until none is left, the round limit is reached or
    /// the activation is cancelled; returns the number of rounds
    async fn poll_rounds(
        &self,
        forecast_id: Uuid,
        registration: &ActiveRegistration<'_>,
    ) -> Result<u32> {
        let cancel = &registration.cancel;
        let mut rounds = 0u32;

        loop {
            if cancel.is_cancelled() {
                info!(forecast_id = %forecast_id, rounds, "Activation cancelled");
                break;
            }

            let snapshot = self.store.load_forecast(forecast_id).await?;
            let outstanding = run_discovery::dispatched_runs(&snapshot);
            if outstanding.is_empty() {
                break;
            }
            if self.config.max_rounds.is_some_and(|max| rounds >= max) {
                info!(forecast_id = %forecast_id, rounds, outstanding = outstanding.len(), "Round limit reached");
                break;
            }
            if rounds > 0 {
                let delay = self.round_backoff.base_delay(rounds - 1);
                debug!(forecast_id = %forecast_id, delay_ms = delay.as_millis() as u64, "Waiting for next poll round");
                if !pause(delay, cancel).await {
                    continue;
                }
            }

            rounds += 1;
            registration.record_polled(&outstanding);
            self.poll_round(outstanding, cancel).await?;
        }

        Ok(rounds)
    }

    async fn poll_round(&self, runs: Vec<Uuid>, cancel: &CancellationToken) -> Result<()> {
        let handles = runs.into_iter().map(|run_id| {
            let poller = Arc::clone(&self.poller);
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.poll(run_id, &cancel).await })
        });

        let mut fatal: Option<PollError> = None;
        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(PollReport {
                    run_id,
                    outcome: PollOutcome::Failed { detail },
                    ..
                })) => debug!(run_id = %run_id, detail = %detail, "Run failed"),
                Ok(Ok(report)) => {
                    debug!(run_id = %report.run_id, outcome = ?report.outcome, queries = report.queries, "Poll finished")
                }
                Ok(Err(e)) if e.is_fatal() => {
                    fatal.get_or_insert(e);
                }
                Ok(Err(e)) => warn!(error = %e, "Poll skipped"),
                Err(e) => error!(error = %e, "Poll task panicked"),
            }
        }

        match fatal {
            Some(PollError::Store(e)) => Err(e.into()),
            Some(other) => Err(EngineError::Internal(other.to_string())),
            None => Ok(()),
        }
    }

    /// Recompute and persist all statuses from a fresh snapshot
    pub async fn aggregate(&self, forecast_id: Uuid) -> Result<(AggregatedStatuses, Forecast)> {
        let snapshot = self.store.load_forecast(forecast_id).await?;
        let statuses = aggregate_forecast(&snapshot);
        let changes = self.store.persist_statuses(&statuses).await?;

        if !changes.is_empty() {
            debug!(forecast_id = %forecast_id, changes = changes.len(), status = %statuses.forecast, "Persisted aggregated statuses");
        }
        self.events
            .publish_all(changes.into_iter().map(StatusChangeEvent::from));

        Ok((statuses, snapshot))
    }

    /// Cancel every unfinished run of the forecast and stop its activation.
    ///
    /// Remote tasks of dispatched runs are deleted on a best-effort basis.
    /// Returns the number of runs cancelled.
    #[instrument(skip(self), fields(forecast_id = %forecast_id))]
    pub async fn cancel_forecast(&self, forecast_id: Uuid) -> Result<usize> {
        if let Some(token) = self.active.get(&forecast_id) {
            token.cancel();
        }

        let snapshot = self.store.load_forecast(forecast_id).await?;
        let mut cancelled = 0;
        let mut withdrawn = Vec::new();
        for run in snapshot.enabled_runs().filter(|run| !run.status.is_terminal()) {
            match self
                .store
                .apply_run_transition(run.id, RunTransition::Cancel)
                .await
            {
                Ok(outcome) if outcome.is_applied() => {
                    cancelled += 1;
                    self.poller.forget(run.id);
                    self.events.publish(StatusChangeEvent::run(
                        run.id,
                        run.status,
                        Status::Cancelled,
                        None,
                    ));
                    if run.is_dispatched() {
                        withdrawn.push(run);
                    }
                }
                Ok(_) => {}
                Err(StoreError::Guard(e)) => {
                    debug!(run_id = %run.id, error = %e, "Run finished before it could be cancelled")
                }
                Err(e) => return Err(e.into()),
            }
        }

        join_all(withdrawn.into_iter().map(|run| self.withdraw_task(run))).await;

        self.aggregate(forecast_id).await?;
        log_forecast_operation(
            "cancel",
            forecast_id,
            Status::Cancelled.as_str(),
            Some(&format!("runs={cancelled}")),
        );
        Ok(cancelled)
    }

    async fn withdraw_task(&self, run: &ModelRun) {
        let Some(task) = run.runid.as_ref() else {
            return;
        };
        match self.workers.worker_for(&run.model) {
            Ok(worker) => {
                if let Err(e) = worker.delete(task).await {
                    warn!(run_id = %run.id, task_id = %task, error = %e, "Failed to delete cancelled remote task");
                }
            }
            Err(e) => warn!(run_id = %run.id, error = %e, "No worker for cancelled run"),
        }
    }

    /// Put failed and cancelled runs back to `PENDING` so the next
    /// activation dispatches them again. Returns the number of runs reset.
    #[instrument(skip(self), fields(forecast_id = %forecast_id))]
    pub async fn reset_failed_runs(&self, forecast_id: Uuid) -> Result<usize> {
        if self.is_active(forecast_id) {
            return Err(EngineError::Validation(format!(
                "forecast {forecast_id} is executing"
            )));
        }

        let snapshot = self.store.load_forecast(forecast_id).await?;
        let mut reset = 0;
        for run in snapshot
            .enabled_runs()
            .filter(|run| matches!(run.status, Status::Error | Status::Cancelled))
        {
            match self
                .store
                .apply_run_transition(run.id, RunTransition::Reset)
                .await
            {
                Ok(outcome) if outcome.is_applied() => {
                    reset += 1;
                    self.poller.forget(run.id);
                    self.events.publish(StatusChangeEvent::run(
                        run.id,
                        run.status,
                        Status::Pending,
                        None,
                    ));
                }
                Ok(_) => {}
                Err(StoreError::Guard(e)) => debug!(run_id = %run.id, error = %e, "Run not reset"),
                Err(e) => return Err(e.into()),
            }
        }

        self.aggregate(forecast_id).await?;
        log_forecast_operation(
            "reset",
            forecast_id,
            Status::Pending.as_str(),
            Some(&format!("runs={reset}")),
        );
        Ok(reset)
    }

    /// Hold back a run that has not been dispatched; activations skip it
    /// until it is released. Returns the run's status afterwards.
    pub async fn hold_run(&self, forecast_id: Uuid, run_id: Uuid) -> Result<Status> {
        self.change_run(forecast_id, run_id, RunTransition::Hold)
            .await
    }

    /// Put a held run back to `PENDING` for the next activation
    pub async fn release_run(&self, forecast_id: Uuid, run_id: Uuid) -> Result<Status> {
        self.change_run(forecast_id, run_id, RunTransition::Release)
            .await
    }

    #[instrument(skip(self, transition), fields(forecast_id = %forecast_id, run_id = %run_id, event = transition.event_type()))]
    async fn change_run(
        &self,
        forecast_id: Uuid,
        run_id: Uuid,
        transition: RunTransition,
    ) -> Result<Status> {
        if self.is_active(forecast_id) {
            return Err(EngineError::Validation(format!(
                "forecast {forecast_id} is executing"
            )));
        }

        let snapshot = self.store.load_forecast(forecast_id).await?;
        if snapshot.find_run(run_id).is_none() {
            return Err(StoreError::not_found(EntityKind::ModelRun, run_id).into());
        }

        let event = transition.event_type();
        let status = match self.store.apply_run_transition(run_id, transition).await? {
            TransitionOutcome::Applied { from, to } => {
                self.events
                    .publish(StatusChangeEvent::run(run_id, from, to, None));
                to
            }
            TransitionOutcome::Discarded { current } => current,
        };

        self.aggregate(forecast_id).await?;
        log_forecast_operation(
            event,
            forecast_id,
            status.as_str(),
            Some(&format!("run={run_id}")),
        );
        Ok(status)
    }
}

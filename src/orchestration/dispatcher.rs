//! # Dispatcher
//!
//! Turns a pending model run into a task on its remote worker.
//!
//! ## Overview
//!
//! Each call makes exactly one submit attempt. A worker that rejects the task,
//! a payload that cannot be built and a connection that fails all end the run
//! in `ERROR` with the reason in `status_detail`; nothing is retried here.
//! Runs that already carry a remote task id are refused before any network
//! call, so a run never ends up with two remote tasks.
//!
//! ## Key Features
//!
//! - **Exclusive payload encoding**: payloads are built under a
//!   [`ResourceReservation`] on the blocking pool
//! - **Bounded submits**: every submit holds a [`ConcurrencyLimiter`] permit
//! - **Cancellation-safe**: a task accepted for a run that was cancelled in
//!   the meantime is deleted again

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::coordinator::{ConcurrencyLimiter, ResourceReservation};
use super::errors::DispatchError;
use super::types::{DispatchOutcome, RunContext};
use crate::constants::status_groups;
use crate::events::{EventPublisher, StatusChangeEvent};
use crate::logging::log_run_operation;
use crate::models::{ModelRun, RemoteTaskId};
use crate::state_machine::{RunTransition, TransitionOutcome};
use crate::store::{ForecastStore, StoreError};
use crate::worker::{ModelWorker, WorkerProvider};

pub struct Dispatcher {
    store: Arc<dyn ForecastStore>,
    workers: Arc<dyn WorkerProvider>,
    limiter: ConcurrencyLimiter,
    reservation: ResourceReservation,
    events: EventPublisher,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("limiter", &self.limiter)
            .field("reservation", &self.reservation.name())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ForecastStore>,
        workers: Arc<dyn WorkerProvider>,
        limiter: ConcurrencyLimiter,
        reservation: ResourceReservation,
        events: EventPublisher,
    ) -> Self {
        Self {
            store,
            workers,
            limiter,
            reservation,
            events,
        }
    }

    /// Submit the run once and record what happened
    #[instrument(skip(self, context), fields(run_id = %context.run_id(), model = %context.run().model.name))]
    pub async fn dispatch(&self, context: &RunContext) -> Result<DispatchOutcome, DispatchError> {
        let run = self.store.load_model_run(context.run_id()).await?;
        ensure_dispatchable(&run)?;

        let snapshot = context.clone();
        let payload = match self
            .reservation
            .run_exclusive(move || snapshot.build_payload())
            .await?
        {
            Ok(payload) => payload,
            Err(e) => return self.fail(&run, e.to_string()).await,
        };

        let worker = match self.workers.worker_for(&run.model) {
            Ok(worker) => worker,
            Err(e) => return self.fail(&run, e.to_string()).await,
        };

        let submitted = {
            let _permit = self.limiter.acquire().await?;
            worker.submit(&payload).await
        };

        match submitted {
            Ok(task) => self.record_dispatch(&run, worker.as_ref(), task).await,
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "Model worker did not accept run");
                self.fail(&run, e.to_string()).await
            }
        }
    }

    async fn record_dispatch(
        &self,
        run: &ModelRun,
        worker: &dyn ModelWorker,
        task: RemoteTaskId,
    ) -> Result<DispatchOutcome, DispatchError> {
        let transition = RunTransition::Dispatch {
            runid: task.clone(),
            dispatched_at: Utc::now(),
        };

        match self.store.apply_run_transition(run.id, transition).await {
            Ok(TransitionOutcome::Applied { from, to }) => {
                self.events
                    .publish(StatusChangeEvent::run(run.id, from, to, None));
                log_run_operation(
                    "dispatch",
                    run.id,
                    &run.model.name,
                    Some(task.as_str()),
                    to.as_str(),
                    None,
                );
                Ok(DispatchOutcome::Dispatched { runid: task })
            }
            Ok(TransitionOutcome::Discarded { current }) => {
                info!(run_id = %run.id, status = %current, task_id = %task, "Run changed during submit, withdrawing task");
                withdraw(worker, &task).await;
                Ok(DispatchOutcome::Discarded)
            }
            Err(e) => {
                // the task can't be recorded, so nothing would ever poll it
                withdraw(worker, &task).await;
                Err(e.into())
            }
        }
    }

    async fn fail(&self, run: &ModelRun, detail: String) -> Result<DispatchOutcome, DispatchError> {
        let transition = RunTransition::Fail {
            detail: detail.clone(),
        };

        match self.store.apply_run_transition(run.id, transition).await {
            Ok(TransitionOutcome::Applied { from, to }) => {
                self.events.publish(StatusChangeEvent::run(
                    run.id,
                    from,
                    to,
                    Some(detail.clone()),
                ));
                log_run_operation(
                    "dispatch",
                    run.id,
                    &run.model.name,
                    None,
                    to.as_str(),
                    Some(&detail),
                );
                Ok(DispatchOutcome::Failed { detail })
            }
            Ok(TransitionOutcome::Discarded { .. }) => Ok(DispatchOutcome::Discarded),
            Err(StoreError::Guard(e)) => {
                debug!(run_id = %run.id, error = %e, "Run moved on before its failure was recorded");
                Ok(DispatchOutcome::Discarded)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn ensure_dispatchable(run: &ModelRun) -> Result<(), DispatchError> {
    if let Some(runid) = &run.runid {
        return Err(DispatchError::AlreadyDispatched {
            run_id: run.id,
            runid: runid.clone(),
        });
    }
    if !run.enabled {
        return Err(DispatchError::Disabled { run_id: run.id });
    }
    if !status_groups::DISPATCHABLE.contains(&run.status) {
        return Err(DispatchError::NotDispatchable {
            run_id: run.id,
            status: run.status,
        });
    }
    Ok(())
}

/// Best-effort removal of a task nobody will poll
async fn withdraw(worker: &dyn ModelWorker, task: &RemoteTaskId) {
    if let Err(e) = worker.delete(task).await {
        warn!(task_id = %task, error = %e, "Failed to withdraw remote task");
    }
}

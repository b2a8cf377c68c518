//! Postgres-backed [`ForecastStore`].
//!
//! Run transitions lock the run row (`SELECT ... FOR UPDATE`) and apply the
//! same guard rules as every other store before writing. Schema lives in
//! `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::{ForecastStore, StoreError, StoreResult};
use crate::config::DatabaseConfig;
use crate::models::{
    Forecast, ForecastInputs, ModelReference, ModelResult, ModelRun, Project, RemoteTaskId,
    Scenario, Stage, StageKind,
};
use crate::state_machine::{
    AggregatedStatuses, EntityKind, EntityStatus, RunTransition, Status, StatusChange,
    TransitionOutcome,
};

const RUN_COLUMNS: &str = "r.id, r.stage_id, r.enabled, r.model, r.config, r.runid, r.status, \
                           r.status_detail, r.dispatched_at, r.result";

#[derive(Debug, Clone)]
pub struct PgForecastStore {
    pool: PgPool,
}

impl PgForecastStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let url = config
            .database_url()
            .ok_or_else(|| StoreError::Backend("no database url configured".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&url)
            .await?;

        info!(max_connections = config.max_connections, "Connected forecast store");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))
    }

    pub async fn insert_project(&self, project: &Project) -> StoreResult<()> {
        sqlx::query("INSERT INTO projects (id, name, reservoir_geometry) VALUES ($1, $2, $3)")
            .bind(project.id)
            .bind(&project.name)
            .bind(&project.reservoir_geometry)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert a forecast with its whole subtree in one transaction
    pub async fn insert_forecast(&self, forecast: &Forecast) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO forecasts (id, project_id, name, starttime, endtime, status, inputs) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(forecast.id)
        .bind(forecast.project_id)
        .bind(&forecast.name)
        .bind(forecast.starttime)
        .bind(forecast.endtime)
        .bind(forecast.status.as_str())
        .bind(serde_json::to_value(&forecast.inputs)?)
        .execute(&mut *tx)
        .await?;

        for (scenario_pos, scenario) in forecast.scenarios.iter().enumerate() {
            sqlx::query(
                "INSERT INTO scenarios (id, forecast_id, position, name, enabled, status, \
                 injection_plan, reservoir_geometry) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(scenario.id)
            .bind(forecast.id)
            .bind(scenario_pos as i32)
            .bind(&scenario.name)
            .bind(scenario.enabled)
            .bind(scenario.status.as_str())
            .bind(&scenario.injection_plan)
            .bind(&scenario.reservoir_geometry)
            .execute(&mut *tx)
            .await?;

            for (stage_pos, stage) in scenario.stages.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO stages (id, scenario_id, position, kind, enabled, config, status) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(stage.id)
                .bind(scenario.id)
                .bind(stage_pos as i32)
                .bind(stage.kind.as_str())
                .bind(stage.enabled)
                .bind(Value::Object(stage.config.clone()))
                .bind(stage.status.as_str())
                .execute(&mut *tx)
                .await?;

                for (run_pos, run) in stage.runs.iter().enumerate() {
                    insert_run(&mut tx, stage.id, run_pos as i32, run).await?;
                }
            }
        }

        tx.commit().await?;
        debug!(forecast_id = %forecast.id, "Inserted forecast");
        Ok(())
    }

    async fn write_status(
        tx: &mut Transaction<'_, Postgres>,
        table: &'static str,
        entity: EntityKind,
        update: EntityStatus,
    ) -> StoreResult<Option<StatusChange>> {
        let sql = format!(
            "WITH previous AS (SELECT id, status FROM {table} WHERE id = $1 FOR UPDATE) \
             UPDATE {table} t SET status = $2, updated_at = NOW() FROM previous \
             WHERE t.id = previous.id AND previous.status <> $2 \
             RETURNING previous.status"
        );

        let previous: Option<String> = sqlx::query_scalar(&sql)
            .bind(update.id)
            .bind(update.status.as_str())
            .fetch_optional(&mut **tx)
            .await?;

        previous
            .map(|from| {
                Ok(StatusChange {
                    entity,
                    id: update.id,
                    from: parse_status(&from)?,
                    to: update.status,
                })
            })
            .transpose()
    }
}

async fn insert_run(
    tx: &mut Transaction<'_, Postgres>,
    stage_id: Uuid,
    position: i32,
    run: &ModelRun,
) -> StoreResult<()> {
    let result = run.result.as_ref().map(serde_json::to_value).transpose()?;
    sqlx::query(
        "INSERT INTO model_runs (id, stage_id, position, enabled, model, config, runid, status, \
         status_detail, dispatched_at, result) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(run.id)
    .bind(stage_id)
    .bind(position)
    .bind(run.enabled)
    .bind(serde_json::to_value(&run.model)?)
    .bind(Value::Object(run.config.clone()))
    .bind(run.runid.as_ref().map(|runid| runid.as_str().to_string()))
    .bind(run.status.as_str())
    .bind(&run.status_detail)
    .bind(run.dispatched_at)
    .bind(result)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn parse_status(value: &str) -> StoreResult<Status> {
    value.parse().map_err(StoreError::Serialization)
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn run_from_row(row: &PgRow) -> StoreResult<ModelRun> {
    let model: ModelReference = serde_json::from_value(row.try_get("model")?)?;
    let result: Option<Value> = row.try_get("result")?;
    let runid: Option<String> = row.try_get("runid")?;
    let status: String = row.try_get("status")?;
    let dispatched_at: Option<DateTime<Utc>> = row.try_get("dispatched_at")?;

    Ok(ModelRun {
        id: row.try_get("id")?,
        enabled: row.try_get("enabled")?,
        model,
        config: object(row.try_get("config")?),
        runid: runid.map(RemoteTaskId::from),
        status: parse_status(&status)?,
        status_detail: row.try_get("status_detail")?,
        dispatched_at,
        result: result
            .map(serde_json::from_value::<ModelResult>)
            .transpose()?,
    })
}

#[async_trait]
impl ForecastStore for PgForecastStore {
    async fn load_project(&self, project_id: Uuid) -> StoreResult<Project> {
        let row = sqlx::query("SELECT id, name, reservoir_geometry FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found(EntityKind::Project, project_id))?;

        Ok(Project {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            reservoir_geometry: row.try_get("reservoir_geometry")?,
        })
    }

    async fn load_forecast(&self, forecast_id: Uuid) -> StoreResult<Forecast> {
        let row = sqlx::query(
            "SELECT id, project_id, name, starttime, endtime, status, inputs \
             FROM forecasts WHERE id = $1",
        )
        .bind(forecast_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found(EntityKind::Forecast, forecast_id))?;

        let status: String = row.try_get("status")?;
        let inputs: ForecastInputs = serde_json::from_value(row.try_get("inputs")?)?;
        let mut forecast = Forecast {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            name: row.try_get("name")?,
            starttime: row.try_get("starttime")?,
            endtime: row.try_get("endtime")?,
            status: parse_status(&status)?,
            inputs,
            scenarios: Vec::new(),
        };

        let run_rows = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM model_runs r \
             JOIN stages st ON st.id = r.stage_id \
             JOIN scenarios sc ON sc.id = st.scenario_id \
             WHERE sc.forecast_id = $1 ORDER BY r.position"
        ))
        .bind(forecast_id)
        .fetch_all(&self.pool)
        .await?;

        let mut runs_by_stage: HashMap<Uuid, Vec<ModelRun>> = HashMap::new();
        for row in &run_rows {
            let stage_id: Uuid = row.try_get("stage_id")?;
            runs_by_stage
                .entry(stage_id)
                .or_default()
                .push(run_from_row(row)?);
        }

        let stage_rows = sqlx::query(
            "SELECT st.id, st.scenario_id, st.kind, st.enabled, st.config, st.status \
             FROM stages st JOIN scenarios sc ON sc.id = st.scenario_id \
             WHERE sc.forecast_id = $1 ORDER BY st.position",
        )
        .bind(forecast_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stages_by_scenario: HashMap<Uuid, Vec<Stage>> = HashMap::new();
        for row in &stage_rows {
            let id: Uuid = row.try_get("id")?;
            let scenario_id: Uuid = row.try_get("scenario_id")?;
            let kind: String = row.try_get("kind")?;
            let status: String = row.try_get("status")?;
            stages_by_scenario.entry(scenario_id).or_default().push(Stage {
                id,
                kind: kind
                    .parse::<StageKind>()
                    .map_err(StoreError::Serialization)?,
                enabled: row.try_get("enabled")?,
                config: object(row.try_get("config")?),
                status: parse_status(&status)?,
                runs: runs_by_stage.remove(&id).unwrap_or_default(),
            });
        }

        let scenario_rows = sqlx::query(
            "SELECT id, name, enabled, status, injection_plan, reservoir_geometry \
             FROM scenarios WHERE forecast_id = $1 ORDER BY position",
        )
        .bind(forecast_id)
        .fetch_all(&self.pool)
        .await?;

        for row in &scenario_rows {
            let id: Uuid = row.try_get("id")?;
            let status: String = row.try_get("status")?;
            forecast.scenarios.push(Scenario {
                id,
                name: row.try_get("name")?,
                enabled: row.try_get("enabled")?,
                status: parse_status(&status)?,
                injection_plan: row.try_get("injection_plan")?,
                reservoir_geometry: row.try_get("reservoir_geometry")?,
                stages: stages_by_scenario.remove(&id).unwrap_or_default(),
            });
        }

        Ok(forecast)
    }

    async fn load_model_run(&self, run_id: Uuid) -> StoreResult<ModelRun> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM model_runs r WHERE r.id = $1"))
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found(EntityKind::ModelRun, run_id))?;
        run_from_row(&row)
    }

    async fn apply_run_transition(
        &self,
        run_id: Uuid,
        transition: RunTransition,
    ) -> StoreResult<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM model_runs r WHERE r.id = $1 FOR UPDATE"
        ))
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::not_found(EntityKind::ModelRun, run_id))?;

        let mut run = run_from_row(&row)?;
        let outcome = run.transition(transition)?;

        if outcome.is_applied() {
            let result = run.result.as_ref().map(serde_json::to_value).transpose()?;
            sqlx::query(
                "UPDATE model_runs SET runid = $2, status = $3, status_detail = $4, \
                 dispatched_at = $5, result = $6, updated_at = NOW() WHERE id = $1",
            )
            .bind(run.id)
            .bind(run.runid.as_ref().map(|runid| runid.as_str().to_string()))
            .bind(run.status.as_str())
            .bind(&run.status_detail)
            .bind(run.dispatched_at)
            .bind(result)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn update_forecast_inputs(
        &self,
        forecast_id: Uuid,
        inputs: ForecastInputs,
    ) -> StoreResult<()> {
        let updated = sqlx::query(
            "UPDATE forecasts SET inputs = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(forecast_id)
        .bind(serde_json::to_value(&inputs)?)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found(EntityKind::Forecast, forecast_id));
        }
        Ok(())
    }

    async fn persist_statuses(
        &self,
        statuses: &AggregatedStatuses,
    ) -> StoreResult<Vec<StatusChange>> {
        let mut tx = self.pool.begin().await?;
        let mut changes = Vec::new();

        for stage in &statuses.stages {
            changes.extend(Self::write_status(&mut tx, "stages", EntityKind::Stage, *stage).await?);
        }
        for scenario in &statuses.scenarios {
            changes.extend(
                Self::write_status(&mut tx, "scenarios", EntityKind::Scenario, *scenario).await?,
            );
        }
        let forecast = EntityStatus {
            id: statuses.forecast_id,
            status: statuses.forecast,
        };
        changes.extend(
            Self::write_status(&mut tx, "forecasts", EntityKind::Forecast, forecast).await?,
        );

        tx.commit().await?;
        Ok(changes)
    }

    async fn list_forecasts(&self, project_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM forecasts WHERE project_id = $1 ORDER BY starttime",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

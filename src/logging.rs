//! # Structured Logging Module
//!
//! Environment-aware structured logging for forecast activations. Console
//! output by default, JSON lines when `SEISMO_LOG_FORMAT=json`.

use chrono::Utc;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use crate::config::ConfigManager;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// Safe to call repeatedly and alongside an already-installed subscriber.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let filter = filter_directive(&environment);
        let json = std::env::var("SEISMO_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let console = (!json).then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(std::io::stdout().is_terminal())
                .with_filter(EnvFilter::new(filter.clone()))
        });
        let structured = json.then(|| {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
                .with_filter(EnvFilter::new(filter.clone()))
        });

        if tracing_subscriber::registry()
            .with(console)
            .with(structured)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            filter = %filter,
            json = json,
            "Structured logging initialized"
        );
    });
}

/// `SEISMO_LOG`, then `RUST_LOG`, then a level derived from the environment
fn filter_directive(environment: &str) -> String {
    std::env::var("SEISMO_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| log_level(environment).to_string())
}

fn log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for forecast-level operations
pub fn log_forecast_operation(
    operation: &str,
    forecast_id: Uuid,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        forecast_id = %forecast_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "FORECAST_OPERATION"
    );
}

/// Log structured data for model run operations
pub fn log_run_operation(
    operation: &str,
    run_id: Uuid,
    model: &str,
    task_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        run_id = %run_id,
        model = %model,
        task_id = task_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "RUN_OPERATION"
    );
}

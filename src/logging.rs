//! # Structured Logging Module
//!
//! Environment-aware structured logging for the batch runtime. Console output
//! by default, JSON lines when `BATCH_LOG_FORMAT=json`.

use chrono::Utc;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| get_log_level(&environment));
        let json = use_json_format();

        let console = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(filter))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(filter))
                .boxed()
        };

        // Use try_init to avoid panic if global subscriber already set
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("BATCH_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn use_json_format() -> bool {
    std::env::var("BATCH_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log structured data for job operations
pub fn log_job_operation(
    operation: &str,
    job_name: &str,
    execution_id: Option<i64>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_name = %job_name,
        execution_id = execution_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 JOB_OPERATION"
    );
}

/// Log structured data for step operations
pub fn log_step_operation(
    operation: &str,
    execution_id: Option<i64>,
    step_execution_id: Option<i64>,
    step_name: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        execution_id = execution_id,
        step_execution_id = step_execution_id,
        step_name = %step_name,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔧 STEP_OPERATION"
    );
}

/// Log structured data for partition operations
pub fn log_partition_operation(
    operation: &str,
    step_name: &str,
    partition_index: usize,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        step_name = %step_name,
        partition_index = partition_index,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🧩 PARTITION_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

pub mod adapters;
pub mod cache;
pub mod config;
pub mod dates;
pub mod errors;
pub mod help;
pub mod models;
pub mod query;
pub mod refresh;
pub mod render;
pub mod server;
pub mod session;

use crate::errors::{AppError, AppResult};
use crate::query::{execute, QuerySpec};
use crate::render::render_prompt;
use crate::session::QuerySession;
use chrono::{Local, NaiveDateTime};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Parses `query`, filters the session's records and renders the prompt text.
pub fn run_query(session: &mut QuerySession, query: &str, now: NaiveDateTime) -> AppResult<String> {
    let spec = QuerySpec::parse(query, now)?;
    let records = session.records();
    let result = execute(&records, &spec);
    tracing::info!(query, matched = result.len(), "query executed");
    Ok(render_prompt(query, &result, now))
}

/// Tool-facing wrapper: errors become text, never a failure.
pub fn query_tool_text(session: &mut QuerySession, query: &str) -> String {
    match run_query(session, query, Local::now().naive_local()) {
        Ok(text) => text,
        Err(error) => tool_error_text(&error),
    }
}

pub fn tool_error_text(error: &AppError) -> String {
    format!("Error executing query: {}", error)
}

/// JSON lines into a daily rolling file when `log_dir` is set, otherwise plain
/// text on stderr. Stdout is reserved for command output and the tool protocol.
pub fn init_tracing(log_dir: Option<&Path>) -> AppResult<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;
            let file_appender = tracing_appender::rolling::daily(log_dir, "everything2prompt.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = LOG_GUARD.set(guard);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_writer(non_blocking)
                .try_init()
                .map_err(|error| AppError::Internal(error.to_string()))
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|error| AppError::Internal(error.to_string())),
    }
}

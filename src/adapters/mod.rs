pub mod articles;
pub mod events;
pub mod health;
pub mod notes;
pub mod tasks;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{SourceBatch, SourceKind};
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A producer of fresh records for one source.
///
/// `fetch` returns the complete current contents of the source; the refresh
/// workflow replaces the cached slice with it wholesale.
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;
    fn fetch(&self) -> AppResult<SourceBatch>;
}

/// Adapters for every source that has configuration; unconfigured sources are omitted.
pub fn configured_adapters(config: &AppConfig) -> AppResult<Vec<Box<dyn SourceAdapter>>> {
    let mut adapters: Vec<Box<dyn SourceAdapter>> = Vec::new();
    if let Some(notes) = &config.notes {
        adapters.push(Box::new(notes::NotesAdapter::new(&notes.vault_path)));
    }
    if let Some(tasks) = &config.tasks {
        adapters.push(Box::new(tasks::TodoistAdapter::new(
            http_client()?,
            &tasks.base_url,
            &tasks.api_token,
            tasks.days_back,
        )));
    }
    if let Some(articles) = &config.articles {
        adapters.push(Box::new(articles::InstapaperExportAdapter::new(&articles.export_path)));
    }
    if let Some(events) = &config.events {
        adapters.push(Box::new(events::CalendarFeedAdapter::new(
            http_client()?,
            events.calendars.clone(),
        )));
    }
    if let Some(health) = &config.health {
        adapters.push(Box::new(health::HealthCsvAdapter::new(&health.csv_path)));
    }
    Ok(adapters)
}

pub(crate) fn http_client() -> AppResult<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("everything2prompt/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {}", error)))
}

/// Sends a GET and returns the body, turning non-success statuses into fetch errors.
pub(crate) fn get_text(
    kind: SourceKind,
    request: reqwest::blocking::RequestBuilder,
) -> AppResult<String> {
    let response = request
        .send()
        .map_err(|error| AppError::source_fetch(kind, format!("HTTP request failed: {}", error)))?;
    let status = response.status();
    let body = response
        .text()
        .map_err(|error| AppError::source_fetch(kind, format!("failed to read response: {}", error)))?;
    if !status.is_success() {
        let snippet: String = body.chars().take(200).collect();
        return Err(AppError::source_fetch(kind, format!("HTTP {}: {}", status, snippet)));
    }
    Ok(body)
}

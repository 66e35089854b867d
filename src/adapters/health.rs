use super::SourceAdapter;
use crate::errors::{AppError, AppResult};
use crate::models::{HealthRecord, HealthValue, SourceBatch, SourceKind};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Tried in order; ambiguous day/month values resolve month-first.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];

/// One record per CSV row with a parseable `date` column.
pub struct HealthCsvAdapter {
    path: PathBuf,
}

impl HealthCsvAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn collect(&self) -> AppResult<Vec<HealthRecord>> {
        if !self.path.is_file() {
            return Err(AppError::source_fetch(
                SourceKind::Health,
                format!("health CSV not found: {}", self.path.display()),
            ));
        }
        let entries = read_health_csv(&self.path)?;
        tracing::info!(path = %self.path.display(), entries = entries.len(), "collected health data");
        Ok(entries)
    }
}

impl SourceAdapter for HealthCsvAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Health
    }

    fn fetch(&self) -> AppResult<SourceBatch> {
        self.collect().map(SourceBatch::Health)
    }
}

pub fn parse_health_date(raw: &str) -> Option<NaiveDateTime> {
    let value = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .map(|date| date.and_time(NaiveTime::MIN))
}

fn read_health_csv(path: &Path) -> AppResult<Vec<HealthRecord>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let Some(date_column) = headers.iter().position(|header| header.trim().eq_ignore_ascii_case("date")) else {
        return Err(AppError::source_fetch(
            SourceKind::Health,
            format!("{} has no 'date' column", path.display()),
        ));
    };

    let mut entries = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(error) => {
                tracing::warn!(path = %path.display(), row = index + 1, error = %error, "skipping malformed health row");
                continue;
            }
        };
        let raw_date = row.get(date_column).unwrap_or_default();
        if raw_date.trim().is_empty() {
            continue;
        }
        let Some(date) = parse_health_date(raw_date) else {
            tracing::warn!(path = %path.display(), row = index + 1, date = raw_date, "could not parse health date");
            continue;
        };

        let mut metrics = IndexMap::new();
        for (column, header) in headers.iter().enumerate() {
            if column == date_column {
                continue;
            }
            if let Some(value) = row.get(column).and_then(HealthValue::coerce) {
                metrics.insert(header.trim().to_string(), value);
            }
        }
        entries.push(HealthRecord::new(date, metrics));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_csv(content: &str) -> (tempfile::TempDir, PathBuf) {
        let root = tempfile::tempdir().expect("temp root");
        let path = root.path().join("health.csv");
        fs::write(&path, content).expect("write csv");
        (root, path)
    }

    #[test]
    fn rows_become_dated_entries_with_typed_metrics() {
        let (_root, path) = write_csv(
            "date,steps,sleep_hours,mood,weight\n\
2025-01-01,9000,7.5,good,\n\
01/02/2025,8000.0,6.25,,70\n",
        );
        let entries = HealthCsvAdapter::new(&path).collect().expect("collect");
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.base.name, "Health Data - 2025-01-01");
        assert_eq!(first.metrics.get("steps"), Some(&HealthValue::Int(9000)));
        assert_eq!(first.metrics.get("sleep_hours"), Some(&HealthValue::Float(7.5)));
        assert_eq!(first.metrics.get("mood"), Some(&HealthValue::Text("good".to_string())));
        assert!(!first.metrics.contains_key("weight"));

        let second = &entries[1];
        assert_eq!(second.base.name, "Health Data - 2025-01-02");
        assert_eq!(second.metrics.get("steps"), Some(&HealthValue::Int(8000)));
        assert!(!second.metrics.contains_key("mood"));
        assert!(second.base.tags.is_empty());
    }

    #[test]
    fn unparseable_and_blank_dates_are_skipped() {
        let (_root, path) = write_csv("date,steps\nyesterday,1\n,2\n2025-03-01,3\n");
        let entries = HealthCsvAdapter::new(&path).collect().expect("collect");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metrics.get("steps"), Some(&HealthValue::Int(3)));
    }

    #[test]
    fn day_first_dates_are_accepted_when_month_first_fails() {
        assert_eq!(
            parse_health_date("25/12/2024").map(|date| date.to_string()),
            Some("2024-12-25 00:00:00".to_string())
        );
        assert_eq!(
            parse_health_date("03/04/2024").map(|date| date.to_string()),
            Some("2024-03-04 00:00:00".to_string())
        );
    }

    #[test]
    fn csv_without_date_column_is_a_fetch_error() {
        let (_root, path) = write_csv("day,steps\n2025-01-01,1\n");
        let error = HealthCsvAdapter::new(&path).collect().expect_err("no date column");
        assert!(error.to_string().contains("no 'date' column"));
    }
}

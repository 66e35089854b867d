use super::SourceAdapter;
use crate::dates::normalize_timestamp;
use crate::errors::{AppError, AppResult};
use crate::models::{NoteRecord, RecordBase, SourceBatch, SourceKind};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

static FRONTMATTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^---\s*\n(.*?)\n---\s*\n").expect("valid frontmatter regex"));
static DATE_STEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date stem regex"));

/// Templater markers; files containing them are templates, not notes.
const TEMPLATE_MARKERS: [&str; 2] = ["<%tp", "tp.file.cursor()"];

pub struct NotesAdapter {
    vault: PathBuf,
}

impl NotesAdapter {
    pub fn new(vault: impl Into<PathBuf>) -> Self {
        Self { vault: vault.into() }
    }

    pub fn collect(&self) -> AppResult<Vec<NoteRecord>> {
        if !self.vault.is_dir() {
            return Err(AppError::source_fetch(
                SourceKind::Note,
                format!("vault directory not found: {}", self.vault.display()),
            ));
        }

        let mut notes = Vec::new();
        let walker = WalkDir::new(&self.vault)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_hidden(entry));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::warn!(error = %error, "skipping unreadable vault entry");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("md") {
                continue;
            }
            match read_note(path) {
                Ok(Some(note)) => notes.push(note),
                Ok(None) => tracing::debug!(path = %path.display(), "skipping template or undated note"),
                Err(error) => {
                    tracing::warn!(path = %path.display(), error = %error, "skipping malformed note file")
                }
            }
        }
        tracing::info!(vault = %self.vault.display(), notes = notes.len(), "collected notes");
        Ok(notes)
    }
}

impl SourceAdapter for NotesAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Note
    }

    fn fetch(&self) -> AppResult<SourceBatch> {
        self.collect().map(SourceBatch::Notes)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn read_note(path: &Path) -> AppResult<Option<NoteRecord>> {
    let content = fs::read_to_string(path).map_err(|error| AppError::Io(error.to_string()))?;
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    parse_note(&absolute, &content)
}

/// Splits `---` delimited YAML front-matter from the body.
///
/// Content without front-matter yields an empty map and the whole text as body.
pub fn split_frontmatter(content: &str) -> AppResult<(Map<String, Value>, String)> {
    let Some(captures) = FRONTMATTER.captures(content) else {
        return Ok((Map::new(), content.to_string()));
    };
    let raw_yaml = captures.get(1).map(|group| group.as_str()).unwrap_or_default();
    let body_start = captures.get(0).map(|whole| whole.end()).unwrap_or_default();
    let body = content[body_start..].to_string();

    let yaml: serde_yaml::Value = serde_yaml::from_str(raw_yaml)
        .map_err(|error| AppError::Parse(format!("invalid front-matter YAML: {}", error)))?;
    let frontmatter = match serde_json::to_value(yaml)? {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => {
            return Err(AppError::Parse(format!(
                "front-matter must be a mapping, found {}",
                json_kind(&other)
            )))
        }
    };
    Ok((frontmatter, body))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// Builds a note from file content; `Ok(None)` for templates and undated notes.
pub fn parse_note(path: &Path, content: &str) -> AppResult<Option<NoteRecord>> {
    if is_template(content) {
        return Ok(None);
    }
    let (frontmatter, body) = split_frontmatter(content)?;

    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let Some(date) = note_date(&frontmatter, &name) else {
        return Ok(None);
    };

    Ok(Some(NoteRecord {
        base: RecordBase::new(name, note_tags(&frontmatter), Some(date)),
        absolute_path: path.to_string_lossy().to_string(),
        body,
        frontmatter,
    }))
}

fn is_template(content: &str) -> bool {
    TEMPLATE_MARKERS.iter().any(|marker| content.contains(marker))
}

/// `tags` may be a whitespace-separated string or a list.
fn note_tags(frontmatter: &Map<String, Value>) -> BTreeSet<String> {
    match frontmatter.get("tags") {
        Some(Value::String(tags)) => tags.split_whitespace().map(ToString::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(tag) => Some(tag.trim().to_string()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
            .filter(|tag| !tag.is_empty())
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// Front-matter `date` wins; otherwise a `YYYY-MM-DD` file name.
fn note_date(frontmatter: &Map<String, Value>, stem: &str) -> Option<NaiveDateTime> {
    if let Some(date) = frontmatter
        .get("date")
        .and_then(Value::as_str)
        .and_then(normalize_timestamp)
    {
        return Some(date);
    }
    if DATE_STEM.is_match(stem) {
        return NaiveDate::parse_from_str(stem, "%Y-%m-%d")
            .ok()
            .map(|date| date.and_time(NaiveTime::MIN));
    }
    None
}

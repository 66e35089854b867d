use crate::errors::AppError;
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Note,
    Task,
    Article,
    Event,
    Health,
}

impl SourceKind {
    /// Canonical order used for cache concatenation, rendering and refresh.
    pub const ALL: [SourceKind; 5] = [Self::Note, Self::Task, Self::Article, Self::Event, Self::Health];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Task => "task",
            Self::Article => "article",
            Self::Event => "event",
            Self::Health => "health",
        }
    }

    /// Provider name the source was historically queried by.
    pub fn legacy_name(self) -> &'static str {
        match self {
            Self::Note => "obsidian",
            Self::Task => "todoist",
            Self::Article => "instapaper",
            Self::Event => "calendar",
            Self::Health => "health",
        }
    }

    pub fn heading(self) -> &'static str {
        match self {
            Self::Note => "NOTES",
            Self::Task => "TASKS",
            Self::Article => "ARTICLES",
            Self::Event => "EVENTS",
            Self::Health => "HEALTH DATA",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized || kind.legacy_name() == normalized)
    }

    pub fn allowed_names() -> String {
        Self::ALL.iter().map(|kind| kind.as_str()).collect::<Vec<_>>().join(", ")
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or_else(|| {
            AppError::Parse(format!(
                "unknown source '{}'; expected one of: {}",
                value,
                Self::allowed_names()
            ))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordBase {
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub date: Option<NaiveDateTime>,
}

impl RecordBase {
    pub fn new(name: impl Into<String>, tags: BTreeSet<String>, date: Option<NaiveDateTime>) -> Self {
        Self {
            name: name.into(),
            tags,
            date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRecord {
    #[serde(flatten)]
    pub base: RecordBase,
    pub absolute_path: String,
    pub body: String,
    #[serde(default)]
    pub frontmatter: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub project_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(flatten)]
    pub base: RecordBase,
    pub task_id: String,
    pub content: String,
    #[serde(default)]
    pub description: Option<String>,
    pub project_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// 1 through 4, 4 being the most urgent.
    pub priority: u8,
    #[serde(default)]
    pub due: Option<NaiveDateTime>,
    #[serde(default)]
    pub deadline: Option<NaiveDateTime>,
    #[serde(default)]
    pub completed_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
}

impl TaskRecord {
    /// Completion wins over due, then deadline, then last update.
    pub fn canonical_date(&self) -> Option<NaiveDateTime> {
        self.completed_at.or(self.due).or(self.deadline).or(self.updated_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArticleFolder {
    Unread,
    Archive,
    Starred,
}

impl ArticleFolder {
    /// Custom folder names count as unread.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "archive" => Self::Archive,
            "starred" => Self::Starred,
            _ => Self::Unread,
        }
    }

    pub fn is_read(self) -> bool {
        matches!(self, Self::Archive)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleRecord {
    #[serde(flatten)]
    pub base: RecordBase,
    pub url: String,
    pub title: String,
    pub folder: ArticleFolder,
    pub is_read: bool,
    pub saved_timestamp: i64,
    #[serde(default)]
    pub selection: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(flatten)]
    pub base: RecordBase,
    pub event_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub start: NaiveDateTime,
    #[serde(default)]
    pub end: Option<NaiveDateTime>,
    #[serde(default)]
    pub organizer: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub last_modified: Option<NaiveDateTime>,
    #[serde(default)]
    pub calendar_name: Option<String>,
}

impl EventRecord {
    /// Events are never tagged and are dated by their start.
    pub fn new(event_id: impl Into<String>, name: impl Into<String>, start: NaiveDateTime) -> Self {
        Self {
            base: RecordBase::new(name, BTreeSet::new(), Some(start)),
            event_id: event_id.into(),
            description: None,
            location: None,
            start,
            end: None,
            organizer: None,
            status: None,
            created_at: None,
            last_modified: None,
            calendar_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HealthValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl HealthValue {
    /// Integral finite numbers become `Int`, other finite numbers `Float`, the rest text.
    pub fn coerce(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<f64>() {
            Ok(number) if number.is_finite() => {
                if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
                    Some(Self::Int(number as i64))
                } else {
                    Some(Self::Float(number))
                }
            }
            _ => Some(Self::Text(trimmed.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    #[serde(flatten)]
    pub base: RecordBase,
    #[serde(default)]
    pub metrics: IndexMap<String, HealthValue>,
}

impl HealthRecord {
    pub fn new(date: NaiveDateTime, metrics: IndexMap<String, HealthValue>) -> Self {
        let name = format!("Health Data - {}", date.format("%Y-%m-%d"));
        Self {
            base: RecordBase::new(name, BTreeSet::new(), Some(date)),
            metrics,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Note(NoteRecord),
    Task(TaskRecord),
    Article(ArticleRecord),
    Event(EventRecord),
    Health(HealthRecord),
}

impl Record {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Note(_) => SourceKind::Note,
            Self::Task(_) => SourceKind::Task,
            Self::Article(_) => SourceKind::Article,
            Self::Event(_) => SourceKind::Event,
            Self::Health(_) => SourceKind::Health,
        }
    }

    pub fn base(&self) -> &RecordBase {
        match self {
            Self::Note(record) => &record.base,
            Self::Task(record) => &record.base,
            Self::Article(record) => &record.base,
            Self::Event(record) => &record.base,
            Self::Health(record) => &record.base,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.base().tags
    }

    pub fn date(&self) -> Option<NaiveDateTime> {
        self.base().date
    }
}

/// Fresh records produced by one adapter run.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceBatch {
    Notes(Vec<NoteRecord>),
    Tasks {
        tasks: Vec<TaskRecord>,
        projects: Vec<Project>,
    },
    Articles(Vec<ArticleRecord>),
    Events(Vec<EventRecord>),
    Health(Vec<HealthRecord>),
}

impl SourceBatch {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Notes(_) => SourceKind::Note,
            Self::Tasks { .. } => SourceKind::Task,
            Self::Articles(_) => SourceKind::Article,
            Self::Events(_) => SourceKind::Event,
            Self::Health(_) => SourceKind::Health,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Notes(records) => records.len(),
            Self::Tasks { tasks, .. } => tasks.len(),
            Self::Articles(records) => records.len(),
            Self::Events(records) => records.len(),
            Self::Health(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cache {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub notes: Vec<NoteRecord>,
    #[serde(default)]
    pub articles: Vec<ArticleRecord>,
    #[serde(default)]
    pub events: Vec<EventRecord>,
    #[serde(default)]
    pub health: Vec<HealthRecord>,
}

impl Cache {
    /// All records in canonical source order: notes, tasks, articles, events, health.
    pub fn records(&self) -> Vec<Record> {
        let mut records = Vec::with_capacity(self.len());
        records.extend(self.notes.iter().cloned().map(Record::Note));
        records.extend(self.tasks.iter().cloned().map(Record::Task));
        records.extend(self.articles.iter().cloned().map(Record::Article));
        records.extend(self.events.iter().cloned().map(Record::Event));
        records.extend(self.health.iter().cloned().map(Record::Health));
        records
    }

    pub fn len(&self) -> usize {
        self.notes.len() + self.tasks.len() + self.articles.len() + self.events.len() + self.health.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slice_len(&self, kind: SourceKind) -> usize {
        match kind {
            SourceKind::Note => self.notes.len(),
            SourceKind::Task => self.tasks.len(),
            SourceKind::Article => self.articles.len(),
            SourceKind::Event => self.events.len(),
            SourceKind::Health => self.health.len(),
        }
    }

    /// Full replacement of one source's slice; no merging with previous contents.
    pub fn replace(&mut self, batch: SourceBatch) {
        match batch {
            SourceBatch::Notes(records) => self.notes = records,
            SourceBatch::Tasks { tasks, projects } => {
                self.tasks = tasks;
                self.projects = projects;
            }
            SourceBatch::Articles(records) => self.articles = records,
            SourceBatch::Events(records) => self.events = records,
            SourceBatch::Health(records) => self.health = records,
        }
    }
}

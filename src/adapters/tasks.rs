use super::{get_text, SourceAdapter};
use crate::dates::normalize_timestamp;
use crate::errors::{AppError, AppResult};
use crate::models::{Project, RecordBase, SourceBatch, SourceKind, TaskRecord};
use chrono::{Duration, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

pub const DEFAULT_TODOIST_BASE_URL: &str = "https://api.todoist.com/api/v1";
pub const DEFAULT_DAYS_BACK: u32 = 7;
const MAX_PAGES: usize = 200;

#[derive(Debug, Deserialize)]
struct TodoistProject {
    id: String,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct TodoistDate {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    datetime: Option<String>,
}

impl TodoistDate {
    fn resolve(&self) -> Option<NaiveDateTime> {
        self.datetime
            .as_deref()
            .and_then(normalize_timestamp)
            .or_else(|| self.date.as_deref().and_then(normalize_timestamp))
    }
}

#[derive(Debug, Deserialize)]
struct TodoistTask {
    #[serde(alias = "task_id")]
    id: String,
    content: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    priority: Option<u8>,
    #[serde(default)]
    due: Option<TodoistDate>,
    #[serde(default)]
    deadline: Option<TodoistDate>,
    #[serde(default)]
    completed_at: Option<String>,
    #[serde(default, alias = "created_at")]
    added_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

/// Tasks from the Todoist REST API: all active tasks plus those completed in the look-back window.
pub struct TodoistAdapter {
    client: reqwest::blocking::Client,
    base_url: String,
    token: String,
    days_back: u32,
}

impl TodoistAdapter {
    pub fn new(client: reqwest::blocking::Client, base_url: &str, token: &str, days_back: u32) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            days_back,
        }
    }

    fn get_json(&self, path: &str, query: &[(&str, String)]) -> AppResult<Value> {
        let request = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .query(query);
        let body = get_text(SourceKind::Task, request)?;
        serde_json::from_str(&body)
            .map_err(|error| AppError::source_fetch(SourceKind::Task, format!("invalid JSON from {}: {}", path, error)))
    }

    /// Follows `next_cursor` until exhausted. Bare JSON arrays are treated as a single page.
    fn get_all_pages(&self, path: &str, items_key: &str, base_query: &[(&str, String)]) -> AppResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut query = base_query.to_vec();
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.clone()));
            }
            let page = self.get_json(path, &query)?;
            let (page_items, next) = split_page(page, items_key);
            items.extend(page_items);
            match next {
                Some(next) => cursor = Some(next),
                None => return Ok(items),
            }
        }
        tracing::warn!(path, pages = MAX_PAGES, "stopped following Todoist pagination");
        Ok(items)
    }
}

fn split_page(page: Value, items_key: &str) -> (Vec<Value>, Option<String>) {
    match page {
        Value::Array(items) => (items, None),
        Value::Object(mut object) => {
            let items = match object.remove(items_key) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            let next = object
                .get("next_cursor")
                .and_then(Value::as_str)
                .filter(|cursor| !cursor.is_empty())
                .map(ToString::to_string);
            (items, next)
        }
        _ => (Vec::new(), None),
    }
}

impl SourceAdapter for TodoistAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Task
    }

    fn fetch(&self) -> AppResult<SourceBatch> {
        let projects = self
            .get_all_pages("projects", "results", &[])?
            .into_iter()
            .filter_map(|value| match project_from_json(value) {
                Ok(project) => Some(project),
                Err(error) => {
                    tracing::warn!(error = %error, "skipping malformed Todoist project");
                    None
                }
            })
            .collect::<Vec<_>>();

        let active = self.get_all_pages("tasks", "results", &[])?;
        let until = Utc::now();
        let since = until - Duration::days(i64::from(self.days_back));
        let completed = self.get_all_pages(
            "tasks/completed/by_completion_date",
            "items",
            &[
                ("since", since.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
                ("until", until.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            ],
        )?;

        let tasks = convert_tasks(active.into_iter().chain(completed), &projects);
        tracing::info!(
            tasks = tasks.len(),
            projects = projects.len(),
            days_back = self.days_back,
            "fetched Todoist tasks"
        );
        Ok(SourceBatch::Tasks { tasks, projects })
    }
}

pub fn project_from_json(value: Value) -> AppResult<Project> {
    let project: TodoistProject = serde_json::from_value(value)?;
    Ok(Project {
        project_id: project.id,
        name: project.name,
    })
}

/// Converts raw tasks, skipping malformed ones and duplicate ids.
pub fn convert_tasks(raw: impl IntoIterator<Item = Value>, projects: &[Project]) -> Vec<TaskRecord> {
    let project_names: HashMap<&str, &str> = projects
        .iter()
        .map(|project| (project.project_id.as_str(), project.name.as_str()))
        .collect();
    let mut seen = BTreeSet::new();
    let mut tasks = Vec::new();
    for value in raw {
        match task_from_json(value, &project_names) {
            Ok(task) if seen.insert(task.task_id.clone()) => tasks.push(task),
            Ok(task) => tracing::debug!(task_id = %task.task_id, "skipping duplicate Todoist task"),
            Err(error) => tracing::warn!(error = %error, "skipping malformed Todoist task"),
        }
    }
    tasks
}

pub fn task_from_json(value: Value, project_names: &HashMap<&str, &str>) -> AppResult<TaskRecord> {
    let raw: TodoistTask = serde_json::from_value(value)?;
    let project_id = raw.project_id.unwrap_or_default();

    let mut tags: BTreeSet<String> = raw
        .labels
        .iter()
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .collect();
    if let Some(project_name) = project_names.get(project_id.as_str()) {
        tags.insert(project_name.to_string());
    }

    let mut task = TaskRecord {
        base: RecordBase::new(raw.content.clone(), tags, None),
        task_id: raw.id,
        content: raw.content,
        description: raw.description.filter(|text| !text.trim().is_empty()),
        project_id,
        parent_id: raw.parent_id,
        labels: raw.labels,
        priority: raw.priority.unwrap_or(1).clamp(1, 4),
        due: raw.due.as_ref().and_then(TodoistDate::resolve),
        deadline: raw.deadline.as_ref().and_then(TodoistDate::resolve),
        completed_at: raw.completed_at.as_deref().and_then(normalize_timestamp),
        created_at: raw.added_at.as_deref().and_then(normalize_timestamp),
        updated_at: raw.updated_at.as_deref().and_then(normalize_timestamp),
    };
    task.base.date = task.canonical_date();
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn projects() -> Vec<Project> {
        vec![Project {
            project_id: "p1".to_string(),
            name: "Inbox".to_string(),
        }]
    }

    #[test]
    fn task_tags_merge_labels_with_project_name() {
        let tasks = convert_tasks(
            [json!({
                "id": "t1",
                "content": "Call mom",
                "project_id": "p1",
                "labels": ["people", "Inbox"],
                "priority": 3
            })],
            &projects(),
        );
        assert_eq!(tasks.len(), 1);
        assert_eq!(
            tasks[0].base.tags,
            BTreeSet::from(["Inbox".to_string(), "people".to_string()])
        );
        assert_eq!(tasks[0].priority, 3);
        assert_eq!(tasks[0].base.name, "Call mom");
        assert_eq!(tasks[0].base.date, None);
    }

    #[test]
    fn canonical_date_prefers_completion_and_drops_offsets() {
        let tasks = convert_tasks(
            [json!({
                "id": "t2",
                "content": "File taxes",
                "project_id": "p1",
                "due": {"date": "2025-04-15"},
                "completed_at": "2025-04-10T18:30:00.000000Z",
                "updated_at": "2025-04-10T18:31:00Z"
            })],
            &projects(),
        );
        let task = &tasks[0];
        assert_eq!(task.due.map(|due| due.to_string()), Some("2025-04-15 00:00:00".to_string()));
        assert_eq!(task.completed_at.map(|at| at.to_string()), Some("2025-04-10 18:30:00".to_string()));
        assert_eq!(task.base.date, task.completed_at);
    }

    #[test]
    fn due_datetime_wins_over_due_date() {
        let tasks = convert_tasks(
            [json!({
                "id": "t3",
                "content": "Dentist",
                "due": {"date": "2025-05-01", "datetime": "2025-05-01T09:15:00"},
                "deadline": {"date": "2025-05-03"},
                "priority": 9
            })],
            &projects(),
        );
        assert_eq!(tasks[0].base.date.map(|at| at.to_string()), Some("2025-05-01 09:15:00".to_string()));
        assert!(tasks[0].deadline.is_some());
        assert_eq!(tasks[0].priority, 4);
        assert!(tasks[0].base.tags.is_empty());
    }

    #[test]
    fn malformed_and_duplicate_tasks_are_skipped() {
        let tasks = convert_tasks(
            [
                json!({"id": "t1", "content": "ok"}),
                json!({"content": "missing id"}),
                json!({"id": "t1", "content": "duplicate"}),
            ],
            &[],
        );
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].content, "ok");
    }

    #[test]
    fn pages_follow_cursor_or_accept_bare_arrays() {
        let (items, next) = split_page(json!({"results": [{"id": 1}], "next_cursor": "abc"}), "results");
        assert_eq!(items.len(), 1);
        assert_eq!(next.as_deref(), Some("abc"));

        let (items, next) = split_page(json!({"items": [], "next_cursor": null}), "items");
        assert!(items.is_empty());
        assert!(next.is_none());

        let (items, next) = split_page(json!([{"id": 1}, {"id": 2}]), "results");
        assert_eq!(items.len(), 2);
        assert!(next.is_none());
    }

    #[test]
    fn projects_parse_from_api_shape() {
        let project = project_from_json(json!({"id": "p9", "name": "Work", "color": "red"})).expect("project");
        assert_eq!(project.project_id, "p9");
        assert_eq!(project.name, "Work");
    }
}

use crate::models::{ArticleRecord, EventRecord, HealthRecord, HealthValue, NoteRecord, SourceKind, TaskRecord};
use crate::query::QueryResult;
use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use std::fmt::Write;

pub const NO_RESULTS: &str = "No results found for the given query.";

const TASK_LEGEND: &str = "Legend: Priority ranges from 4 (most urgent) to 1 (least urgent). \
Tags combine task labels and the project name.";
const ARTICLE_LEGEND: &str = "Legend: Read is true once the article has been archived.";

fn day(value: NaiveDateTime) -> String {
    value.format("%Y-%m-%d").to_string()
}

fn joined(tags: &BTreeSet<String>) -> String {
    tags.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn push_optional(out: &mut String, label: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|value| !value.trim().is_empty()) {
        let _ = write!(out, "\n{}: {}", label, value);
    }
}

pub fn render_notes(notes: &[NoteRecord]) -> String {
    let mut out = String::new();
    for note in notes {
        let _ = write!(out, "\n---\nNote: {}", note.base.name);
        if !note.base.tags.is_empty() {
            let _ = write!(out, "\nTags: {}", joined(&note.base.tags));
        }
        if let Some(date) = note.base.date {
            let _ = write!(out, "\nDate: {}", day(date));
        }
        let _ = write!(out, "\nContent: {}", note.body.trim_end());
    }
    out.push('\n');
    out
}

pub fn render_tasks(tasks: &[TaskRecord]) -> String {
    let mut out = String::from(TASK_LEGEND);
    out.push('\n');
    for (index, task) in tasks.iter().enumerate() {
        let _ = write!(out, "\n--- Task {} ---\nTask: {}\nPriority: {}", index + 1, task.content, task.priority);
        if !task.base.tags.is_empty() {
            let _ = write!(out, "\nTags: {}", joined(&task.base.tags));
        }
        push_optional(&mut out, "Description", task.description.as_deref());
        push_optional(&mut out, "Due", task.due.map(day).as_deref());
        push_optional(&mut out, "Deadline", task.deadline.map(day).as_deref());
        let completed = task.completed_at.map(day).unwrap_or_else(|| "no".to_string());
        let _ = write!(out, "\nCompleted: {}", completed);
        push_optional(&mut out, "Updated", task.updated_at.map(day).as_deref());
    }
    out.push('\n');
    out
}

pub fn render_articles(articles: &[ArticleRecord]) -> String {
    let mut out = String::from(ARTICLE_LEGEND);
    out.push('\n');
    for (index, article) in articles.iter().enumerate() {
        let _ = write!(out, "\n--- Article {} ---\nTitle: {}\nURL: {}", index + 1, article.title, article.url);
        if !article.base.tags.is_empty() {
            let _ = write!(out, "\nTags: {}", joined(&article.base.tags));
        }
        push_optional(&mut out, "Date", article.base.date.map(day).as_deref());
        push_optional(&mut out, "Selection", article.selection.as_deref());
        let _ = write!(out, "\nRead: {}", article.is_read);
    }
    out.push('\n');
    out
}

pub fn render_events(events: &[EventRecord]) -> String {
    let mut out = String::new();
    for event in events {
        let _ = write!(out, "\n---\nEvent: {}", event.base.name);
        push_optional(&mut out, "Calendar", event.calendar_name.as_deref());
        push_optional(&mut out, "Description", event.description.as_deref());
        push_optional(&mut out, "Location", event.location.as_deref());
        let _ = write!(
            out,
            "\nDate: {}\nStart Time: {}",
            day(event.start),
            event.start.format("%H:%M")
        );
        push_optional(
            &mut out,
            "End Time",
            event.end.map(|end| end.format("%H:%M").to_string()).as_deref(),
        );
        push_optional(&mut out, "Organizer", event.organizer.as_deref());
        push_optional(&mut out, "Status", event.status.as_deref());
    }
    out.push('\n');
    out
}

pub fn render_health(entries: &[HealthRecord]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str("---");
        if let Some(date) = entry.base.date {
            let _ = write!(out, "\nDate: {}", day(date));
        }
        for (key, value) in &entry.metrics {
            let _ = write!(out, "\n{}: {}", metric_label(key), metric_value(value));
        }
        out.push('\n');
    }
    out
}

/// `heart_rate__resting` becomes `Heart Rate - Resting`.
pub fn metric_label(key: &str) -> String {
    let spaced = key.replace("__", " - ").replace('_', " ");
    let mut label = String::with_capacity(spaced.len());
    let mut at_word_start = true;
    for ch in spaced.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                label.extend(ch.to_uppercase());
            } else {
                label.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            label.push(ch);
            at_word_start = true;
        }
    }
    label
}

fn metric_value(value: &HealthValue) -> String {
    match value {
        HealthValue::Int(number) => format!("{:.2}", *number as f64),
        HealthValue::Float(number) => format!("{:.2}", number),
        HealthValue::Text(text) => text.clone(),
    }
}

/// Renders every non-empty partition under its heading, in canonical source order.
pub fn render_prompt(query: &str, result: &QueryResult, now: NaiveDateTime) -> String {
    let mut out = format!("QUERY: \"{}\"\nCURRENT DATE: {}\n", query, now.format("%Y-%m-%d %H:%M:%S"));
    let blocks = [
        (SourceKind::Note, (!result.notes.is_empty()).then(|| render_notes(&result.notes))),
        (SourceKind::Task, (!result.tasks.is_empty()).then(|| render_tasks(&result.tasks))),
        (SourceKind::Article, (!result.articles.is_empty()).then(|| render_articles(&result.articles))),
        (SourceKind::Event, (!result.events.is_empty()).then(|| render_events(&result.events))),
        (SourceKind::Health, (!result.health.is_empty()).then(|| render_health(&result.health))),
    ];

    let mut rendered_any = false;
    for (kind, block) in blocks {
        if let Some(block) = block {
            let _ = write!(out, "\n*** {} ***\n{}", kind.heading(), block);
            rendered_any = true;
        }
    }
    if !rendered_any {
        let _ = write!(out, "\n{}\n", NO_RESULTS);
    }
    out
}

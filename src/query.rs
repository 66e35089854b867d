use crate::dates::{end_of_day, parse_date_expr};
use crate::errors::{AppError, AppResult};
use crate::models::{
    ArticleRecord, EventRecord, HealthRecord, NoteRecord, Record, SourceKind, TaskRecord,
};
use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::collections::BTreeSet;

pub const QUERY_PARAMETERS: [&str; 4] = ["source", "tag", "from", "to"];

/// Parsed constraints of a query string. `None` means "no constraint".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub sources: Option<BTreeSet<SourceKind>>,
    pub tags: Option<BTreeSet<String>>,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
}

impl QuerySpec {
    /// Parses `key:value` tokens separated by whitespace.
    ///
    /// Every problem found is reported at once in a single
    /// [`AppError::InvalidQuery`]. When a key repeats, the last occurrence wins.
    pub fn parse(input: &str, now: NaiveDateTime) -> AppResult<Self> {
        let mut problems = Vec::new();
        let mut raw_sources = None;
        let mut raw_tags = None;
        let mut raw_from = None;
        let mut raw_to = None;

        for token in input.split_whitespace() {
            let Some((key, value)) = token.split_once(':') else {
                problems.push(format!(
                    "unrecognized part '{}': every part must look like parameter:value",
                    token
                ));
                continue;
            };
            match key {
                "source" => raw_sources = Some(value),
                "tag" => raw_tags = Some(value),
                "from" => raw_from = Some(value),
                "to" => raw_to = Some(value),
                _ => problems.push(format!(
                    "unknown parameter '{}' in '{}'; valid parameters are: {}",
                    key,
                    token,
                    QUERY_PARAMETERS.join(", ")
                )),
            }
        }

        let mut spec = Self::default();

        if let Some(value) = raw_sources {
            let names = split_list(value);
            if names.is_empty() {
                problems.push("source requires at least one value".to_string());
            }
            let mut sources = BTreeSet::new();
            for name in names {
                match SourceKind::parse(&name) {
                    Some(kind) => {
                        sources.insert(kind);
                    }
                    None => problems.push(format!(
                        "unknown source '{}'; source must be one of: {}",
                        name,
                        SourceKind::allowed_names()
                    )),
                }
            }
            spec.sources = Some(sources);
        }

        if let Some(value) = raw_tags {
            let tags = split_list(value);
            if tags.is_empty() {
                problems.push("tag requires at least one value".to_string());
            }
            spec.tags = Some(tags.into_iter().collect());
        }

        if let Some(value) = raw_from {
            match parse_date_expr(value, now) {
                Ok(from) => spec.from = Some(from),
                Err(error) => problems.push(format!("from: {}", parse_message(error))),
            }
        }

        if let Some(value) = raw_to {
            match parse_date_expr(value, now) {
                Ok(to) => spec.to = Some(end_of_day(to)),
                Err(error) => problems.push(format!("to: {}", parse_message(error))),
            }
        }

        if let (Some(from), Some(to)) = (spec.from, spec.to) {
            if from > to {
                problems.push(format!(
                    "from ({}) must be before or equal to to ({})",
                    from.format("%Y-%m-%d"),
                    to.format("%Y-%m-%d")
                ));
            }
        }

        if !problems.is_empty() {
            return Err(AppError::InvalidQuery(problems));
        }
        Ok(spec)
    }

    pub fn is_unconstrained(&self) -> bool {
        self.sources.is_none() && self.tags.is_none() && self.from.is_none() && self.to.is_none()
    }

    /// One predicate per present constraint, in source, tag, from, to order.
    pub fn predicates(&self) -> Vec<Predicate> {
        let mut predicates = Vec::new();
        if let Some(sources) = &self.sources {
            predicates.push(Predicate::Source(sources.clone()));
        }
        if let Some(tags) = &self.tags {
            predicates.push(Predicate::AnyTag(tags.clone()));
        }
        if let Some(from) = self.from {
            predicates.push(Predicate::OnOrAfter(from));
        }
        if let Some(to) = self.to {
            predicates.push(Predicate::OnOrBefore(to));
        }
        predicates
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_message(error: AppError) -> String {
    match error {
        AppError::Parse(message) => message,
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Source(BTreeSet<SourceKind>),
    AnyTag(BTreeSet<String>),
    /// Undated records always pass the date bounds.
    OnOrAfter(NaiveDateTime),
    OnOrBefore(NaiveDateTime),
}

impl Predicate {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Source(sources) => sources.contains(&record.kind()),
            Self::AnyTag(tags) => record.tags().iter().any(|tag| tags.contains(tag)),
            Self::OnOrAfter(from) => record.date().map_or(true, |date| date >= *from),
            Self::OnOrBefore(to) => record.date().map_or(true, |date| date <= *to),
        }
    }
}

/// Dated records first, most recent first; undated records last.
pub fn compare_records(a: &Record, b: &Record) -> Ordering {
    match (a.date(), b.date()) {
        (Some(left), Some(right)) => right.cmp(&left),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Stable, so ties keep their cache order.
pub fn sort_records(records: &mut [Record]) {
    records.sort_by(compare_records);
}

/// Sorted query output split per source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub notes: Vec<NoteRecord>,
    pub tasks: Vec<TaskRecord>,
    pub articles: Vec<ArticleRecord>,
    pub events: Vec<EventRecord>,
    pub health: Vec<HealthRecord>,
}

impl QueryResult {
    pub fn partition(records: Vec<Record>) -> Self {
        let mut result = Self::default();
        for record in records {
            match record {
                Record::Note(note) => result.notes.push(note),
                Record::Task(task) => result.tasks.push(task),
                Record::Article(article) => result.articles.push(article),
                Record::Event(event) => result.events.push(event),
                Record::Health(entry) => result.health.push(entry),
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.notes.len() + self.tasks.len() + self.articles.len() + self.events.len() + self.health.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn filter_records(records: &[Record], spec: &QuerySpec) -> Vec<Record> {
    let predicates = spec.predicates();
    records
        .iter()
        .filter(|record| predicates.iter().all(|predicate| predicate.matches(record)))
        .cloned()
        .collect()
}

pub fn execute(records: &[Record], spec: &QuerySpec) -> QueryResult {
    let mut matched = filter_records(records, spec);
    sort_records(&mut matched);
    QueryResult::partition(matched)
}

use super::SourceAdapter;
use crate::errors::{AppError, AppResult};
use crate::models::{ArticleFolder, ArticleRecord, RecordBase, SourceBatch, SourceKind};
use chrono::{Local, NaiveDateTime, TimeZone};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

const UNTITLED: &str = "Untitled";

/// Row of the Instapaper CSV export.
#[derive(Debug, Deserialize)]
struct ExportRow {
    #[serde(rename = "URL")]
    url: String,
    #[serde(rename = "Title", default)]
    title: String,
    #[serde(rename = "Selection", default)]
    selection: Option<String>,
    #[serde(rename = "Folder", default)]
    folder: String,
    #[serde(rename = "Timestamp", default)]
    timestamp: String,
    #[serde(rename = "Tags", default)]
    tags: String,
}

/// Saved articles read from an Instapaper export: the CSV download or a JSON bookmark dump.
pub struct InstapaperExportAdapter {
    path: PathBuf,
}

impl InstapaperExportAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn collect(&self) -> AppResult<Vec<ArticleRecord>> {
        if !self.path.is_file() {
            return Err(AppError::source_fetch(
                SourceKind::Article,
                format!("export file not found: {}", self.path.display()),
            ));
        }
        let is_json = self
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let articles = if is_json {
            read_bookmark_dump(&self.path)?
        } else {
            read_csv_export(&self.path)?
        };
        tracing::info!(path = %self.path.display(), articles = articles.len(), "collected articles");
        Ok(articles)
    }
}

impl SourceAdapter for InstapaperExportAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Article
    }

    fn fetch(&self) -> AppResult<SourceBatch> {
        self.collect().map(SourceBatch::Articles)
    }
}

fn read_csv_export(path: &Path) -> AppResult<Vec<ArticleRecord>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut articles = Vec::new();
    for (index, row) in reader.deserialize::<ExportRow>().enumerate() {
        match row {
            Ok(row) => articles.push(article_from_row(row)),
            Err(error) => {
                tracing::warn!(path = %path.display(), row = index + 1, error = %error, "skipping malformed export row")
            }
        }
    }
    Ok(articles)
}

fn article_from_row(row: ExportRow) -> ArticleRecord {
    let saved_timestamp = row.timestamp.trim().parse::<i64>().unwrap_or(0);
    let folder = ArticleFolder::from_label(&row.folder);
    build_article(
        row.url.trim().to_string(),
        row.title,
        folder,
        saved_timestamp,
        parse_tag_field(&row.tags),
        row.selection,
    )
}

fn read_bookmark_dump(path: &Path) -> AppResult<Vec<ArticleRecord>> {
    let text = fs::read_to_string(path).map_err(|error| AppError::Io(error.to_string()))?;
    let items: Vec<Value> = serde_json::from_str(&text)
        .map_err(|error| AppError::source_fetch(SourceKind::Article, format!("invalid bookmark dump: {}", error)))?;
    let mut articles = Vec::new();
    for item in &items {
        if item.get("type").and_then(Value::as_str).is_some_and(|kind| kind != "bookmark") {
            continue;
        }
        match bookmark_to_article(item) {
            Ok(article) => articles.push(article),
            Err(error) => tracing::warn!(path = %path.display(), error = %error, "skipping malformed bookmark"),
        }
    }
    Ok(articles)
}

/// Converts one API bookmark object; `folder` defaults to unread when absent.
pub fn bookmark_to_article(item: &Value) -> AppResult<ArticleRecord> {
    let url = item
        .get("url")
        .and_then(Value::as_str)
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| AppError::Parse("bookmark has no url".to_string()))?;
    let title = item.get("title").and_then(Value::as_str).unwrap_or_default();
    let folder = item
        .get("folder")
        .and_then(Value::as_str)
        .map(ArticleFolder::from_label)
        .unwrap_or(ArticleFolder::Unread);
    let saved_timestamp = item.get("time").and_then(Value::as_i64).unwrap_or(0);
    let tags = item
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| tag_names(tags))
        .unwrap_or_default();
    let selection = item
        .get("description")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    Ok(build_article(
        url.to_string(),
        title.to_string(),
        folder,
        saved_timestamp,
        tags,
        selection,
    ))
}

fn build_article(
    url: String,
    title: String,
    folder: ArticleFolder,
    saved_timestamp: i64,
    tags: BTreeSet<String>,
    selection: Option<String>,
) -> ArticleRecord {
    let title = if title.trim().is_empty() {
        UNTITLED.to_string()
    } else {
        title.trim().to_string()
    };
    ArticleRecord {
        base: RecordBase::new(title.clone(), tags, saved_date(saved_timestamp)),
        url,
        title,
        folder,
        is_read: folder.is_read(),
        saved_timestamp,
        selection: selection.filter(|text| !text.trim().is_empty()),
    }
}

/// Unix seconds in local wall-clock time; zero and out-of-range values mean undated.
pub fn saved_date(timestamp: i64) -> Option<NaiveDateTime> {
    if timestamp <= 0 {
        return None;
    }
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|moment| moment.naive_local())
}

/// Tag cells are either a JSON list (`["a","b"]` or `[{"name":"a"}]`) or comma separated.
fn parse_tag_field(raw: &str) -> BTreeSet<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        if let Ok(items) = serde_json::from_str::<Vec<Value>>(trimmed) {
            return tag_names(&items);
        }
    }
    trimmed
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn tag_names(items: &[Value]) -> BTreeSet<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(name.trim().to_string()),
            Value::Object(object) => object.get("name").and_then(Value::as_str).map(|name| name.trim().to_string()),
            _ => None,
        })
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_export_rows_become_articles() {
        let root = tempfile::tempdir().expect("temp root");
        let path = root.path().join("instapaper-export.csv");
        fs::write(
            &path,
            "URL,Title,Selection,Folder,Timestamp,Tags\n\
https://a.example,Deep Work,,Archive,1700000000,\"[\"\"focus\"\",\"\"work\"\"]\"\n\
https://b.example,,quoted bit,Unread,0,reading\n",
        )
        .expect("write export");

        let articles = InstapaperExportAdapter::new(&path).collect().expect("collect");
        assert_eq!(articles.len(), 2);

        assert_eq!(articles[0].title, "Deep Work");
        assert!(articles[0].is_read);
        assert_eq!(articles[0].folder, ArticleFolder::Archive);
        assert!(articles[0].base.date.is_some());
        assert_eq!(
            articles[0].base.tags,
            BTreeSet::from(["focus".to_string(), "work".to_string()])
        );
        assert!(articles[0].selection.is_none());

        assert_eq!(articles[1].title, UNTITLED);
        assert!(!articles[1].is_read);
        assert_eq!(articles[1].base.date, None);
        assert_eq!(articles[1].selection.as_deref(), Some("quoted bit"));
    }

    #[test]
    fn bookmark_objects_convert_with_tag_names() {
        let article = bookmark_to_article(&json!({
            "type": "bookmark",
            "url": "https://c.example",
            "title": "Essay",
            "time": 0,
            "description": "highlight",
            "folder": "starred",
            "tags": [{"name": "ideas"}, {"name": " "}]
        }))
        .expect("bookmark");
        assert_eq!(article.folder, ArticleFolder::Starred);
        assert!(!article.is_read);
        assert_eq!(article.base.date, None);
        assert_eq!(article.base.tags, BTreeSet::from(["ideas".to_string()]));
        assert_eq!(article.selection.as_deref(), Some("highlight"));

        assert!(bookmark_to_article(&json!({"title": "no url"})).is_err());
    }

    #[test]
    fn json_dump_skips_non_bookmark_entries() {
        let root = tempfile::tempdir().expect("temp root");
        let path = root.path().join("bookmarks.json");
        fs::write(
            &path,
            r#"[{"type":"meta"},{"type":"user","user_id":1},{"type":"bookmark","url":"https://d.example","title":"D"},{"type":"bookmark"}]"#,
        )
        .expect("write dump");
        let articles = InstapaperExportAdapter::new(&path).collect().expect("collect");
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].url, "https://d.example");
    }

    #[test]
    fn comma_separated_tags_are_split() {
        assert_eq!(
            parse_tag_field(" a, b ,,c"),
            BTreeSet::from(["a".to_string(), "b".to_string(), "c".to_string()])
        );
        assert!(parse_tag_field("[]").is_empty());
    }

    #[test]
    fn missing_export_is_a_fetch_error() {
        let root = tempfile::tempdir().expect("temp root");
        let error = InstapaperExportAdapter::new(root.path().join("none.csv"))
            .fetch()
            .expect_err("missing export");
        assert!(matches!(error, AppError::SourceFetch { .. }));
    }
}

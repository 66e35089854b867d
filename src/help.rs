use crate::models::{Record, SourceKind};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::fs;
use std::path::Path;

pub const NO_DESCRIPTION: &str = "No description available";

/// Human descriptions of tags, keyed by source name then tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDescriptions {
    by_source: BTreeMap<String, BTreeMap<String, String>>,
}

impl TagDescriptions {
    pub fn new(by_source: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        Self { by_source }
    }

    /// A missing or malformed file yields no descriptions.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "tag descriptions unavailable");
                return Self::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(by_source) => Self { by_source },
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "skipping malformed tag descriptions file");
                Self::default()
            }
        }
    }

    pub fn describe(&self, kind: SourceKind, tag: &str) -> &str {
        [kind.as_str(), kind.legacy_name()]
            .iter()
            .filter_map(|name| self.by_source.get(*name))
            .find_map(|tags| tags.get(tag))
            .map(String::as_str)
            .unwrap_or(NO_DESCRIPTION)
    }
}

/// Tags of one source with their occurrence counts, most common first, ties by name.
pub fn tag_counts(records: &[Record], kind: SourceKind) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records.iter().filter(|record| record.kind() == kind) {
        for tag in record.tags() {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }
    let mut ranked = counts
        .into_iter()
        .map(|(tag, count)| (tag.to_string(), count))
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

fn source_summary(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Note => "Personal notes and knowledge base (Markdown vault)",
        SourceKind::Task => "Tasks and to-dos, active and recently completed",
        SourceKind::Article => "Saved articles and reading list",
        SourceKind::Event => "Scheduled calendar events and appointments",
        SourceKind::Health => "Daily health metrics and fitness data",
    }
}

pub fn query_help(records: &[Record], descriptions: &TagDescriptions) -> String {
    let present: BTreeSet<SourceKind> = records.iter().map(Record::kind).collect();
    let mut out = String::from(
        "# Everything2Prompt Query Language Guide\n\n\
## Overview\n\
Search across notes, tasks, saved articles, calendar events and health data with a \
small `parameter:value` syntax. Pick the most relevant sources and a tight date range; \
broad queries produce very long results.\n\n\
## Query Format\n\
```\n\
source:source1,source2 tag:tag1,tag2 from:DATE to:DATE\n\
```\n\n\
Meaning: items in the date range that come from (source1 or source2) AND carry (tag1 or tag2).\n\n\
## Available Sources\n",
    );

    if present.is_empty() {
        out.push_str("No data has been cached yet; refresh the cache first.\n");
    }
    for kind in &present {
        let _ = writeln!(out, "- `{}`: {}", kind, source_summary(*kind));
    }

    out.push_str("\n## Available Tags by Source\n");
    for kind in &present {
        let counts = tag_counts(records, *kind);
        if counts.is_empty() {
            match kind {
                SourceKind::Event | SourceKind::Health => {
                    let _ = writeln!(out, "**{}**: no tags ({} records are not tagged)\n", kind, kind);
                }
                _ => {
                    let _ = writeln!(out, "**{}**: no tags\n", kind);
                }
            }
            continue;
        }
        let _ = writeln!(out, "**{}**:", kind);
        for (tag, count) in counts {
            let _ = writeln!(out, "  - {}({}): {}", tag, count, descriptions.describe(*kind, &tag));
        }
        out.push('\n');
    }

    out.push_str(
        "Using the more common tags usually gives more relevant results.\n\n\
## Query Parameters\n\n\
### source\n\
Comma-separated list of sources: `note`, `task`, `article`, `event`, `health`.\n\
- `source:note` searches only notes\n\
- `source:task,event` searches tasks and calendar events\n\n\
### tag\n\
Comma-separated list of tags; an item matches when it has any of them.\n\
- `tag:health`\n\
- `tag:work,project`\n\n\
### from / to\n\
Inclusive date bounds. `to` covers the whole day it names.\n\
- Absolute: `from:2025-01-01`, `to:2025-12-31`\n\
- Relative: `[+|-]N` followed by `d` (days), `w` (weeks, 7 days), `m` (months, 30 days) \
or `y` (years, 365 days), e.g. `from:-7d`, `from:-1m`, `to:+2w`\n\
- `now` is the current date and time, e.g. `to:now`\n\n\
Every part of a query must be `parameter:value`; a bare word such as `birthday` is invalid.\n\n\
## Example Queries\n\
1. Health-related items: `tag:health`\n\
2. Work notes: `source:note tag:work`\n\
3. Tasks and events this year: `source:task,event from:2025-01-01 to:2025-12-31`\n\
4. Last week of everything: `from:-7d`\n\
5. Upcoming events: `source:event from:now to:+14d`\n\n\
## Tips\n\
- Parameters can appear in any order\n\
- Without `source`, all sources are searched; without `tag`, all tags match\n\
- Results are sorted by date, most recent first\n\
- Items without a date always pass date filters and appear at the end\n",
    );
    out
}

use super::{get_text, SourceAdapter};
use crate::errors::{AppError, AppResult};
use crate::models::{EventRecord, SourceBatch, SourceKind};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeMap;

/// Events from iCalendar feeds, keyed by a display name per calendar.
pub struct CalendarFeedAdapter {
    client: reqwest::blocking::Client,
    calendars: BTreeMap<String, String>,
}

impl CalendarFeedAdapter {
    pub fn new(client: reqwest::blocking::Client, calendars: BTreeMap<String, String>) -> Self {
        Self { client, calendars }
    }
}

impl SourceAdapter for CalendarFeedAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Event
    }

    fn fetch(&self) -> AppResult<SourceBatch> {
        if self.calendars.is_empty() {
            return Err(AppError::source_fetch(SourceKind::Event, "no calendar feeds configured"));
        }
        let mut events = Vec::new();
        let mut failures = Vec::new();
        for (name, url) in &self.calendars {
            match get_text(SourceKind::Event, self.client.get(feed_url(url))) {
                Ok(body) => {
                    let parsed = parse_calendar(&body, Some(name));
                    tracing::info!(calendar = %name, events = parsed.len(), "fetched calendar feed");
                    events.extend(parsed);
                }
                Err(error) => {
                    tracing::warn!(calendar = %name, error = %error, "skipping calendar feed");
                    failures.push(format!("{}: {}", name, error));
                }
            }
        }
        if failures.len() == self.calendars.len() {
            return Err(AppError::source_fetch(
                SourceKind::Event,
                format!("every calendar feed failed ({})", failures.join("; ")),
            ));
        }
        Ok(SourceBatch::Events(events))
    }
}

/// `webcal://` is plain HTTPS as far as fetching goes.
pub fn feed_url(url: &str) -> String {
    match url.strip_prefix("webcal://") {
        Some(rest) => format!("https://{}", rest),
        None => url.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Property {
    name: String,
    params: Vec<(String, String)>,
    value: String,
}

impl Property {
    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }
}

/// Joins folded continuation lines (those starting with a space or tab).
fn unfold_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(continuation) = line.strip_prefix(' ').or_else(|| line.strip_prefix('\t')) {
            if let Some(last) = lines.last_mut() {
                last.push_str(continuation);
                continue;
            }
        }
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}

fn parse_property(line: &str) -> Option<Property> {
    let mut in_quotes = false;
    let mut split_at = None;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                split_at = Some(index);
                break;
            }
            _ => {}
        }
    }
    let split_at = split_at?;
    let (head, value) = (&line[..split_at], &line[split_at + 1..]);
    let mut parts = head.split(';');
    let name = parts.next()?.trim().to_ascii_uppercase();
    if name.is_empty() {
        return None;
    }
    let params = parts
        .filter_map(|param| param.split_once('='))
        .map(|(key, value)| (key.trim().to_ascii_uppercase(), value.trim_matches('"').to_string()))
        .collect();
    Some(Property {
        name,
        params,
        value: value.to_string(),
    })
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// DATE (`20250101`) or DATE-TIME (`20250101T090000[Z]`); UTC and TZID offsets are not applied.
fn parse_ical_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim().trim_end_matches('Z');
    if value.len() == 8 {
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()
            .map(|date| date.and_time(NaiveTime::MIN));
    }
    NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()
}

/// Parses every VEVENT; events without a usable DTSTART are skipped with a warning.
pub fn parse_calendar(text: &str, calendar_name: Option<&str>) -> Vec<EventRecord> {
    let mut events = Vec::new();
    let mut current: Option<Vec<Property>> = None;
    let mut nested_depth = 0usize;

    for line in unfold_lines(text) {
        let Some(property) = parse_property(&line) else {
            continue;
        };
        let is_begin = property.name == "BEGIN";
        let is_end = property.name == "END";
        let component = property.value.trim().to_ascii_uppercase();

        let Some(properties) = current.as_mut() else {
            if is_begin && component == "VEVENT" {
                current = Some(Vec::new());
                nested_depth = 0;
            }
            continue;
        };
        if is_begin {
            nested_depth += 1;
        } else if is_end && nested_depth > 0 {
            nested_depth -= 1;
        } else if is_end && component == "VEVENT" {
            if let Some(finished) = current.take() {
                match build_event(&finished, calendar_name) {
                    Ok(event) => events.push(event),
                    Err(error) => tracing::warn!(error = %error, "skipping malformed calendar event"),
                }
            }
        } else if nested_depth == 0 {
            properties.push(property);
        }
    }
    events
}

fn build_event(properties: &[Property], calendar_name: Option<&str>) -> AppResult<EventRecord> {
    let find = |name: &str| properties.iter().find(|property| property.name == name);
    let text = |name: &str| {
        find(name)
            .map(|property| unescape_text(&property.value))
            .filter(|value| !value.trim().is_empty())
    };
    let timestamp = |name: &str| find(name).and_then(|property| parse_ical_datetime(&property.value));

    let uid = text("UID").unwrap_or_default();
    let start = timestamp("DTSTART")
        .ok_or_else(|| AppError::Parse(format!("event '{}' has no valid DTSTART", uid)))?;

    let mut event = EventRecord::new(uid, text("SUMMARY").unwrap_or_default(), start);
    event.description = text("DESCRIPTION");
    event.location = text("LOCATION");
    event.end = timestamp("DTEND");
    event.organizer = find("ORGANIZER").map(|property| match property.param("CN") {
        Some(common_name) => format!("{} ({})", common_name, property.value),
        None => property.value.clone(),
    });
    event.status = text("STATUS");
    event.created_at = timestamp("CREATED");
    event.last_modified = timestamp("LAST-MODIFIED");
    event.calendar_name = calendar_name.map(ToString::to_string);
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
UID:evt-1@example.com\r\n\
SUMMARY:Team sync\\, weekly\r\n\
DESCRIPTION:Agenda:\\n1. Status\r\n \\n2. Plans\r\n\
LOCATION:Room 4\r\n\
ORGANIZER;CN=\"Ada Lovelace\":mailto:ada@example.com\r\n\
STATUS:CONFIRMED\r\n\
DTSTART;TZID=Europe/Paris:20250110T093000\r\n\
DTEND;TZID=Europe/Paris:20250110T103000\r\n\
CREATED:20241201T120000Z\r\n\
BEGIN:VALARM\r\n\
DESCRIPTION:Reminder\r\n\
END:VALARM\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:holiday\r\n\
SUMMARY:Holiday\r\n\
DTSTART;VALUE=DATE:20250120\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:broken\r\n\
SUMMARY:No start\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn vevents_are_parsed_with_unfolding_and_unescaping() {
        let events = parse_calendar(FEED, Some("Work"));
        assert_eq!(events.len(), 2);

        let sync = &events[0];
        assert_eq!(sync.event_id, "evt-1@example.com");
        assert_eq!(sync.base.name, "Team sync, weekly");
        assert_eq!(sync.description.as_deref(), Some("Agenda:\n1. Status\n2. Plans"));
        assert_eq!(sync.location.as_deref(), Some("Room 4"));
        assert_eq!(sync.organizer.as_deref(), Some("Ada Lovelace (mailto:ada@example.com)"));
        assert_eq!(sync.status.as_deref(), Some("CONFIRMED"));
        assert_eq!(sync.start.to_string(), "2025-01-10 09:30:00");
        assert_eq!(sync.end.map(|end| end.to_string()), Some("2025-01-10 10:30:00".to_string()));
        assert_eq!(sync.created_at.map(|at| at.to_string()), Some("2024-12-01 12:00:00".to_string()));
        assert_eq!(sync.calendar_name.as_deref(), Some("Work"));
        assert_eq!(sync.base.date, Some(sync.start));
        assert!(sync.base.tags.is_empty());

        let holiday = &events[1];
        assert_eq!(holiday.start.to_string(), "2025-01-20 00:00:00");
        assert!(holiday.end.is_none());
    }

    #[test]
    fn quoted_colons_in_parameters_do_not_split_the_value() {
        let property = parse_property("ORGANIZER;CN=\"Dr: Who\":mailto:who@example.com").expect("property");
        assert_eq!(property.param("cn"), Some("Dr: Who"));
        assert_eq!(property.value, "mailto:who@example.com");
        assert!(parse_property("no separator here").is_none());
    }

    #[test]
    fn webcal_urls_are_fetched_over_https() {
        assert_eq!(feed_url("webcal://cal.example/feed.ics"), "https://cal.example/feed.ics");
        assert_eq!(feed_url("https://cal.example/feed.ics"), "https://cal.example/feed.ics");
    }

    #[test]
    fn empty_calendar_map_is_a_fetch_error() {
        let client = reqwest::blocking::Client::new();
        let error = CalendarFeedAdapter::new(client, BTreeMap::new())
            .fetch()
            .expect_err("nothing configured");
        assert!(matches!(error, AppError::SourceFetch { .. }));
    }
}

use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

static RELATIVE_OFFSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([+-]?)(\d+)([dwmy])$").expect("valid relative offset regex"));

pub const DATE_GRAMMAR_HINT: &str =
    "expected YYYY-MM-DD or a relative offset like '-7d', '+2w', '-1m', '-1y', or 'now'";

/// Resolves `now`, a relative offset (`[+-]N[dwmy]`) or an absolute `YYYY-MM-DD`.
///
/// Months count as 30 days and years as 365 days. An absolute date resolves to
/// midnight; `now` and relative offsets keep the time of day of `now`.
pub fn parse_date_expr(input: &str, now: NaiveDateTime) -> AppResult<NaiveDateTime> {
    let trimmed = input.trim();
    let lowered = trimmed.to_ascii_lowercase();
    if lowered == "now" {
        return Ok(now);
    }

    if let Some(captures) = RELATIVE_OFFSET.captures(&lowered) {
        let negative = &captures[1] == "-";
        let amount = captures[2].parse::<i64>().map_err(|_| overflow(trimmed))?;
        let days_per_unit = match &captures[3] {
            "d" => 1,
            "w" => 7,
            "m" => 30,
            _ => 365,
        };
        let days = amount.checked_mul(days_per_unit).ok_or_else(|| overflow(trimmed))?;
        let offset = Duration::try_days(days).ok_or_else(|| overflow(trimmed))?;
        let resolved = if negative {
            now.checked_sub_signed(offset)
        } else {
            now.checked_add_signed(offset)
        };
        return resolved.ok_or_else(|| overflow(trimmed));
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(|date| date.and_time(NaiveTime::MIN))
        .map_err(|_| AppError::Parse(format!("invalid date '{}': {}", trimmed, DATE_GRAMMAR_HINT)))
}

fn overflow(input: &str) -> AppError {
    AppError::Parse(format!("date offset '{}' is out of range", input))
}

/// Last representable microsecond of the same calendar day.
pub fn end_of_day(value: NaiveDateTime) -> NaiveDateTime {
    match NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999) {
        Some(last) => value.date().and_time(last),
        None => value,
    }
}

/// Normalizes source timestamps to naive wall-clock values.
///
/// Offsets are dropped rather than converted, so `2025-01-01T09:00:00+05:00`
/// becomes `2025-01-01T09:00:00`.
pub fn normalize_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN))
}

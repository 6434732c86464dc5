use chrono::{DateTime, Duration, DurationRound, SecondsFormat, Utc};
use uuid::Uuid;

/// Fixed-width UTC text, so SQLite string comparison matches time order.
pub(crate) fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Drops sub-microsecond precision, which neither store keeps.
pub(crate) fn truncate_micros(value: DateTime<Utc>) -> DateTime<Utc> {
    value
        .duration_trunc(Duration::microseconds(1))
        .unwrap_or(value)
}

/// Rounds up to the next whole microsecond, so a stored deadline never
/// falls before the requested one.
pub(crate) fn ceil_micros(value: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = truncate_micros(value);
    if truncated < value {
        truncated + Duration::microseconds(1)
    } else {
        truncated
    }
}

pub(crate) fn parse_datetime(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value.trim())?.with_timezone(&Utc))
}

pub(crate) fn parse_optional_datetime(
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    match value {
        Some(raw) if !raw.trim().is_empty() => Ok(Some(parse_datetime(raw)?)),
        _ => Ok(None),
    }
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn join_participants(values: &[String]) -> String {
    values.join("\n")
}

pub(crate) fn split_participants(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
        .collect()
}

/// `?{start}, ?{start + 1}, ...` for a SQLite `IN (...)` list.
pub(crate) fn numbered_placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|index| format!("?{}", index))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Keeps first occurrences, in order.
pub(crate) fn distinct_ids(ids: impl IntoIterator<Item = Uuid>) -> Vec<Uuid> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

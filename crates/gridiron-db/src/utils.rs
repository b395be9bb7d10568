//! Shared utility functions

use chrono::{DateTime, Utc};

/// Parse a datetime string (RFC3339 format) or return current time
///
/// Rows are always written with RFC3339 timestamps, so the fallback only
/// triggers on hand-edited databases.
pub fn parse_datetime_or_now(s: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse an optional RFC3339 column
pub fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        chrono::DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Normalize a display name into its natural-key form
///
/// Lowercases and collapses internal whitespace, so `"Kansas  City Chiefs "`
/// and `"kansas city chiefs"` address the same row.
///
/// # Examples
///
/// ```
/// use gridiron_db::utils::normalize_name;
///
/// assert_eq!(normalize_name("  Kansas  City\tChiefs "), "kansas city chiefs");
/// ```
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Treat blank strings as absent
pub fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

//! Pure field-normalization helpers shared by the provider adapters.
//!
//! Normalization never fails: missing optional fields become empty strings,
//! so downstream string assembly is always well-defined. Status vocabulary
//! is only lowercased here; mapping into the platform enumeration is the
//! engine's decision.

use chrono::{DateTime, TimeZone, Utc};

/// Collapse an optional provider field into a trimmed string, empty when
/// absent.
pub fn clean(value: Option<&str>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

/// Assemble a display name: an explicit full name wins, otherwise first and
/// last are joined with a single space.
pub fn full_name(explicit: &str, first: &str, last: &str) -> String {
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    match (first.is_empty(), last.is_empty()) {
        (false, false) => format!("{first} {last}"),
        (false, true) => first.to_string(),
        (true, false) => last.to_string(),
        (true, true) => String::new(),
    }
}

/// Lowercase a provider's native status string. The raw value is preserved
/// on the canonical lead; the allow-list mapping happens at merge time.
pub fn raw_status(value: Option<&str>) -> String {
    clean(value).to_ascii_lowercase()
}

/// Parse a provider timestamp: RFC 3339 first, then epoch milliseconds
/// (HubSpot's native representation). Unparseable input is dropped rather
/// than failing the record.
pub fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    value
        .parse::<i64>()
        .ok()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
}

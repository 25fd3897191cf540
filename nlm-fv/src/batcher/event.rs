//! Form view events and input normalization

use serde::Serialize;

/// Referrer recorded when the source is unknown
pub const DIRECT_REFERRER: &str = "direct";

/// Longest referrer kept verbatim; anything longer counts as direct
pub const MAX_REFERRER_LEN: usize = 2048;

/// A single "form viewed" notification waiting in the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewEvent {
    pub form_key: String,
    pub referrer: String,
    pub timestamp_millis: i64,
    pub user_agent: Option<String>,
}

/// Normalize a raw referrer
///
/// Absent, blank, oversized, or malformed values (embedded whitespace or
/// control characters) become [`DIRECT_REFERRER`].
pub fn normalize_referrer(raw: Option<&str>) -> String {
    let Some(trimmed) = raw.map(str::trim) else {
        return DIRECT_REFERRER.to_string();
    };

    let malformed = trimmed.is_empty()
        || trimmed.len() > MAX_REFERRER_LEN
        || trimmed.chars().any(|c| c.is_whitespace() || c.is_control());

    if malformed {
        DIRECT_REFERRER.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Trim a user agent, dropping blank values
pub fn normalize_user_agent(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|ua| !ua.is_empty())
        .map(str::to_string)
}

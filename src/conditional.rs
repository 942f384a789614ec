use crate::key::Validator;
use time::format_description::well_known::Rfc2822;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`
macro_rules! http_date_format {
    () => {
        time::macros::format_description!(
            "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
        )
    };
}

/// True iff the client's `If-None-Match` is byte-for-byte the computed validator.
///
/// No weak comparison and no list parsing: a client that sends `*` or several
/// tags simply misses and gets a full response.
pub fn is_not_modified(if_none_match: Option<&str>, validator: &Validator) -> bool {
    if_none_match.is_some_and(|tag| tag == validator.as_str())
}

/// `Last-Modified` value for a 304: the client's own `If-Modified-Since` is
/// echoed back untouched when present, otherwise `fallback` is formatted.
pub fn not_modified_since(if_modified_since: Option<&str>, fallback: OffsetDateTime) -> String {
    match if_modified_since {
        Some(since) if !since.trim().is_empty() => since.to_string(),
        _ => fmt_http_date(fallback),
    }
}

pub fn fmt_http_date(at: OffsetDateTime) -> String {
    at.to_offset(UtcOffset::UTC)
        .format(http_date_format!())
        .unwrap_or_default()
}

/// Parses an IMF-fixdate, falling back to RFC 2822 for origins that send a
/// numeric zone.
pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    PrimitiveDateTime::parse(value, http_date_format!())
        .map(PrimitiveDateTime::assume_utc)
        .or_else(|_| OffsetDateTime::parse(value, &Rfc2822))
        .ok()
}

use chrono::{DateTime, SecondsFormat, Utc};

/// Current instant as an ISO-8601 string in UTC.
#[inline]
pub fn timestamp_iso() -> String {
    to_iso(&Utc::now())
}

/// Formats an instant as ISO-8601, millisecond precision, UTC.
#[inline]
pub fn to_iso(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

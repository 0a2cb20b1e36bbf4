//! `xsd:dateTime` conversions for `Lifetime` elements

use std::convert::TryFrom;

use aliri_clock::UnixTime;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::error::ProtocolError;

/// Formats a time as an `xsd:dateTime` in UTC with millisecond precision
pub(crate) fn format_datetime(time: UnixTime) -> String {
    let secs = i64::try_from(time.0).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Reads an `xsd:dateTime`
///
/// Values without an offset are taken to be UTC. Fractional seconds are truncated.
pub(crate) fn parse_datetime(value: &str) -> Result<UnixTime, ProtocolError> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp())
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|dt| dt.and_utc().timestamp())
        })
        .ok()
        .and_then(|secs| u64::try_from(secs).ok())
        .map(UnixTime)
        .ok_or_else(|| ProtocolError::InvalidTimestamp {
            value: value.to_owned(),
        })
}

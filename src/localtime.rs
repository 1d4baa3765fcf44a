//! Date arithmetic anchored at the dashboard's regional offset.
//!
//! The business day runs on São Paulo time. The original data sources write
//! timezone-naive timestamps that mean −03:00, so all "today" and day-window
//! calculations use that fixed offset rather than the server's local zone.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Fixed −03:00 offset. DST was abolished in Brazil in 2019, so a fixed
/// offset is correct for current data.
pub fn sao_paulo_offset() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).expect("static offset")
}

/// Current calendar date in São Paulo, formatted YYYY-MM-DD.
pub fn today() -> String {
    Utc::now()
        .with_timezone(&sao_paulo_offset())
        .date_naive()
        .format("%Y-%m-%d")
        .to_string()
}

/// `[start, end)` instants covering the São Paulo calendar day.
/// Returns None for unparseable dates.
pub fn day_bounds(date: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let start = sao_paulo_offset()
        .from_local_datetime(&day.and_hms_opt(0, 0, 0)?)
        .single()?
        .with_timezone(&Utc);
    Some((start, start + Duration::days(1)))
}

/// Inclusive unix-second window `[00:00:00, 23:59:59]` of the São Paulo day,
/// used to filter WhatsApp message timestamps.
pub fn day_unix_window(date: &str) -> Option<(i64, i64)> {
    let (start, end) = day_bounds(date)?;
    Some((start.timestamp(), end.timestamp() - 1))
}

/// Parses an inbound message timestamp. RFC 3339 strings keep their own
/// offset; naive `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS` strings are
/// interpreted at −03:00.
pub fn parse_message_at(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            // Date-only values mean midnight local time
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    sao_paulo_offset()
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

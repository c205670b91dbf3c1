/// Types and utilities for manipulating timestamps.
///
/// Log records carry ISO-8601 stamps, `YYYY-MM-DDTHH:MM:SS[.fraction]`, followed by a zone that is
/// either embedded (`Z`, `+HH:MM`, `+HHMM`) or written as a separate token after the stamp, which
/// is what some syslog templates produce.  A stamp without any zone is not accepted: we would have
/// to guess the offset, and guessing wrong silently shifts every record.
use chrono::{
    DateTime, Days, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone, Utc,
};
use std::str::FromStr;

pub type Timestamp = DateTime<Utc>;

/// A parsed log stamp.  The offset the server wrote is kept so that the calendar date of a record
/// is the date the server saw.

pub type LogTimestamp = DateTime<FixedOffset>;

const LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

pub fn now() -> Timestamp {
    Utc::now()
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// The calendar date `days` days before `day`, or None if that is before the earliest date chrono
/// can represent.

pub fn days_before(day: NaiveDate, days: u32) -> Option<NaiveDate> {
    day.checked_sub_days(Days::new(days.into()))
}

/// The earliest instant still inside a window of `seconds` ending at `t`, or None if the window
/// reaches back past the earliest representable instant.

pub fn window_start(t: Timestamp, seconds: u64) -> Option<Timestamp> {
    let width = Duration::from_std(std::time::Duration::from_secs(seconds)).ok()?;
    t.checked_sub_signed(width)
}

/// Parse a stamp with an embedded zone.

pub fn parse_timestamp(token: &str) -> Option<LogTimestamp> {
    let (local, zone) = split_zone(token);
    attach_zone(local, parse_utc_offset(zone?)?)
}

/// Parse a stamp without an embedded zone, taking the zone from a separate token.  Returns None if
/// `token` already has a zone.

pub fn parse_timestamp_with_zone(token: &str, zone: &str) -> Option<LogTimestamp> {
    let (local, embedded) = split_zone(token);
    if embedded.is_some() {
        return None;
    }
    attach_zone(local, parse_utc_offset(zone)?)
}

/// Parse `Z`, `+HH:MM`, `-HH:MM`, `+HHMM` or `-HHMM`.

pub fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    if s == "Z" || s == "z" {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = if let Some(rest) = s.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = s.strip_prefix('-') {
        (-1, rest)
    } else {
        return None;
    };
    let (h, m) = if let Some((h, m)) = rest.split_once(':') {
        (h, m)
    } else if rest.len() == 4 {
        rest.split_at(2)
    } else {
        return None;
    };
    if h.len() != 2 || m.len() != 2 || !h.bytes().chain(m.bytes()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours = i32::from_str(h).ok()?;
    let minutes = i32::from_str(m).ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn attach_zone(local: &str, zone: FixedOffset) -> Option<LogTimestamp> {
    let t = NaiveDateTime::parse_from_str(local, LOCAL_FORMAT).ok()?;
    zone.from_local_datetime(&t).single()
}

// Split "2024-03-01T10:00:00.25+01:00" into the local part and the zone designator, if any.  The
// date part contains '-' too, so the sign is only looked for after the 'T'.
fn split_zone(s: &str) -> (&str, Option<&str>) {
    if let Some(local) = s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        return (local, Some("Z"));
    }
    if let Some(t) = s.find('T') {
        if let Some(p) = s[t..].rfind(|c: char| c == '+' || c == '-') {
            let at = t + p;
            return (&s[..at], Some(&s[at..]));
        }
    }
    (s, None)
}

#[cfg(test)]
fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> Timestamp {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

#[test]
fn test_parse_embedded_zone() {
    let t = parse_timestamp("2024-03-01T10:00:00Z").unwrap();
    assert!(t == utc(2024, 3, 1, 10, 0, 0));

    let t = parse_timestamp("2024-03-01T11:00:00+01:00").unwrap();
    assert!(t == utc(2024, 3, 1, 10, 0, 0));
    assert!(t.offset().local_minus_utc() == 3600);

    let t = parse_timestamp("2024-03-01T05:30:00-0430").unwrap();
    assert!(t == utc(2024, 3, 1, 10, 0, 0));

    let t = parse_timestamp("2024-03-01T10:00:00.123456+00:00").unwrap();
    assert!(t.timestamp_subsec_micros() == 123456);
}

#[test]
fn test_parse_separate_zone() {
    let t = parse_timestamp_with_zone("2024-03-01T12:00:00.5", "+02:00").unwrap();
    assert!(t.timestamp() == utc(2024, 3, 1, 10, 0, 0).timestamp());
    assert!(parse_timestamp_with_zone("2024-03-01T12:00:00+02:00", "+02:00").is_none());
    assert!(parse_timestamp_with_zone("2024-03-01T12:00:00", "haproxy[12]:").is_none());
}

#[test]
fn test_parse_rejects() {
    assert!(parse_timestamp("2024-03-01T10:00:00").is_none());
    assert!(parse_timestamp("Mar  1 10:00:00").is_none());
    assert!(parse_timestamp("2024-13-01T10:00:00Z").is_none());
    assert!(parse_timestamp("2024-03-01T10:00:00+1:00").is_none());
    assert!(parse_timestamp("").is_none());
    assert!(parse_utc_offset("+24:00").is_none());
    assert!(parse_utc_offset("0100").is_none());
}

#[test]
fn test_days_and_windows() {
    let d = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    assert!(days_before(d, 1) == NaiveDate::from_ymd_opt(2024, 2, 29));
    assert!(days_before(d, 0) == Some(d));
    assert!(window_start(utc(2024, 3, 1, 10, 0, 0), 60) == Some(utc(2024, 3, 1, 9, 59, 0)));
}

#[test]
fn test_days_and_windows_out_of_range() {
    let d = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    assert!(days_before(d, u32::MAX).is_none());
    assert!(days_before(NaiveDate::MIN, 1).is_none());

    let t = utc(2024, 3, 1, 10, 0, 0);
    assert!(window_start(t, 10_000_000_000_000).is_none());
    assert!(window_start(t, i64::MAX as u64).is_none());
    assert!(window_start(t, u64::MAX).is_none());
}

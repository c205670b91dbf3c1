/// Reading log files and selecting the lines that fall in a time window.
///
/// NOTE:
///
/// - A line whose timestamp can't be parsed is dropped silently.  Foreign lines (kernel messages
///   routed to the same file, a half-written last line) are expected, and they must never count as
///   "very old" or "very new".
///
/// - Log files are append-ordered, so keeping the input order keeps the output chronological.
///   Nothing here sorts.
use crate::{Result, StatsError};

use chrono::NaiveDate;
use rustutils::{
    parse_timestamp, parse_timestamp_with_zone, window_start, LogTimestamp, Timestamp,
};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

/// The timestamp of a log line, from its first token, or from its first token followed by a
/// separate zone token.

pub fn line_timestamp(line: &str) -> Option<LogTimestamp> {
    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;
    if let Some(t) = parse_timestamp(first) {
        return Some(t);
    }
    parse_timestamp_with_zone(first, tokens.next()?)
}

/// Keep the lines stamped at or after `now - window_seconds`.  The bound is inclusive and there is
/// no upper bound: a line from a clock slightly ahead of ours is still recent.  A window that
/// reaches back before any representable time keeps every stamped line.

pub fn filter_recent(lines: Vec<String>, window_seconds: u64, now: Timestamp) -> Vec<String> {
    let cutoff = window_start(now, window_seconds).map(|c| c.naive_utc());
    lines
        .into_iter()
        .filter(|l| match (line_timestamp(l), cutoff) {
            (Some(t), Some(cutoff)) => t.naive_utc() >= cutoff,
            (Some(_), None) => true,
            (None, _) => false,
        })
        .collect()
}

/// Keep the lines whose timestamp falls on `day`, reading the date in the offset the line was
/// written with.

pub fn filter_day(lines: Vec<String>, day: NaiveDate) -> Vec<String> {
    lines
        .into_iter()
        .filter(|l| match line_timestamp(l) {
            Some(t) => t.date_naive() == day,
            None => false,
        })
        .collect()
}

/// Read all the lines of a log file.  Invalid UTF-8 is replaced, not an error.

pub fn read_log(path: &str) -> Result<Vec<String>> {
    let mut file = File::open(path).map_err(|e| io_error(path, e))?;
    let mut bytes = vec![];
    file.read_to_end(&mut bytes).map_err(|e| io_error(path, e))?;
    Ok(split_lines(&String::from_utf8_lossy(&bytes)))
}

/// Read the lines in the last `max_bytes` of a log file.  If the read starts inside the file the
/// first (partial) line is dropped, and an unterminated last line is dropped too since the writer
/// may still be appending to it.

pub fn read_log_tail(path: &str, max_bytes: u64) -> Result<Vec<String>> {
    let mut file = File::open(path).map_err(|e| io_error(path, e))?;
    let len = file.metadata().map_err(|e| io_error(path, e))?.len();
    let start = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start))
        .map_err(|e| io_error(path, e))?;
    let mut bytes = vec![];
    file.take(len - start)
        .read_to_end(&mut bytes)
        .map_err(|e| io_error(path, e))?;

    let mut text = &bytes[..];
    if start > 0 {
        // If the byte before the read is a newline the first line is complete, but we can't tell
        // without another read, and one line more or less does not matter in a window.
        match text.iter().position(|b| *b == b'\n') {
            Some(p) => text = &text[p + 1..],
            None => return Ok(vec![]),
        }
    }
    match text.iter().rposition(|b| *b == b'\n') {
        Some(p) => text = &text[..p + 1],
        None => text = &[],
    }
    Ok(split_lines(&String::from_utf8_lossy(text)))
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.to_string())
        .collect()
}

fn io_error(path: &str, source: std::io::Error) -> StatsError {
    StatsError::Io {
        path: path.to_string(),
        source,
    }
}

#[cfg(test)]
fn at(s: &str) -> Timestamp {
    chrono::DateTime::parse_from_rfc3339(s)
        .unwrap()
        .with_timezone(&chrono::Utc)
}

#[cfg(test)]
fn lines(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|x| x.to_string()).collect()
}

#[test]
fn test_line_timestamp() {
    let t = line_timestamp("2024-03-01T10:00:00+01:00 web1 haproxy[77]: x").unwrap();
    assert!(t.naive_utc() == at("2024-03-01T09:00:00Z").naive_utc());
    let t = line_timestamp("2024-03-01T10:00:00.250 +01:00 web1 haproxy[77]: x").unwrap();
    assert!(t.naive_utc() == at("2024-03-01T09:00:00.25Z").naive_utc());
    assert!(line_timestamp("2024-03-01T10:00:00 web1 haproxy[77]: x").is_none());
    assert!(line_timestamp("Mar  1 10:00:00 web1 haproxy[77]: x").is_none());
    assert!(line_timestamp("").is_none());
}

#[test]
fn test_filter_recent() {
    let now = at("2024-03-01T10:01:00Z");
    let input = lines(&[
        "2024-03-01T09:59:59Z too old",
        "2024-03-01T10:00:00Z exactly on the boundary",
        "garbage line",
        "2024-03-01T11:00:30+01:00 inside, other zone",
        "2024-03-01T10:00:45 +00:00 inside, separate zone",
        "2024-03-01T10:00:50 inside, but no zone",
        "2024-03-01T10:05:00Z clock ahead",
    ]);
    let kept = filter_recent(input, 60, now);
    assert!(
        kept == lines(&[
            "2024-03-01T10:00:00Z exactly on the boundary",
            "2024-03-01T11:00:30+01:00 inside, other zone",
            "2024-03-01T10:00:45 +00:00 inside, separate zone",
            "2024-03-01T10:05:00Z clock ahead",
        ])
    );
}

#[test]
fn test_filter_recent_huge_window() {
    let now = at("2024-03-01T10:01:00Z");
    let input = lines(&[
        "1970-01-01T00:00:00Z epoch",
        "garbage line",
        "2024-03-01T10:00:00Z recent",
    ]);
    let kept = filter_recent(input, u64::MAX, now);
    assert!(kept == lines(&["1970-01-01T00:00:00Z epoch", "2024-03-01T10:00:00Z recent"]));
}

#[test]
fn test_filter_recent_empty() {
    let now = at("2024-03-01T10:01:00Z");
    assert!(filter_recent(vec![], 60, now).is_empty());
    assert!(filter_recent(lines(&["nothing", "to see"]), 60, now).is_empty());
}

#[test]
fn test_filter_day() {
    let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let input = lines(&[
        "2024-02-29T23:59:59+01:00 previous day",
        "2024-03-01T00:00:00+01:00 first second",
        "2024-03-01T23:30:00+01:00 late, but still the first of March locally",
        "2024-03-02T00:00:00+01:00 next day",
        "no stamp",
    ]);
    let kept = filter_day(input, day);
    assert!(kept.len() == 2);
    assert!(kept[0].ends_with("first second"));
    assert!(kept[1].ends_with("locally"));
}

#[test]
fn test_read_log_tail() {
    use std::io::Write;

    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(b"first line\nsecond line\nthird line\npartial").unwrap();
    f.flush().unwrap();
    let path = f.path().to_str().unwrap();

    let all = read_log_tail(path, 1 << 20).unwrap();
    assert!(all == lines(&["first line", "second line", "third line"]));

    // Starts inside "second line", so that line is dropped.
    let tail = read_log_tail(path, 27).unwrap();
    assert!(tail == lines(&["third line"]));

    let whole = read_log(path).unwrap();
    assert!(whole.len() == 4 && whole[3] == "partial");

    assert!(read_log("/no/such/file/anywhere.log").is_err());
}

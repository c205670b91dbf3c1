// Classify API clients by their User-Agent header.
//
// HAProxy logs captured request headers as `{value|value|...}` in the first brace block of a line,
// in the order of the `capture request header` directives.  Which position holds the User-Agent is
// a property of the proxy configuration, hence the capture index everywhere below.

use crate::{RunningStat, StatTable};

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use ustr::Ustr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UserAgentClass {
    Desktop,
    Cli,
    Web,
    Other,
}

impl UserAgentClass {
    pub const ALL: [UserAgentClass; 4] = [
        UserAgentClass::Desktop,
        UserAgentClass::Cli,
        UserAgentClass::Web,
        UserAgentClass::Other,
    ];

    /// The name used for the class in metric paths and database rows.

    pub fn name(&self) -> &'static str {
        match self {
            UserAgentClass::Desktop => "desktop",
            UserAgentClass::Cli => "cli",
            UserAgentClass::Web => "web",
            UserAgentClass::Other => "other",
        }
    }
}

fn desktop_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"unipept[\s_-]?desktop").unwrap())
}

fn cli_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"unipept[\s_-]cli").unwrap())
}

fn browser_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(chrome|chromium|crios|firefox|fxios|safari|opr|edg\w*)/").unwrap()
    })
}

/// Classify one User-Agent string.  The desktop application embeds a browser engine and so carries
/// browser signatures too, the order of the checks matters.

pub fn classify(user_agent: &str) -> UserAgentClass {
    let ua = user_agent.to_lowercase();
    if desktop_re().is_match(&ua) {
        UserAgentClass::Desktop
    } else if cli_re().is_match(&ua) {
        UserAgentClass::Cli
    } else if browser_re().is_match(&ua) {
        UserAgentClass::Web
    } else {
        UserAgentClass::Other
    }
}

/// The User-Agent from the first captured-header block of an HAProxy log line, or None if the line
/// has no such block or the block has fewer fields.

pub fn extract_user_agent(line: &str, capture_index: usize) -> Option<&str> {
    let start = line.find('{')? + 1;
    let len = line[start..].find('}')?;
    line[start..start + len].split('|').nth(capture_index)
}

/// Count identical User-Agent strings in the log lines.  Lines without one are ignored; an empty
/// captured value is a client that sent no header and is counted as such.  The result is sorted by
/// decreasing count, then by string.

pub fn tally_user_agents<S: AsRef<str>>(lines: &[S], capture_index: usize) -> Vec<(u64, String)> {
    let mut counts = HashMap::<&str, u64>::new();
    for l in lines {
        if let Some(ua) = extract_user_agent(l.as_ref(), capture_index) {
            *counts.entry(ua).or_default() += 1;
        }
    }
    let mut tally = counts
        .drain()
        .map(|(ua, n)| (n, ua.to_string()))
        .collect::<Vec<(u64, String)>>();
    tally.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    tally
}

/// Parse a "count text" line as written by `uniq -c`, leading blanks allowed.  The text is what
/// follows the single separator after the count and may be empty.

pub fn parse_counted_line(line: &str) -> Option<(u64, String)> {
    let line = line.trim_start();
    let digits = line.find(|c: char| !c.is_ascii_digit()).unwrap_or(line.len());
    if digits == 0 {
        return None;
    }
    let count = line[..digits].parse::<u64>().ok()?;
    let rest = &line[digits..];
    let text = match rest.chars().next() {
        None => "",
        Some(c) if c.is_whitespace() => &rest[c.len_utf8()..],
        Some(_) => return None,
    };
    Some((count, text.trim_end_matches(['\r', '\n']).to_string()))
}

pub fn classify_counts(pairs: &[(u64, String)]) -> HashMap<UserAgentClass, u64> {
    let mut counts = HashMap::new();
    for (n, ua) in pairs {
        *counts.entry(classify(ua)).or_default() += *n;
    }
    counts
}

/// Per-class request counts for a set of log lines, as a table keyed by class name.  Sources have
/// no error count and no latency, the request count is the total.

pub fn source_stats<S: AsRef<str>>(lines: &[S], capture_index: usize) -> StatTable {
    let tally = tally_user_agents(lines, capture_index);
    tracing::debug!(distinct = tally.len(), "tallied user agents");
    classify_counts(&tally)
        .into_iter()
        .map(|(class, n)| (Ustr::from(class.name()), RunningStat::new(n, 0, 0.0)))
        .collect()
}

#[test]
fn test_classify() {
    let desktop = "Mozilla/5.0 UnipeptDesktop/2.0.0 Chrome/110.0 Electron/23.0";
    assert!(classify(desktop) == UserAgentClass::Desktop);
    assert!(classify("unipept desktop 1.3") == UserAgentClass::Desktop);
    assert!(classify("unipept-cli/0.9") == UserAgentClass::Cli);
    assert!(classify("Unipept CLI - unipept 2.2.1") == UserAgentClass::Cli);
    let chrome = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/118.0.0.0 Safari/537.36";
    assert!(classify(chrome) == UserAgentClass::Web);
    assert!(classify("Mozilla/5.0 (Windows NT 10.0) Edg/118.0.2088.46") == UserAgentClass::Web);
    assert!(classify("Mozilla/5.0 Firefox/119.0") == UserAgentClass::Web);
    assert!(classify("curl/8.0") == UserAgentClass::Other);
    assert!(classify("python-requests/2.31.0") == UserAgentClass::Other);
    assert!(classify("") == UserAgentClass::Other);
}

#[test]
fn test_extract_user_agent() {
    let line = "2024-03-01T10:00:00+01:00 lb1 haproxy[77]: 10.0.0.1:5123 [01/Mar/2024:10:00:00.123] api~ api/selma 0/0/1/20/21 200 512 - - ---- 1/1/0/0/0 0/0 {api.unipept.ugent.be|unipept-cli/0.9} \"GET /api/v2/pept2prot.json HTTP/1.1\"";
    assert!(extract_user_agent(line, 1) == Some("unipept-cli/0.9"));
    assert!(extract_user_agent(line, 0) == Some("api.unipept.ugent.be"));
    assert!(extract_user_agent(line, 2).is_none());
    assert!(extract_user_agent("no captures here", 0).is_none());
    assert!(extract_user_agent("{unterminated", 0).is_none());
}

#[test]
fn test_tally_and_classify_counts() {
    let lines = [
        "x {h|curl/8.0} y",
        "x {h|unipept-cli/0.9} y",
        "x {h|curl/8.0} y",
        "x {h|Mozilla/5.0 Chrome/118.0} y",
        "no block",
    ];
    let tally = tally_user_agents(&lines, 1);
    assert!(tally[0] == (2, "curl/8.0".to_string()));
    assert!(tally.len() == 3);
    assert!(tally[1].1 < tally[2].1);

    let counts = classify_counts(&tally);
    assert!(counts.get(&UserAgentClass::Other) == Some(&2));
    assert!(counts.get(&UserAgentClass::Cli) == Some(&1));
    assert!(counts.get(&UserAgentClass::Web) == Some(&1));
    assert!(counts.get(&UserAgentClass::Desktop).is_none());

    let table = source_stats(&lines, 1);
    assert!(table.get(&Ustr::from("other")).unwrap().total_count == 2);
    assert!(table.get(&Ustr::from("web")).unwrap().total_count == 1);
}

#[test]
fn test_parse_counted_line() {
    assert!(parse_counted_line("     12 curl/8.0") == Some((12, "curl/8.0".to_string())));
    assert!(
        parse_counted_line("3 Mozilla/5.0 (X11; Linux)\n")
            == Some((3, "Mozilla/5.0 (X11; Linux)".to_string()))
    );
    assert!(parse_counted_line("      7 ") == Some((7, "".to_string())));
    assert!(parse_counted_line("5") == Some((5, "".to_string())));
    assert!(parse_counted_line("curl/8.0").is_none());
    assert!(parse_counted_line("12abc").is_none());
    assert!(parse_counted_line("").is_none());
}

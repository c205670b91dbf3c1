// The summarizer is an external tool that reads raw log lines and writes a table of per-key
// statistics.  In production that is HAProxy's `halog`, whose text format is a fixed contract: one
// header line, the data rows, and a status line ("N lines in, M lines out, K parsing errors") that
// halog writes on stderr after everything else.

use crate::{Result, StatsError};

pub trait Summarizer {
    /// Run the tool over `input` (log lines, newline-separated) and return its data rows.
    fn summarize(&self, input: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct HalogSummarizer {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_seconds: u64,
}

impl HalogSummarizer {
    pub fn new(program: &str, args: &[String], timeout_seconds: u64) -> HalogSummarizer {
        HalogSummarizer {
            program: program.to_string(),
            args: args.to_vec(),
            timeout_seconds,
        }
    }
}

impl Summarizer for HalogSummarizer {
    fn summarize(&self, input: &str) -> Result<Vec<String>> {
        tracing::debug!(
            program = %self.program,
            args = ?self.args,
            bytes = input.len(),
            "running summarizer"
        );
        let output =
            rustutils::run_with_input(&self.program, &self.args, input, self.timeout_seconds)
                .map_err(|e| StatsError::ToolExecution {
                    program: self.program.clone(),
                    reason: format!("{e:#}"),
                })?;
        Ok(strip_envelope(&output))
    }
}

/// Remove the header (first) and status (last) lines of summarizer output and return the rest.
/// Blank lines don't count.  Output with fewer than three lines has no data rows.

pub fn strip_envelope(output: &str) -> Vec<String> {
    let lines = output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<&str>>();
    if lines.len() < 3 {
        return vec![];
    }
    lines[1..lines.len() - 1]
        .iter()
        .map(|l| l.to_string())
        .collect()
}

/// A summarizer that ignores its input and returns a fixed output, envelope and all.

#[cfg(test)]
pub(crate) struct CannedSummarizer {
    pub output: String,
}

#[cfg(test)]
impl Summarizer for CannedSummarizer {
    fn summarize(&self, _input: &str) -> Result<Vec<String>> {
        Ok(strip_envelope(&self.output))
    }
}

#[test]
fn test_strip_envelope() {
    let out = "#req err ttot tavg oktot okavg bavg btot url\n\
               1 0 2 2 2 2 0 0 /a\n\
               \n\
               3 1 9 3 6 3 0 0 /b\n\
               4 lines in, 2 lines out, 0 parsing errors\n";
    assert!(strip_envelope(out) == vec!["1 0 2 2 2 2 0 0 /a", "3 1 9 3 6 3 0 0 /b"]);
    assert!(strip_envelope("#header\n0 lines in, 0 lines out, 0 parsing errors\n").is_empty());
    assert!(strip_envelope("").is_empty());
    assert!(strip_envelope("#header\nrow\n").is_empty());
}

#[test]
fn test_halog_summarizer() {
    // `cat` stands in for halog: the envelope is in the input and comes back out.
    let s = HalogSummarizer::new("cat", &[], 10);
    let rows = s.summarize("#hdr\nrow 1\nrow 2\nstatus\n").unwrap();
    assert!(rows == vec!["row 1", "row 2"]);

    let s = HalogSummarizer::new("false", &[], 10);
    assert!(matches!(
        s.summarize("x\n"),
        Err(StatsError::ToolExecution { .. })
    ));

    let s = HalogSummarizer::new("/no/such/halog", &["-srv".to_string()], 10);
    match s.summarize("x\n") {
        Err(StatsError::ToolExecution { program, .. }) => assert!(program == "/no/such/halog"),
        _ => panic!("expected a tool failure"),
    }
}

#[test]
fn test_canned_summarizer() {
    let s = CannedSummarizer {
        output: "#h\nr\ns\n".to_string(),
    };
    assert!(s.summarize("anything").unwrap() == vec!["r"]);
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StatsError>;

/// Failures of one collection cycle.
///
/// `Parse` is recovered where it arises: the offending row or line is skipped and the batch goes
/// on.  `ToolExecution` and `SinkConnection` abort the cycle.  `SinkWrite` is best-effort for the
/// Graphite sink and fatal for the replace-day sink, the caller decides.

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("summarizer {program} failed: {reason}")]
    ToolExecution { program: String, reason: String },

    #[error("unparsable {what}: {text:?}")]
    Parse { what: &'static str, text: String },

    #[error("cannot connect to {target}: {reason}")]
    SinkConnection { target: String, reason: String },

    #[error("writing to {target} failed: {reason}")]
    SinkWrite { target: String, reason: String },

    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StatsError {
    pub(crate) fn parse(what: &'static str, text: &str) -> StatsError {
        StatsError::Parse {
            what,
            text: text.to_string(),
        }
    }
}

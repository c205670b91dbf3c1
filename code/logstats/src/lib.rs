/// An API log is an HAProxy log: one line per request, starting with a timestamp, with the backend
/// and server that handled the request, its timings and status, the captured request headers, and
/// the request line.  The log is a single file that the proxy appends to.
///
/// This library computes request statistics over a part of the log, grouped in three ways: by the
/// node that served the request, by the API endpoint requested, and by the kind of client (from
/// its User-Agent).  For each group it computes the number of requests, the number that failed, and
/// the average response time.
///
/// The work breaks down into a number of subtasks:
///
/// - Read the log, or its tail, and select the lines in a time window or on a calendar day.
///
/// - Run the summarizer (halog) on the selected lines and parse its table of partial statistics.
///
/// - Derive a group key for every row and fold the rows that share a key into one statistic.
///
/// - Deliver the statistics to Graphite as a snapshot, or to the database as a day's rows.
///
/// All the state of a run is in the values passed between these steps; nothing persists across runs
/// except in the sinks.
mod columns;
mod daysink;
mod error;
mod graphite;
mod keys;
mod reports;
mod summarizer;
mod useragent;
mod window;

// Errors, and the result type used throughout.

pub use error::Result;
pub use error::StatsError;

// Timestamp of a log line, from its first one or two tokens.

pub use window::line_timestamp;

// Select the log lines within a window ending now, or on a calendar day.

pub use window::filter_day;
pub use window::filter_recent;

// Read a log file, or its last part.

pub use window::read_log;
pub use window::read_log_tail;

// Raw key field -> group key.

pub use keys::last_segment;
pub use keys::EndpointNormalizer;
pub use keys::KeyTransform;

// Substring filter on group keys, empty means "all".

pub use keys::KeyFilter;

// Running count/error/weighted-average statistic, and a table of them by key.

pub use columns::RunningStat;
pub use columns::StatTable;

// Describe and aggregate columnar summary rows.

pub use columns::aggregate;
pub use columns::parse_row;
pub use columns::AggregationSpec;
pub use columns::ColumnLayout;
pub use columns::Delimiter;

// Client classes and their detection from User-Agent strings.

pub use useragent::classify;
pub use useragent::classify_counts;
pub use useragent::extract_user_agent;
pub use useragent::parse_counted_line;
pub use useragent::tally_user_agents;
pub use useragent::UserAgentClass;

// Per-client-class request counts for a set of log lines.

pub use useragent::source_stats;

// The summarizer tool and its output.

pub use summarizer::strip_envelope;
pub use summarizer::HalogSummarizer;
pub use summarizer::Summarizer;

// Per-node and per-endpoint statistics, and the conversion of any report to sink rows.

pub use reports::dated_rows;
pub use reports::endpoint_stats;
pub use reports::metric_samples;
pub use reports::node_stats;
pub use reports::sanitize_component;
pub use reports::ReportKind;
pub use reports::ENDPOINT_LAYOUT;
pub use reports::NODE_LAYOUT;

// Graphite: samples, timestamped records, the protocol text, and delivery.

pub use graphite::publish;
pub use graphite::render_batch;
pub use graphite::stamp;
pub use graphite::MetricRecord;
pub use graphite::MetricSample;

// Database: one day's rows for a table, replaced as a whole.

pub use daysink::connect;
pub use daysink::replace_day;
pub use daysink::DatedRow;

// The database pool type, for callers that hold one.

pub use sqlx::AnyPool;

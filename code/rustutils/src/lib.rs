// Misc utilities useful to both logstats and apistats.

mod command;
mod configs;
mod dates;

// Configuration of the statistics tools.

pub use configs::StatsConfig;

// Read the configuration from a json file.

pub use configs::read_stats_config;

// Default values for the configuration.

pub use configs::DEFAULT_GRAPHITE_PORT;
pub use configs::DEFAULT_HALOG;
pub use configs::DEFAULT_HALOG_TIMEOUT;
pub use configs::DEFAULT_METRIC_PREFIX;

// Run a program on some input with a timeout and return its output.

pub use command::run_with_input;

// Types and utilities for manipulating timestamps.

pub use dates::LogTimestamp;
pub use dates::Timestamp;

// The time right now.

pub use dates::now;

// The local calendar date today, and some days before a date.

pub use dates::days_before;
pub use dates::today;

// The start of a time window that ends at a given time.

pub use dates::window_start;

// Parse log stamps, with an embedded zone or with the zone as a separate token.

pub use dates::parse_timestamp;
pub use dates::parse_timestamp_with_zone;

// Parse a zone designator into a fixed offset.

pub use dates::parse_utc_offset;

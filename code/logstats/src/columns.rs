/// Fold the rows of a columnar summary into one running statistic per key.
///
/// Input rows are the data lines of a summarizer's output (see summarizer.rs for how the header and
/// status lines are removed).  Each row is split on a fixed delimiter, and the fields at fixed
/// positions give the raw key, the request count, optionally the error count, and the average
/// response time of those requests.
///
/// Several rows can map to the same key: the same server in several backends, or the same endpoint
/// requested under different spellings.  They are folded with a count-weighted mean.  This assumes
/// the rows describe disjoint sets of requests.  A summarizer that reported cumulative counts for
/// a key on several rows would be double counted; halog does not, and nothing here checks for it.
///
/// A malformed row is skipped and the rest of the batch is aggregated as usual.
use crate::{KeyFilter, KeyTransform, Result, StatsError};

use std::collections::HashMap;
use std::str::FromStr;
use ustr::Ustr;

/// Running statistics for one key.
///
/// Invariants: `weighted_average` is the count-weighted mean of all averages folded into it, and
/// `error_count <= total_count`.

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStat {
    pub total_count: u64,
    pub error_count: u64,
    pub weighted_average: f64,
}

impl RunningStat {
    pub fn new(total_count: u64, error_count: u64, average: f64) -> RunningStat {
        let mut s = RunningStat::default();
        s.fold(total_count, error_count, average);
        s
    }

    /// Fold `count` more observations with mean `average`, `errors` of which were errors.

    pub fn fold(&mut self, count: u64, errors: u64, average: f64) {
        // Nothing observed, nothing changes.  Going through the formula would be a no-op in exact
        // arithmetic but can perturb the last bit of the average in floating point.
        if count == 0 {
            return;
        }
        let total = self.total_count + count;
        self.weighted_average = if self.total_count == 0 {
            average
        } else {
            (average * count as f64 + self.weighted_average * self.total_count as f64)
                / total as f64
        };
        self.total_count = total;
        self.error_count += errors;
    }

    pub fn merge(&mut self, other: &RunningStat) {
        self.fold(other.total_count, other.error_count, other.weighted_average)
    }

    pub fn success_count(&self) -> u64 {
        self.total_count - self.error_count
    }
}

/// The result of an aggregation.  The caller owns it; nothing is retained between calls.

pub type StatTable = HashMap<Ustr, RunningStat>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delimiter {
    /// Any run of whitespace.
    Whitespace,

    /// A single tab; empty fields are preserved.
    Tab,
}

/// Field positions (zero-based) in a summary row.

#[derive(Debug, Clone, Copy)]
pub struct ColumnLayout {
    pub key: usize,
    pub count: usize,
    pub errors: Option<usize>,
    pub average: usize,
}

#[derive(Debug, Clone)]
pub struct AggregationSpec {
    pub layout: ColumnLayout,
    pub delimiter: Delimiter,
    pub transform: KeyTransform,
    pub filter: KeyFilter,
}

/// Aggregate `rows` according to `spec`.  Rows that can't be parsed are skipped, as are rows whose
/// key is rejected by the filter.

pub fn aggregate<S: AsRef<str>>(rows: &[S], spec: &AggregationSpec) -> StatTable {
    let mut table = StatTable::new();
    let mut skipped = 0usize;
    let mut filtered = 0usize;
    for row in rows {
        match parse_row(row.as_ref(), spec) {
            Ok((key, stat)) => {
                if !spec.filter.accepts(&key) {
                    filtered += 1;
                    continue;
                }
                table
                    .entry(Ustr::from(&key))
                    .or_default()
                    .merge(&stat);
            }
            Err(e) => {
                tracing::debug!(error = %e, "skipping summary row");
                skipped += 1;
            }
        }
    }
    tracing::debug!(
        rows = rows.len(),
        keys = table.len(),
        skipped,
        filtered,
        "aggregated summary rows"
    );
    table
}

/// Extract the key and the statistics from one row.

pub fn parse_row(row: &str, spec: &AggregationSpec) -> Result<(String, RunningStat)> {
    let fields = split_row(row, spec.delimiter);
    let field = |ix: usize| fields.get(ix).copied().ok_or_else(|| StatsError::parse("row", row));

    let key = spec
        .transform
        .apply(field(spec.layout.key)?)
        .ok_or_else(|| StatsError::parse("key", row))?;
    let count = get_u64(field(spec.layout.count)?).ok_or_else(|| StatsError::parse("count", row))?;
    let errors = match spec.layout.errors {
        Some(ix) => get_u64(field(ix)?).ok_or_else(|| StatsError::parse("error count", row))?,
        None => 0,
    };
    if errors > count {
        return Err(StatsError::parse("error count", row));
    }
    let average = get_f64(field(spec.layout.average)?)
        .ok_or_else(|| StatsError::parse("average", row))?;
    Ok((key, RunningStat::new(count, errors, average)))
}

fn split_row(row: &str, delimiter: Delimiter) -> Vec<&str> {
    match delimiter {
        Delimiter::Whitespace => row.split_whitespace().collect(),
        Delimiter::Tab => row.trim_end_matches(['\r', '\n']).split('\t').collect(),
    }
}

fn get_u64(s: &str) -> Option<u64> {
    u64::from_str(s.trim()).ok()
}

fn get_f64(s: &str) -> Option<f64> {
    match f64::from_str(s.trim()) {
        Ok(n) if n.is_finite() => Some(n),
        _ => None,
    }
}

#[cfg(test)]
fn node_spec() -> AggregationSpec {
    AggregationSpec {
        layout: ColumnLayout {
            key: 0,
            count: 1,
            errors: Some(2),
            average: 3,
        },
        delimiter: Delimiter::Whitespace,
        transform: KeyTransform::LastSegment,
        filter: KeyFilter::new(),
    }
}

#[test]
fn test_fold_weighted() {
    let mut s = RunningStat::new(10, 1, 2.0);
    s.fold(10, 2, 4.0);
    assert!(s.total_count == 20);
    assert!(s.error_count == 3);
    assert!(s.weighted_average == 3.0);
    assert!(s.success_count() == 17);

    let mut s = RunningStat::new(30, 0, 1.0);
    s.fold(10, 0, 5.0);
    assert!(s.weighted_average == 2.0);
}

#[test]
fn test_fold_zero_count() {
    let mut s = RunningStat::new(3, 1, 0.1);
    let before = s;
    for x in [0.0, 7.5, 1e9, -3.0] {
        s.fold(0, 0, x);
        assert!(s == before);
    }

    let mut empty = RunningStat::default();
    empty.fold(0, 0, 42.0);
    assert!(empty == RunningStat::default());
}

#[test]
fn test_aggregate_folds_repeated_keys() {
    let rows = ["api/selma 10 0 2.0", "api_ssl/selma 10 1 4.0", "api/patty 5 0 7.0"];
    let table = aggregate(&rows, &node_spec());
    assert!(table.len() == 2);
    let selma = table.get(&Ustr::from("selma")).unwrap();
    assert!(selma.total_count == 20 && selma.error_count == 1 && selma.weighted_average == 3.0);
    let patty = table.get(&Ustr::from("patty")).unwrap();
    assert!(patty.total_count == 5 && patty.weighted_average == 7.0);
}

#[test]
fn test_aggregate_skips_bad_rows() {
    let rows = [
        "api/selma 10 0 2.0",
        "api/selma 10 0 fast",
        "api/selma ten 0 2.0",
        "api/selma 10 0 inf",
        "api/selma 10 0 NaN",
        "api/selma 3 4 1.0",
        "api/selma 10",
        "",
        "api/patty 4 1 1.5",
    ];
    let table = aggregate(&rows, &node_spec());
    assert!(table.len() == 2);
    let selma = table.get(&Ustr::from("selma")).unwrap();
    assert!(*selma == RunningStat::new(10, 0, 2.0));
    assert!(*table.get(&Ustr::from("patty")).unwrap() == RunningStat::new(4, 1, 1.5));
}

#[test]
fn test_aggregate_filter_and_tabs() {
    let mut spec = node_spec();
    spec.delimiter = Delimiter::Tab;
    spec.layout.errors = None;
    spec.filter = KeyFilter::from_fragments(&["selma".to_string()]);
    let rows = ["pool/selma\t4\t\t2.5", "pool/patty\t4\t\t2.5", "pool/selma 4 0 2.5"];
    let table = aggregate(&rows, &spec);
    assert!(table.len() == 1);
    assert!(*table.get(&Ustr::from("selma")).unwrap() == RunningStat::new(4, 0, 2.5));
}

#[test]
fn test_parse_row_errors() {
    let spec = node_spec();
    assert!(matches!(
        parse_row("api/selma 1 0 x", &spec),
        Err(StatsError::Parse { what: "average", .. })
    ));
    assert!(matches!(
        parse_row("api/ 1 0 1.0", &spec),
        Err(StatsError::Parse { what: "key", .. })
    ));
    assert!(parse_row("api/selma 1 0 1.0", &spec).is_ok());
}

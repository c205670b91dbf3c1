// The reports computed from an API log through a summarizer, per node and per endpoint, and the
// conversion of any report table (per client class too, see useragent.rs) to the output units of
// the two sinks.
//
// The halog layouts are fixed by the tool:
//
//   halog -srv: srv_name 1xx 2xx 3xx 4xx 5xx other tot_req req_ok pct_ok avg_ct avg_rt
//   halog -u:   req err ttot tavg oktot okavg bavg btot url

use crate::{
    aggregate, AggregationSpec, ColumnLayout, DatedRow, Delimiter, EndpointNormalizer, KeyFilter,
    KeyTransform, MetricSample, Result, StatTable, Summarizer,
};

use chrono::NaiveDate;

pub const NODE_LAYOUT: ColumnLayout = ColumnLayout {
    key: 0,
    count: 7,
    errors: Some(5),
    average: 11,
};

pub const ENDPOINT_LAYOUT: ColumnLayout = ColumnLayout {
    key: 8,
    count: 0,
    errors: Some(1),
    average: 3,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Nodes,
    Endpoints,
    Sources,
}

impl ReportKind {
    /// The database table the report is stored in.

    pub fn table(&self) -> &'static str {
        match self {
            ReportKind::Nodes => "node_stats",
            ReportKind::Endpoints => "endpoint_stats",
            ReportKind::Sources => "source_stats",
        }
    }

    /// The name of the table's key column.

    pub fn key_column(&self) -> &'static str {
        match self {
            ReportKind::Nodes => "node",
            ReportKind::Endpoints => "endpoint",
            ReportKind::Sources => "source",
        }
    }

    /// The metric path component under the prefix.

    pub fn metric_segment(&self) -> &'static str {
        match self {
            ReportKind::Nodes => "nodes",
            ReportKind::Endpoints => "endpoints",
            ReportKind::Sources => "sources",
        }
    }

    /// Sources carry only a request count.

    pub fn has_latency(&self) -> bool {
        *self != ReportKind::Sources
    }
}

/// Per-node statistics of the log text `input`, with servers named by node only.

pub fn node_stats(
    summarizer: &dyn Summarizer,
    input: &str,
    filter: &KeyFilter,
) -> Result<StatTable> {
    let rows = summarizer.summarize(input)?;
    let spec = AggregationSpec {
        layout: NODE_LAYOUT,
        delimiter: Delimiter::Whitespace,
        transform: KeyTransform::LastSegment,
        filter: filter.clone(),
    };
    Ok(aggregate(&rows, &spec))
}

/// Per-endpoint statistics of the log text `input`, with request URLs normalized to paths.

pub fn endpoint_stats(
    summarizer: &dyn Summarizer,
    input: &str,
    normalizer: &EndpointNormalizer,
    filter: &KeyFilter,
) -> Result<StatTable> {
    let rows = summarizer.summarize(input)?;
    let spec = AggregationSpec {
        layout: ENDPOINT_LAYOUT,
        delimiter: Delimiter::Whitespace,
        transform: KeyTransform::Endpoint(normalizer.clone()),
        filter: filter.clone(),
    };
    Ok(aggregate(&rows, &spec))
}

/// Graphite samples for a report table, sorted by path.  Nodes and endpoints get `requests`,
/// `errors` and `avg_response_time`, sources get `requests` only.

pub fn metric_samples(prefix: &str, kind: ReportKind, table: &StatTable) -> Vec<MetricSample> {
    let mut base = prefix
        .split('.')
        .map(sanitize_component)
        .filter(|c| !c.is_empty())
        .collect::<Vec<String>>();
    base.push(kind.metric_segment().to_string());
    let base = base.join(".");

    let mut samples = vec![];
    for (key, stat) in table {
        let key = sanitize_component(key);
        if key.is_empty() {
            continue;
        }
        samples.push(MetricSample::new(
            format!("{base}.{key}.requests"),
            stat.total_count as f64,
        ));
        if kind.has_latency() {
            samples.push(MetricSample::new(
                format!("{base}.{key}.errors"),
                stat.error_count as f64,
            ));
            samples.push(MetricSample::new(
                format!("{base}.{key}.avg_response_time"),
                stat.weighted_average,
            ));
        }
    }
    samples.sort_by(|a, b| a.path.cmp(&b.path));
    samples
}

/// Database rows for a report table, sorted by key.

pub fn dated_rows(date: NaiveDate, table: &StatTable) -> Vec<DatedRow> {
    let mut rows = table
        .iter()
        .map(|(key, stat)| DatedRow {
            date,
            group_key: key.to_string(),
            success_count: stat.success_count(),
            error_count: stat.error_count,
            avg_duration: stat.weighted_average,
        })
        .collect::<Vec<DatedRow>>();
    rows.sort_by(|a, b| a.group_key.cmp(&b.group_key));
    rows
}

/// Graphite path components are dot-separated, so a key must not contain dots, and the tree is
/// also a directory tree on the server.  Anything outside [A-Za-z0-9_-] becomes '_', and leading
/// and trailing '_' are dropped.

pub fn sanitize_component(s: &str) -> String {
    let s = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();
    s.trim_matches('_').to_string()
}

#[cfg(test)]
use crate::summarizer::CannedSummarizer;

#[cfg(test)]
fn canned(filename: &str) -> CannedSummarizer {
    CannedSummarizer {
        output: std::fs::read_to_string(format!("../tests/apistats/{filename}")).unwrap(),
    }
}

#[cfg(test)]
fn stat(table: &StatTable, key: &str) -> crate::RunningStat {
    *table.get(&ustr::Ustr::from(key)).unwrap()
}

#[test]
fn test_node_stats() {
    let s = canned("halog-srv.txt");
    let table = node_stats(&s, "", &KeyFilter::new()).unwrap();
    // bart's row has no usable average
    assert!(table.len() == 4);
    let selma = stat(&table, "selma");
    assert!(selma.total_count == 200);
    assert!(selma.error_count == 16);
    assert!(selma.weighted_average == 61.0);
    assert!(stat(&table, "patty").weighted_average == 15.0);
    assert!(stat(&table, "marge").total_count == 0);

    let filter = KeyFilter::from_fragments(&["selma".to_string(), "patty".to_string()]);
    let table = node_stats(&s, "", &filter).unwrap();
    assert!(table.len() == 2);
}

#[test]
fn test_endpoint_stats() {
    let s = canned("halog-u.txt");
    let normalizer = EndpointNormalizer::new(&["https://api.unipept.ugent.be".to_string()]);
    let filter = KeyFilter::from_fragments(&[
        "/api/v2/".to_string(),
        "/mpa/".to_string(),
        "/private_api/".to_string(),
    ]);
    let table = endpoint_stats(&s, "", &normalizer, &filter).unwrap();
    assert!(table.len() == 3);
    let p2p = stat(&table, "/api/v2/pept2prot.json");
    assert!(p2p.total_count == 150 && p2p.error_count == 2 && p2p.weighted_average == 40.0);
    assert!(stat(&table, "/mpa/pept2data").success_count() == 0);
    assert!(stat(&table, "/private_api/metadata").total_count == 7);
}

#[test]
fn test_metric_samples() {
    let s = canned("halog-srv.txt");
    let filter = KeyFilter::from_fragments(&["selma".to_string()]);
    let table = node_stats(&s, "", &filter).unwrap();
    let samples = metric_samples("unipept.api", ReportKind::Nodes, &table);
    let paths = samples.iter().map(|s| s.path.as_str()).collect::<Vec<&str>>();
    assert!(
        paths
            == vec![
                "unipept.api.nodes.selma.avg_response_time",
                "unipept.api.nodes.selma.errors",
                "unipept.api.nodes.selma.requests",
            ]
    );
    assert!(samples[0].value == 61.0);
    assert!(samples[2].value == 200.0);

    let mut sources = StatTable::new();
    sources.insert(ustr::Ustr::from("cli"), crate::RunningStat::new(9, 0, 0.0));
    let samples = metric_samples("api", ReportKind::Sources, &sources);
    assert!(samples.len() == 1);
    assert!(samples[0].path == "api.sources.cli.requests" && samples[0].value == 9.0);

    assert!(metric_samples("api", ReportKind::Nodes, &StatTable::new()).is_empty());
}

#[test]
fn test_sanitize_component() {
    assert!(sanitize_component("/api/v2/pept2prot.json") == "api_v2_pept2prot_json");
    assert!(sanitize_component("selma") == "selma");
    assert!(sanitize_component("stats-node_1") == "stats-node_1");
    assert!(sanitize_component("/") == "");
}

#[test]
fn test_dated_rows() {
    let s = canned("halog-srv.txt");
    let table = node_stats(&s, "", &KeyFilter::new()).unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let rows = dated_rows(date, &table);
    let keys = rows.iter().map(|r| r.group_key.as_str()).collect::<Vec<&str>>();
    assert!(keys == vec!["marge", "patty", "selma", "stats_node"]);
    assert!(rows[2].success_count == 184 && rows[2].error_count == 16);
    assert!(rows.iter().all(|r| r.date == date));
}

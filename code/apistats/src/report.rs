// Print one kind of statistics for the whole log, a window ending now, or a calendar day.
//
// Rows are sorted by decreasing request count, then by key, so the busiest nodes and endpoints
// come first.  For `sources` the errors and avg fields are always zero.

use crate::format::{self, Formatter, Formatters};
use crate::{compute_table, day_before_today, ReportCmdArgs};

use anyhow::Result;
use logstats::{filter_day, filter_recent, read_log, ReportKind, RunningStat, StatTable};
use rustutils::StatsConfig;
use std::collections::HashMap;
use std::io;

struct Item {
    key: String,
    stat: RunningStat,
}

pub fn report(
    output: &mut dyn io::Write,
    args: &ReportCmdArgs,
    config: &StatsConfig,
) -> Result<()> {
    let formatters = my_formatters();
    if format::maybe_help(output, &args.fmt, &formatters)? {
        return Ok(());
    }
    let spec = args.fmt.as_deref().unwrap_or(formatters.defaults);
    let (fields, opts) = format::parse_fields(spec, &formatters)?;

    let lines = read_log(&args.source_args.log_file)?;
    let lines = if let Some(window) = args.window {
        filter_recent(lines, window, rustutils::now())
    } else if let Some(offset) = args.day_offset {
        filter_day(lines, day_before_today(offset)?)
    } else {
        lines
    };
    tracing::debug!(lines = lines.len(), "selected log lines");

    let kind: ReportKind = args.kind.into();
    let table = if lines.is_empty() {
        StatTable::new()
    } else {
        compute_table(kind, config, &lines)?
    };
    format::format_data(output, &fields, &formatters, &opts, &sorted_items(table))
}

fn sorted_items(table: StatTable) -> Vec<Item> {
    let mut items = table
        .into_iter()
        .map(|(k, stat)| Item {
            key: k.to_string(),
            stat,
        })
        .collect::<Vec<Item>>();
    items.sort_by(|a, b| {
        b.stat
            .total_count
            .cmp(&a.stat.total_count)
            .then_with(|| a.key.cmp(&b.key))
    });
    items
}

fn my_formatters() -> Formatters<Item> {
    let mut fields: HashMap<&'static str, Formatter<Item>> = HashMap::new();
    fields.insert("key", format_key);
    fields.insert("requests", format_requests);
    fields.insert("errors", format_errors);
    fields.insert("avg", format_avg);

    let mut aliases = HashMap::new();
    aliases.insert("all", vec!["key", "requests", "errors", "avg"]);

    Formatters {
        fields,
        aliases,
        defaults: "all",
    }
}

fn format_key(d: &Item) -> String {
    d.key.clone()
}

fn format_requests(d: &Item) -> String {
    d.stat.total_count.to_string()
}

fn format_errors(d: &Item) -> String {
    d.stat.error_count.to_string()
}

fn format_avg(d: &Item) -> String {
    format!("{:.1}", d.stat.weighted_average)
}

#[test]
fn test_sorted_items() {
    let mut table = StatTable::new();
    table.insert(ustr::Ustr::from("patty"), RunningStat::new(52, 0, 15.0));
    table.insert(ustr::Ustr::from("selma"), RunningStat::new(200, 16, 61.0));
    table.insert(ustr::Ustr::from("marge"), RunningStat::new(52, 1, 2.0));
    let keys = sorted_items(table)
        .into_iter()
        .map(|i| i.key)
        .collect::<Vec<String>>();
    assert!(keys == vec!["selma", "marge", "patty"]);
}

#[test]
fn test_report_sources() {
    use std::io::Write;

    let mut f = tempfile::NamedTempFile::new().unwrap();
    for (t, ua) in [("00", "curl/8.0"), ("01", "curl/7.1"), ("02", "unipept-cli/0.9")] {
        writeln!(f, "2024-03-01T10:00:{t}Z lb haproxy[1]: {{h|{ua}}} x").unwrap();
    }
    f.flush().unwrap();

    let args = ReportCmdArgs {
        kind: crate::ReportArg::Sources,
        source_args: crate::SourceArgs {
            log_file: f.path().to_str().unwrap().to_string(),
        },
        window: None,
        day_offset: None,
        fmt: Some("key,requests,csv".to_string()),
        meta_args: crate::test_meta_args(),
    };
    let mut config = StatsConfig::default();
    config.user_agent_capture = 1;
    let mut out = vec![];
    report(&mut out, &args, &config).unwrap();
    assert!(String::from_utf8(out).unwrap() == "other,2\ncli,1\n");
}

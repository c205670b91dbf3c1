// Collect the statistics for one calendar day of the log and replace that day in the database.
//
// The three tables are written in three transactions.  If the second or third write fails the
// earlier tables have the new rows and the later ones the old, and re-running the day fixes that.

use crate::{compute_table, day_before_today, CollectCmdArgs};

use anyhow::{bail, Result};
use chrono::NaiveDate;
use logstats::{dated_rows, filter_day, read_log, DatedRow, ReportKind};
use rustutils::StatsConfig;
use std::io::{self, Write};

const KINDS: [ReportKind; 3] = [ReportKind::Endpoints, ReportKind::Nodes, ReportKind::Sources];

pub fn collect(args: &CollectCmdArgs, mut config: StatsConfig) -> Result<()> {
    if let Some(ref url) = args.database_url {
        config.database_url = Some(url.clone());
    }
    if !args.dry_run && config.database_url.is_none() {
        bail!("No database, use --database-url or the config file");
    }

    let day = day_before_today(args.day_offset)?;
    let lines = filter_day(read_log(&args.source_args.log_file)?, day);
    tracing::debug!(%day, lines = lines.len(), "selected log lines");
    if lines.is_empty() {
        // An empty day is much more likely a missing log than a day without traffic, and replacing
        // the day would wipe whatever was collected before.
        tracing::warn!("no log lines for {day}, nothing written");
        return Ok(());
    }

    let mut tables = vec![];
    for kind in KINDS {
        let table = compute_table(kind, &config, &lines)?;
        tables.push((kind, dated_rows(day, &table)));
    }

    if args.dry_run {
        return print_rows(&mut io::stdout(), &tables);
    }

    let url = config.database_url.as_deref().unwrap_or_default();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(write_day(url, day, &tables))
}

async fn write_day(
    url: &str,
    day: NaiveDate,
    tables: &[(ReportKind, Vec<DatedRow>)],
) -> Result<()> {
    let pool = logstats::connect(url).await?;
    for (kind, rows) in tables {
        logstats::replace_day(&pool, *kind, day, rows).await?;
    }
    pool.close().await;
    Ok(())
}

fn print_rows(output: &mut dyn Write, tables: &[(ReportKind, Vec<DatedRow>)]) -> Result<()> {
    for (kind, rows) in tables {
        for r in rows {
            if kind.has_latency() {
                writeln!(
                    output,
                    "{} {} {} {} {} {}",
                    kind.table(),
                    r.date,
                    r.group_key,
                    r.success_count,
                    r.error_count,
                    r.avg_duration
                )?;
            } else {
                writeln!(
                    output,
                    "{} {} {} {}",
                    kind.table(),
                    r.date,
                    r.group_key,
                    r.success_count + r.error_count
                )?;
            }
        }
    }
    Ok(())
}

#[test]
fn test_print_rows() {
    let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let row = |key: &str, ok, err, avg| DatedRow {
        date: day,
        group_key: key.to_string(),
        success_count: ok,
        error_count: err,
        avg_duration: avg,
    };
    let tables = vec![
        (ReportKind::Nodes, vec![row("selma", 184, 16, 61.0)]),
        (ReportKind::Sources, vec![row("cli", 7, 0, 0.0)]),
    ];
    let mut out = vec![];
    print_rows(&mut out, &tables).unwrap();
    assert!(
        String::from_utf8(out).unwrap()
            == "node_stats 2024-03-01 selma 184 16 61\nsource_stats 2024-03-01 cli 7\n"
    );
}

#[cfg(test)]
fn collect_args(log_file: &std::path::Path, url: &str) -> CollectCmdArgs {
    CollectCmdArgs {
        source_args: crate::SourceArgs {
            log_file: log_file.to_str().unwrap().to_string(),
        },
        day_offset: 1,
        database_url: Some(url.to_string()),
        dry_run: false,
        meta_args: crate::test_meta_args(),
    }
}

// A file database with the three tables, and its url.

#[cfg(test)]
fn test_database(dir: &tempfile::TempDir) -> String {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("stats.db").display());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let pool = logstats::connect(&url).await.unwrap();
        for ddl in [
            "CREATE TABLE node_stats (date TEXT, node TEXT, success_count INTEGER, \
             error_count INTEGER, avg_duration REAL)",
            "CREATE TABLE endpoint_stats (date TEXT, endpoint TEXT, success_count INTEGER, \
             error_count INTEGER, avg_duration REAL)",
            "CREATE TABLE source_stats (date TEXT, source TEXT, total INTEGER)",
        ] {
            sqlx::query(ddl).execute(&pool).await.unwrap();
        }
        pool.close().await;
    });
    url
}

#[cfg(test)]
fn count_rows(url: &str, query: &str) -> i64 {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let pool = logstats::connect(url).await.unwrap();
        let (n,) = sqlx::query_as::<_, (i64,)>(query)
            .fetch_one(&pool)
            .await
            .unwrap();
        pool.close().await;
        n
    })
}

#[test]
fn test_collect_writes_all_tables() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let url = test_database(&dir);
    let day = day_before_today(1).unwrap();
    let mut log = tempfile::NamedTempFile::new().unwrap();
    for (time, ua) in [("10:00:00", "curl/8.0"), ("10:00:01", "unipept-cli/2.0")] {
        writeln!(log, "{day}T{time}Z lb haproxy[1]: {{h|{ua}}} GET /mpa/pept2data").unwrap();
    }
    log.flush().unwrap();

    let config = crate::canned_halog_config();
    collect(&collect_args(log.path(), &url), config).unwrap();

    let on_day = |table: &str, cond: &str| {
        count_rows(
            &url,
            &format!("SELECT COUNT(*) FROM {table} WHERE date = '{day}' AND {cond}"),
        )
    };
    let selma = "node = 'selma' AND success_count = 184 AND error_count = 16";
    assert!(on_day("node_stats", selma) == 1);
    assert!(on_day("endpoint_stats", "endpoint = '/mpa/pept2data' AND error_count = 10") == 1);
    assert!(on_day("source_stats", "source = 'cli' AND total = 1") == 1);
    assert!(on_day("source_stats", "source = 'other' AND total = 1") == 1);

    // Running the day again replaces it.
    let before = count_rows(&url, "SELECT COUNT(*) FROM endpoint_stats");
    collect(&collect_args(log.path(), &url), crate::canned_halog_config()).unwrap();
    assert!(count_rows(&url, "SELECT COUNT(*) FROM endpoint_stats") == before);
}

#[test]
fn test_collect_empty_day() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let url = test_database(&dir);
    let mut log = tempfile::NamedTempFile::new().unwrap();
    writeln!(log, "2001-01-01T10:00:00Z lb haproxy[1]: {{h|curl/8.0}} GET /mpa/pept2data").unwrap();
    log.flush().unwrap();

    collect(&collect_args(log.path(), &url), crate::canned_halog_config()).unwrap();
    for table in ["node_stats", "endpoint_stats", "source_stats"] {
        assert!(count_rows(&url, &format!("SELECT COUNT(*) FROM {table}")) == 0);
    }
}

#[test]
fn test_collect_bad_offset() {
    let log = tempfile::NamedTempFile::new().unwrap();
    let mut args = collect_args(log.path(), "sqlite::memory:");
    args.day_offset = u32::MAX;
    assert!(collect(&args, crate::canned_halog_config()).is_err());
}

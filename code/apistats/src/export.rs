// Export the statistics of the last `--window` seconds of the log to Graphite.
//
// One run, one batch: all the samples are sent over one connection with one timestamp.  A window
// with no log lines sends nothing and is not an error, the scheduler will run us again.  A Graphite
// that can't be reached is an error, but a batch that is lost on the way is only a warning since
// the next run sends a new snapshot anyway.

use crate::{compute_table, ExportCmdArgs};

use anyhow::{bail, Result};
use logstats::{filter_recent, metric_samples, read_log, read_log_tail, ReportKind, StatsError};
use rustutils::StatsConfig;
use std::io::{self, Write};

pub fn export(args: &ExportCmdArgs, mut config: StatsConfig) -> Result<()> {
    if let Some(ref host) = args.graphite_host {
        config.graphite_host = Some(host.clone());
    }
    if let Some(port) = args.graphite_port {
        config.graphite_port = port;
    }
    if let Some(ref prefix) = args.prefix {
        config.metric_prefix = prefix.clone();
    }
    if !args.dry_run && config.graphite_host.is_none() {
        bail!("No Graphite host, use --graphite-host or the config file");
    }

    let log_file = &args.source_args.log_file;
    let lines = match args.tail_bytes {
        Some(n) => read_log_tail(log_file, n)?,
        None => read_log(log_file)?,
    };
    let now = rustutils::now();
    let read = lines.len();
    let lines = filter_recent(lines, args.window, now);
    tracing::debug!(read, recent = lines.len(), window = args.window, "selected log lines");
    if lines.is_empty() {
        tracing::info!("no log lines in the last {} seconds, nothing to export", args.window);
        return Ok(());
    }

    let mut samples = vec![];
    for kind in [ReportKind::Nodes, ReportKind::Endpoints, ReportKind::Sources] {
        let table = compute_table(kind, &config, &lines)?;
        samples.extend(metric_samples(&config.metric_prefix, kind, &table));
    }

    if args.dry_run {
        let mut out = io::stdout();
        out.write_all(logstats::render_batch(&samples, now).as_bytes())?;
        return Ok(());
    }

    let host = config.graphite_host.as_deref().unwrap_or_default();
    match logstats::publish(host, config.graphite_port, &samples) {
        Ok(_) => Ok(()),
        Err(e @ StatsError::SinkWrite { .. }) => {
            tracing::warn!("{e}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
fn export_args(log_file: &std::path::Path, port: u16) -> ExportCmdArgs {
    ExportCmdArgs {
        source_args: crate::SourceArgs {
            log_file: log_file.to_str().unwrap().to_string(),
        },
        window: 60,
        tail_bytes: None,
        graphite_host: Some("127.0.0.1".to_string()),
        graphite_port: Some(port),
        prefix: None,
        dry_run: false,
        meta_args: crate::test_meta_args(),
    }
}

#[cfg(test)]
fn log_file_at(stamp: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "{stamp} lb haproxy[1]: {{h|curl/8.0}} GET /api/v2/pept2prot.json").unwrap();
    writeln!(f, "{stamp} lb haproxy[1]: {{h|unipept-cli/2.0}} GET /mpa/pept2data").unwrap();
    f.flush().unwrap();
    f
}

#[cfg(test)]
fn recent_log_file() -> tempfile::NamedTempFile {
    log_file_at(&rustutils::now().format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

#[test]
fn test_export_publishes() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        use std::io::Read;
        let (mut conn, _) = listener.accept().unwrap();
        let mut received = String::new();
        conn.read_to_string(&mut received).unwrap();
        received
    });

    let log = recent_log_file();
    export(&export_args(log.path(), port), crate::canned_halog_config()).unwrap();
    let received = server.join().unwrap();
    assert!(received.contains("api.nodes.selma.requests 200 "));
    assert!(received.contains("api.sources.cli.requests 1 "));
    assert!(received.lines().all(|l| l.split(' ').count() == 3));
}

#[test]
fn test_export_lost_batch_is_not_an_error() {
    // The peer goes away without reading anything, so the batch is lost or reset.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (conn, _) = listener.accept().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));
        drop(conn);
    });

    let log = recent_log_file();
    assert!(export(&export_args(log.path(), port), crate::canned_halog_config()).is_ok());
    server.join().unwrap();
}

#[test]
fn test_export_unreachable_is_an_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let log = recent_log_file();
    assert!(export(&export_args(log.path(), port), crate::canned_halog_config()).is_err());
}

#[test]
fn test_export_empty_window() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let log = log_file_at("2024-03-01T10:00:00Z");
    export(&export_args(log.path(), port), crate::canned_halog_config()).unwrap();

    listener.set_nonblocking(true).unwrap();
    assert!(matches!(
        listener.accept(),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock
    ));
}

#[test]
fn test_export_needs_a_host() {
    let log = recent_log_file();
    let mut args = export_args(log.path(), 2003);
    args.graphite_host = None;
    assert!(export(&args, crate::canned_halog_config()).is_err());

    // A dry run prints instead, and needs no host.
    args.dry_run = true;
    assert!(export(&args, crate::canned_halog_config()).is_ok());
}

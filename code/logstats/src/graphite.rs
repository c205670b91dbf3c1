// Plaintext Carbon protocol: one `<dotted.path> <value> <unix-seconds>\n` line per metric over a
// TCP connection.  Carbon never answers, so the only acknowledgement we get is the peer closing its
// end after it has seen our end close.

use crate::{Result, StatsError};

use rustutils::Timestamp;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub path: String,
    pub value: f64,
}

impl MetricSample {
    pub fn new(path: String, value: f64) -> MetricSample {
        MetricSample { path, value }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub path: String,
    pub value: f64,
    pub timestamp: i64,
}

/// Give every sample the same timestamp.

pub fn stamp(samples: &[MetricSample], timestamp: Timestamp) -> Vec<MetricRecord> {
    let t = timestamp.timestamp();
    samples
        .iter()
        .map(|s| MetricRecord {
            path: s.path.clone(),
            value: s.value,
            timestamp: t,
        })
        .collect()
}

/// The protocol text for a batch of samples stamped with `timestamp`.

pub fn render_batch(samples: &[MetricSample], timestamp: Timestamp) -> String {
    let mut s = String::new();
    for r in stamp(samples, timestamp) {
        s += &format!("{} {} {}\n", r.path, r.value, r.timestamp);
    }
    s
}

/// Send the samples to the Carbon daemon at `host`:`port` in one batch, stamped with the current
/// time, and return the number sent.  An empty batch is not sent at all and no connection is made.

pub fn publish(host: &str, port: u16, samples: &[MetricSample]) -> Result<usize> {
    if samples.is_empty() {
        tracing::debug!("no metrics to publish");
        return Ok(0);
    }
    let target = format!("{host}:{port}");
    let mut stream = connect(&target)?;
    let batch = render_batch(samples, rustutils::now());

    let write_error = |e: std::io::Error| StatsError::SinkWrite {
        target: target.clone(),
        reason: e.to_string(),
    };
    stream.write_all(batch.as_bytes()).map_err(write_error)?;
    stream.flush().map_err(write_error)?;
    stream.shutdown(Shutdown::Write).map_err(write_error)?;

    // Wait for the close.  Anything the peer sends is ignored.
    stream
        .set_read_timeout(Some(CLOSE_TIMEOUT))
        .map_err(write_error)?;
    let mut sink = [0u8; 512];
    loop {
        match stream.read(&mut sink) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(write_error(e)),
        }
    }

    tracing::info!(sink = %target, metrics = samples.len(), "published metrics");
    Ok(samples.len())
}

fn connect(target: &str) -> Result<TcpStream> {
    let connection_error = |reason: String| StatsError::SinkConnection {
        target: target.to_string(),
        reason,
    };
    let addrs = target
        .to_socket_addrs()
        .map_err(|e| connection_error(e.to_string()))?;
    let mut last = "no addresses".to_string();
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(s) => return Ok(s),
            Err(e) => last = e.to_string(),
        }
    }
    Err(connection_error(last))
}

#[cfg(test)]
fn samples() -> Vec<MetricSample> {
    vec![
        MetricSample::new("api.nodes.selma.requests".to_string(), 200.0),
        MetricSample::new("api.nodes.selma.avg_response_time".to_string(), 61.5),
    ]
}

#[test]
fn test_render_batch() {
    let t = chrono::DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let text = render_batch(&samples(), t);
    assert!(
        text == "api.nodes.selma.requests 200 1709287200\n\
                 api.nodes.selma.avg_response_time 61.5 1709287200\n"
    );
    let records = stamp(&samples(), t);
    assert!(records.iter().all(|r| r.timestamp == 1709287200));
    assert!(render_batch(&[], t).is_empty());
}

#[test]
fn test_publish_empty() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    assert!(publish("127.0.0.1", port, &[]).unwrap() == 0);
    listener.set_nonblocking(true).unwrap();
    assert!(matches!(
        listener.accept(),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock
    ));

    // The host is not even looked up.
    assert!(publish("no.such.host.invalid", 2003, &[]).unwrap() == 0);
}

#[test]
fn test_publish() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        let mut received = String::new();
        conn.read_to_string(&mut received).unwrap();
        received
    });

    assert!(publish("127.0.0.1", port, &samples()).unwrap() == 2);
    let received = server.join().unwrap();
    let lines = received.lines().collect::<Vec<&str>>();
    assert!(lines.len() == 2);
    assert!(lines[0].starts_with("api.nodes.selma.requests 200 "));
    assert!(lines[1].starts_with("api.nodes.selma.avg_response_time 61.5 "));
    let t0 = lines[0].rsplit(' ').next().unwrap();
    let t1 = lines[1].rsplit(' ').next().unwrap();
    assert!(t0 == t1);
}

#[test]
fn test_publish_refused() {
    // Bind and drop to get a port that is very likely closed.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    assert!(matches!(
        publish("127.0.0.1", port, &samples()),
        Err(StatsError::SinkConnection { .. })
    ));
}

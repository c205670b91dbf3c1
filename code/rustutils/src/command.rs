// Execute a command with a timeout, feeding it input on stdin and collecting its output, with safe
// handling of the communication.

use anyhow::{bail, Result};
use std::io;
use std::time::Duration;
use subprocess::{Exec, ExitStatus, Redirection};

/// Run `program` with `args` (no shell), write `input` to its stdin, and return everything it wrote
/// to stdout and stderr, merged in the order written.  Fails if the program can't be started, does
/// not finish within `timeout_seconds`, or exits with a non-zero status.

pub fn run_with_input(
    program: &str,
    args: &[String],
    input: &str,
    timeout_seconds: u64,
) -> Result<String> {
    let mut p = match Exec::cmd(program)
        .args(args)
        .stdin(Redirection::Pipe)
        .stdout(Redirection::Pipe)
        .stderr(Redirection::Merge)
        .popen()
    {
        Ok(p) => p,
        Err(e) => {
            bail!("Could not start {program}: {e}");
        }
    };

    // There is a limited capacity in the pipes.  When the output pipe fills up the child stops, and
    // if we are still trying to write its input at that point we deadlock.  The communicator writes
    // the input and drains the output at the same time, and the time limit bounds how long we're
    // willing to wait for either.

    let mut comm = p
        .communicate_start(Some(input.as_bytes().to_vec()))
        .limit_time(Duration::new(timeout_seconds, 0));
    let mut output = "".to_string();
    let failure = loop {
        match comm.read_string() {
            Ok((Some(out), _)) => {
                if out.is_empty() {
                    // This is always EOF because timeouts are signaled as Err()
                    break None;
                }
                output += &out;
            }
            Ok((None, _)) => {
                break Some("no output pipe".to_string());
            }
            Err(e) => {
                if e.error.kind() == io::ErrorKind::TimedOut {
                    let _ = p.terminate();
                    break Some(format!("timed out after {timeout_seconds}s"));
                }
                break Some(e.error.to_string());
            }
        }
    };

    match p.wait() {
        Ok(ExitStatus::Exited(0)) => {
            if let Some(reason) = failure {
                bail!("{program} failed: {reason}")
            }
            Ok(output)
        }
        Ok(status) => {
            bail!("{program} failed: {status:?}: {}", first_line(&output))
        }
        Err(e) => {
            bail!("{program} failed: {e}")
        }
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

#[test]
fn test_run_with_input() {
    let out = run_with_input("cat", &[], "a b\nc d\n", 10).unwrap();
    assert!(out == "a b\nc d\n");

    let out = run_with_input("sort", &["-r".to_string()], "1\n3\n2\n", 10).unwrap();
    assert!(out == "3\n2\n1\n");
}

#[test]
fn test_run_with_input_failures() {
    assert!(run_with_input("no-such-program-anywhere", &[], "", 10).is_err());
    assert!(run_with_input("false", &[], "", 10).is_err());
    assert!(run_with_input("sleep", &["5".to_string()], "", 1).is_err());
}

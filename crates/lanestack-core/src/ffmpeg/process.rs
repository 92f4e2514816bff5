//! Bounded-wait subprocess execution
//!
//! std has no `wait_timeout`, so output is drained on helper threads while
//! the caller polls `try_wait` against a deadline and kills the child on
//! expiry. Poll granularity is 10ms.

use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Captured result of a finished (or killed) subprocess
#[derive(Debug)]
pub struct ProcessOutput {
    /// Exit code; `None` when the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// True when the deadline expired and the child was killed
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Combined output as lossy UTF-8, for error messages
    pub fn combined_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if !self.stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        text
    }
}

fn drain(mut reader: impl Read + Send + 'static) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> io::Result<(Option<i32>, bool)> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status.code(), false));
        }
        if Instant::now() >= deadline {
            log::warn!("subprocess exceeded {:?}, killing", timeout);
            let _ = child.kill();
            let _ = child.wait();
            return Ok((None, true));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Run a command to completion with a deadline, capturing stdout and stderr
///
/// Blocking; callers run it off the coordinating thread. On timeout the
/// child is killed and `timed_out` is set.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> io::Result<ProcessOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Drain concurrently so a chatty child can't fill a pipe and stall
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let (exit_code, timed_out) = wait_with_deadline(&mut child, timeout)?;

    // Pipes close once the child is gone, so these joins return promptly
    let stdout = stdout.map(|h| h.join().unwrap_or_default()).unwrap_or_default();
    let stderr = stderr.map(|h| h.join().unwrap_or_default()).unwrap_or_default();

    Ok(ProcessOutput {
        exit_code,
        stdout,
        stderr,
        timed_out,
    })
}

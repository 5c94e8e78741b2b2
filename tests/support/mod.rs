//! Shared plumbing for the scenario tests in this directory: spawning the
//! multiplexer and the `usrv` test helper as real child processes and
//! reading their output line-by-line without blocking the test thread
//! forever on a line that never arrives.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

/// A child's stdout, drained by a background thread so the test thread can
/// wait for a specific line with a timeout instead of risking a hang.
pub struct LineReader {
    rx: Receiver<String>,
}

impl LineReader {
    pub fn new(stdout: ChildStdout) -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if line.ends_with('\n') {
                            line.pop();
                            if line.ends_with('\r') {
                                line.pop();
                            }
                        }
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
        LineReader { rx }
    }

    /// Wait up to `timeout` for the next line, panicking with a clear
    /// message on timeout or stream close.
    pub fn next_line(&self, timeout: Duration) -> String {
        self.rx
            .recv_timeout(timeout)
            .unwrap_or_else(|e| panic!("no line within {timeout:?}: {e}"))
    }

    /// Wait up to `timeout` for a line equal to `expected`.
    pub fn expect_line(&self, expected: &str, timeout: Duration) {
        let got = self.next_line(timeout);
        assert_eq!(got, expected);
    }

    /// Read lines until one satisfies `pred`, or `timeout` elapses overall.
    pub fn wait_for(&self, timeout: Duration, mut pred: impl FnMut(&str) -> bool) -> String {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                panic!("condition not met within timeout");
            }
            let line = self.next_line(remaining);
            if pred(&line) {
                return line;
            }
        }
    }

    /// True if the stream closes (EOF) within `timeout` with no more lines.
    pub fn expect_eof(&self, timeout: Duration) {
        match self.rx.recv_timeout(timeout) {
            Err(mpsc::RecvTimeoutError::Disconnected) => {}
            Ok(line) => panic!("expected EOF, got line: {line:?}"),
            Err(mpsc::RecvTimeoutError::Timeout) => panic!("expected EOF within {timeout:?}"),
        }
    }
}

/// A running `chanmux` (or `usrv`) child plus convenience handles for its
/// framed stdio.
pub struct Proc {
    pub child: Child,
    pub stdin: ChildStdin,
    pub lines: LineReader,
}

impl Proc {
    /// Send one already-framed or raw line, appending the trailing `\n`.
    pub fn send(&mut self, line: &str) {
        write!(self.stdin, "{line}\n").expect("write to child stdin");
        self.stdin.flush().expect("flush child stdin");
    }

    /// Send a command line on the command channel: `<00< <text>\n`.
    pub fn send_cmd(&mut self, text: &str) {
        self.send(&format!("<00< {text}"));
    }

    /// Send a payload line on channel `id`: `<HH< <text>\n`.
    pub fn send_channel(&mut self, id: u8, text: &str) {
        self.send(&format!("<{id:02X}< {text}"));
    }

    /// Write `text` verbatim in a single `write(2)` call, with no implied
    /// framing or trailing newline -- used when a test needs several lines
    /// to land in the same read so the scheduler processes them in one
    /// pass (no `poll()` in between).
    pub fn send_raw(&mut self, text: &str) {
        write!(self.stdin, "{text}").expect("write to child stdin");
        self.stdin.flush().expect("flush child stdin");
    }

    pub fn wait_kill(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn spawn_chanmux(config_path: &std::path::Path) -> Proc {
    let mut child = Command::new(env!("CARGO_BIN_EXE_chanmux"))
        .arg("-c")
        .arg(config_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn chanmux");
    let stdin = child.stdin.take().unwrap();
    let stdout = child.stdout.take().unwrap();
    Proc { child, stdin, lines: LineReader::new(stdout) }
}

pub fn spawn_usrv(socket_path: &std::path::Path) -> Proc {
    let mut child = Command::new(env!("CARGO_BIN_EXE_chanmux-usrv"))
        .arg(socket_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn usrv");
    let stdin = child.stdin.take().unwrap();
    let stdout = child.stdout.take().unwrap();
    Proc { child, stdin, lines: LineReader::new(stdout) }
}

/// Read banner lines up to and including `>00> READY`, so a test can start
/// issuing commands right after.
pub fn wait_ready(p: &Proc) {
    p.lines.wait_for(Duration::from_secs(5), |l| l == ">00> READY");
}

/// Block until `path` exists, for a `usrv` listener to have bound/listened
/// before a test tries to connect a channel to it.
pub fn wait_for_path(path: &std::path::Path, timeout: Duration) {
    let deadline = std::time::Instant::now() + timeout;
    while !path.exists() {
        if std::time::Instant::now() >= deadline {
            panic!("{} never appeared", path.display());
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

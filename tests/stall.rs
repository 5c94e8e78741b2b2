//! The shared-output stall detector: if the write queue makes no forward
//! progress for `timeout` seconds, the process gives up rather than
//! wedging forever. Deliberately does not use `support::spawn_chanmux` --
//! that harness drains stdout continuously on a background thread, which
//! would prevent the stall this test needs to provoke.

use std::fs;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

#[test]
fn stalled_output_aborts_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("chanmux.toml");
    fs::write(&cfg_path, "keepalive = 0\ntimeout = 1\n").unwrap();

    let mut child = Command::new(env!("CARGO_BIN_EXE_chanmux"))
        .arg("-c")
        .arg(&cfg_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn chanmux");

    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = child.stdout.take().unwrap();

    // Flood the message-echo channel with large lines without reading any
    // of the output back, to fill the pipe's kernel buffer well past its
    // usual capacity and force the writes on the shared output to block.
    let payload = "x".repeat(4000);
    for _ in 0..40 {
        write!(stdin, "<FF< {payload}\n").expect("write to chanmux stdin");
    }
    drop(stdin);

    // Give the stall detector (timeout=1s) time to notice the blocked
    // queue and start its own emergency write, which itself retries for
    // up to another `timeout` seconds before giving up.
    std::thread::sleep(Duration::from_millis(1300));

    // Now act like a controller that resumes reading after a pause: drain
    // whatever is left, which is what lets the emergency writer's retry
    // finally get through before its own deadline expires.
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    let out = rx.recv_timeout(Duration::from_secs(8)).expect("stdout drain");

    let status = child.wait().expect("wait on chanmux");
    assert!(!status.success(), "expected a non-zero exit after a stall");

    let text = String::from_utf8_lossy(&out);
    let last_line = text.lines().last().expect("some output was captured");
    assert_eq!(last_line, "!FF! output stalled, giving up");
}

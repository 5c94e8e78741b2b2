//! The child-process reaper's escalation sequence after closing a `popen`
//! channel whose process does not exit on its own. Slow by nature (the
//! reaper's steps wait 10s and 20s before escalating further): one test
//! covers a plain `sleep`, which terminates under the default disposition
//! for SIGHUP and never needs SIGTERM/SIGKILL; the other covers a child
//! that ignores both SIGHUP and SIGTERM, forcing the reaper through the
//! full escalation to SIGKILL.

mod support;

use std::fs;
use std::time::Duration;

use support::{spawn_chanmux, wait_ready};

#[test]
fn reaps_a_lingering_popen_child_after_close() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("chanmux.toml");
    fs::write(
        &cfg_path,
        "keepalive = 0\ntimeout = 0\n\n[[channel]]\nname = \"sleeper\"\ntype = \"PROC\"\nmethod = { kind = \"popen\", command = \"sleep 100\" }\n",
    )
    .unwrap();

    let mut p = spawn_chanmux(&cfg_path);
    wait_ready(&p);

    p.send_cmd("open 01");
    p.lines.expect_line(">00> OK open 01", Duration::from_secs(2));

    p.send_cmd("close 01");
    p.lines.expect_line(">00> OK close 01", Duration::from_secs(2));

    // Reaper's first tick is ~1s out, sends SIGHUP; `sleep` has no handler
    // for it and terminates under the default disposition almost
    // immediately, so the "terminated by signal" notice should land well
    // before the 10s escalation to SIGTERM would ever fire.
    p.lines.wait_for(Duration::from_secs(3), |l| {
        l.starts_with(">FF> sending SIGHUP to ")
    });
    p.lines.wait_for(Duration::from_secs(15), |l| {
        l.contains("terminated by signal") || l.contains("exited (")
    });

    p.send_cmd("quit");
    p.wait_kill();
}

/// A popen child that ignores both SIGHUP and SIGTERM has to be walked
/// through the full escalation (SIGHUP at 1s, SIGTERM at +10s, SIGKILL at
/// +20s) since nothing short of SIGKILL can end it. Slow (~31s) by the
/// nature of the timers under test.
#[test]
fn reaps_a_signal_resistant_popen_child_via_sigkill() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("chanmux.toml");
    fs::write(
        &cfg_path,
        "keepalive = 0\ntimeout = 0\n\n[[channel]]\nname = \"stubborn\"\ntype = \"PROC\"\nmethod = { kind = \"popen\", command = \"trap '' HUP TERM; while :; do sleep 1; done\" }\n",
    )
    .unwrap();

    let mut p = spawn_chanmux(&cfg_path);
    wait_ready(&p);

    p.send_cmd("open 01");
    p.lines.expect_line(">00> OK open 01", Duration::from_secs(2));

    p.send_cmd("close 01");
    p.lines.expect_line(">00> OK close 01", Duration::from_secs(2));

    p.lines.wait_for(Duration::from_secs(3), |l| {
        l.starts_with(">FF> sending SIGHUP to ")
    });
    p.lines.wait_for(Duration::from_secs(13), |l| {
        l.starts_with(">FF> sending SIGTERM to ")
    });
    p.lines.wait_for(Duration::from_secs(23), |l| {
        l.starts_with(">FF> sending SIGKILL to ")
    });
    p.lines.wait_for(Duration::from_secs(5), |l| {
        l.contains("terminated by signal")
    });

    p.send_cmd("quit");
    p.wait_kill();
}

//! Startup: CLI parsing, config loading, the single-instance lock, SIGPIPE
//! suppression, and handing off to the scheduler.
//!
//! Grounded on `main.c` in full (`acquire_lock`, `main`).

mod buffer;
mod channel;
mod cmdi;
mod config;
mod error;
mod logfile;
mod message;
mod mux;
mod scheduler;
mod util;

use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use clap::Parser;

use config::Config;
use scheduler::Scheduler;

/// Single-stream channel multiplexer: routes framed lines between stdio
/// and many socket/process-backed channels.
#[derive(Debug, Parser)]
#[command(name = "chanmux", version)]
struct Cli {
    /// Path to the TOML config file; also the path `flock`-locked to
    /// enforce single-instance operation.
    #[arg(short = 'c', long = "config", default_value = "chanmux.toml")]
    config: PathBuf,
}

/// Advisory exclusive lock on the config file path, held for the process
/// lifetime simply by keeping the fd open (no explicit unlock needed --
/// the lock vanishes with the process). Mirrors `acquire_lock`.
fn acquire_lock(path: &std::path::Path) -> std::io::Result<std::fs::File> {
    let file = std::fs::OpenOptions::new().read(true).open(path)?;
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(file)
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    // Held for the whole process lifetime; dropping it releases the flock.
    let _lock = match acquire_lock(&cli.config) {
        Ok(f) => f,
        Err(e) if e.raw_os_error() == Some(libc::EWOULDBLOCK) => {
            eprintln!("another instance of chanmux is already running, exiting");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{}: failed to acquire lock: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    let cf = match Config::load(&cli.config) {
        Ok(cf) => cf,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    log::info!(
        "loaded config from {} ({} channel(s))",
        cli.config.display(),
        cf.channels.len()
    );

    if unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) } == libc::SIG_ERR {
        log::error!("signal(SIGPIPE, SIG_IGN): {}", std::io::Error::last_os_error());
    }

    let mut sched = match Scheduler::new(cf) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to initialize scheduler: {e}");
            std::process::exit(1);
        }
    };

    sched.run();
}

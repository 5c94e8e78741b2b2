//! Typed errors at the two boundaries where the core needs one:
//! configuration loading and channel open/connect.
//!
//! Everything else in the scheduler's hot path is either infallible by
//! construction or an internal invariant (`debug_assert!`/`unreachable!`),
//! matching the original's `#ifdef DEBUG` assertions rather than a
//! recoverable `Result`.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("channel {index}: {reason}")]
    InvalidChannel { index: usize, reason: String },

    #[error("too many channels: {count} declared, at most {max} are addressable")]
    TooManyChannels { count: usize, max: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("socket path too long ({len} bytes)")]
    PathTooLong { len: usize },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("the access method defined for this channel is not implemented, sorry")]
    MethodNotImplemented,

    #[error("socket(): {0}")]
    Socket(#[source] std::io::Error),

    #[error("connect(): {0}")]
    Connect(#[source] std::io::Error),

    #[error("fork(): {0}")]
    Fork(#[source] std::io::Error),

    #[error("socketpair(): {0}")]
    SocketPair(#[source] std::io::Error),
}

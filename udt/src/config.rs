//! Runtime defaults, loadable from TOML and overridable from the environment.

use std::{env, fs, io, path::Path, time::Duration};

use serde::Deserialize;

pub const DEFAULT_SEND_FILE_BLOCK: u32 = 7_320_000;
pub const DEFAULT_RECV_FILE_BLOCK: u32 = 366_000;
pub const DEFAULT_LISTEN_BACKLOG: u32 = 128;
pub const DEFAULT_RENDEZVOUS_TIMEOUT_MS: u64 = 3_000;

pub const ENV_SEND_FILE_BLOCK: &str = "UDT_SEND_FILE_BLOCK";
pub const ENV_RECV_FILE_BLOCK: &str = "UDT_RECV_FILE_BLOCK";
pub const ENV_LISTEN_BACKLOG: &str = "UDT_LISTEN_BACKLOG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("unable to read config file: {0}")]
  Io(#[from] io::Error),

  #[error("unable to parse config: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("invalid value for {key}: {reason}")]
  Invalid { key: &'static str, reason: String },
}

/// ```toml
/// send_file_block = 7320000
/// recv_file_block = 366000
/// listen_backlog = 128
/// rendezvous_timeout_ms = 3000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  /// Default chunk size of `send_file`.
  pub send_file_block: u32,
  /// Default chunk size of `recv_file`.
  pub recv_file_block: u32,
  /// Backlog used by `Socket::listen_default`.
  pub listen_backlog: u32,
  /// How long the loopback engine waits for a rendezvous peer.
  pub rendezvous_timeout_ms: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      send_file_block: DEFAULT_SEND_FILE_BLOCK,
      recv_file_block: DEFAULT_RECV_FILE_BLOCK,
      listen_backlog: DEFAULT_LISTEN_BACKLOG,
      rendezvous_timeout_ms: DEFAULT_RENDEZVOUS_TIMEOUT_MS,
    }
  }
}

impl Config {
  pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(s)?;
    config.validate()?;
    Ok(config)
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    Self::from_toml_str(&fs::read_to_string(path)?)
  }

  /// Applies `UDT_SEND_FILE_BLOCK`, `UDT_RECV_FILE_BLOCK` and
  /// `UDT_LISTEN_BACKLOG` when set.
  pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
    self.with_overrides(|key| env::var(key).ok())
  }

  fn with_overrides(
    mut self,
    lookup: impl Fn(&str) -> Option<String>,
  ) -> Result<Self, ConfigError> {
    for (key, slot) in [
      (ENV_SEND_FILE_BLOCK, &mut self.send_file_block),
      (ENV_RECV_FILE_BLOCK, &mut self.recv_file_block),
      (ENV_LISTEN_BACKLOG, &mut self.listen_backlog),
    ] {
      if let Some(raw) = lookup(key) {
        *slot = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
          ConfigError::Invalid { key, reason: e.to_string() }
        })?;
      }
    }
    self.validate()?;
    Ok(self)
  }

  pub fn rendezvous_timeout(&self) -> Duration {
    Duration::from_millis(self.rendezvous_timeout_ms)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    for (key, value) in [
      ("send_file_block", self.send_file_block),
      ("recv_file_block", self.recv_file_block),
      ("listen_backlog", self.listen_backlog),
    ] {
      if value == 0 || value > i32::MAX as u32 {
        return Err(ConfigError::Invalid {
          key,
          reason: format!("{value} is outside 1..={}", i32::MAX),
        });
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn defaults() {
    let config = Config::default();
    assert_eq!(config.send_file_block, 7_320_000);
    assert_eq!(config.recv_file_block, 366_000);
    assert_eq!(config.rendezvous_timeout(), Duration::from_secs(3));
  }

  #[test]
  fn partial_toml_keeps_defaults() {
    let config = Config::from_toml_str("listen_backlog = 16").unwrap();
    assert_eq!(config.listen_backlog, 16);
    assert_eq!(config.send_file_block, DEFAULT_SEND_FILE_BLOCK);
  }

  #[test]
  fn unknown_keys_and_zero_blocks_are_rejected() {
    assert!(matches!(
      Config::from_toml_str("chunk = 1"),
      Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
      Config::from_toml_str("recv_file_block = 0"),
      Err(ConfigError::Invalid { key: "recv_file_block", .. })
    ));
  }

  #[test]
  fn load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "send_file_block = 1024").unwrap();
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.send_file_block, 1024);
  }

  #[test]
  fn overrides() {
    let config = Config::default()
      .with_overrides(|key| (key == ENV_RECV_FILE_BLOCK).then(|| "4096".into()))
      .unwrap();
    assert_eq!(config.recv_file_block, 4096);

    let err = Config::default()
      .with_overrides(|key| (key == ENV_LISTEN_BACKLOG).then(|| "lots".into()))
      .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { key: ENV_LISTEN_BACKLOG, .. }));
  }
}

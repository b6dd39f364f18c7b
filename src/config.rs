//! Chain and transfer settings
//!
//! Values come from three layers: built-in defaults, an optional TOML file,
//! and the command line (highest precedence).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::cli::Args;
use crate::error::RelayError;

pub const DEFAULT_PORT: u16 = 31337;
pub const DEFAULT_FIFO: &str = "/tmp/chaincast.fifo";
pub const DEFAULT_SSH: &str = "ssh";
pub const DEFAULT_NETCAT: &str = "nc";
/// Best-effort wait for a relay to bind its port before the next upstream
/// host is dispatched. There is no readiness handshake.
pub const DEFAULT_SETTLE_MS: u64 = 500;
pub const DEFAULT_STARTUP_WAIT_MS: u64 = 2000;
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Ordered hosts the file travels through, `hosts[0]` first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainSpec {
    hosts: Vec<String>,
}

impl ChainSpec {
    pub fn new(hosts: Vec<String>) -> Result<Self, RelayError> {
        if hosts.len() < 2 {
            return Err(RelayError::Startup(format!(
                "need at least 2 hosts, got {}",
                hosts.len()
            )));
        }
        if let Some(bad) = hosts.iter().find(|h| h.trim().is_empty()) {
            return Err(RelayError::Startup(format!("invalid host name {bad:?}")));
        }
        Ok(Self { hosts })
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn first(&self) -> &str {
        &self.hosts[0]
    }

    /// Host after `index`, or `None` for the terminal position.
    pub fn next_after(&self, index: usize) -> Option<&str> {
        self.hosts.get(index + 1).map(String::as_str)
    }
}

/// Settings shared by every relay in the chain. Read-only once resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferConfig {
    pub fifo_path: String,
    pub listen_port: u16,
    pub output_filename: String,
    pub login: Option<String>,
    pub ssh: String,
    pub netcat: String,
    pub settle: Duration,
    pub startup_wait: Duration,
    pub chunk_size: usize,
}

impl TransferConfig {
    /// Defaults for a given remote output name.
    pub fn new(output_filename: impl Into<String>) -> Self {
        Self {
            fifo_path: DEFAULT_FIFO.to_string(),
            listen_port: DEFAULT_PORT,
            output_filename: output_filename.into(),
            login: None,
            ssh: DEFAULT_SSH.to_string(),
            netcat: DEFAULT_NETCAT.to_string(),
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            startup_wait: Duration::from_millis(DEFAULT_STARTUP_WAIT_MS),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Merge CLI arguments over file settings over defaults.
    pub fn resolve(args: &Args, file: &FileConfig) -> Result<Self, RelayError> {
        let output = match args.output.clone().or_else(|| file.output.clone()) {
            Some(o) => o,
            None => args
                .filename
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    RelayError::Startup(format!(
                        "cannot derive an output name from {}",
                        args.filename.display()
                    ))
                })?,
        };

        let mut cfg = Self::new(output);
        if let Some(f) = args.fifo.clone().or_else(|| file.fifo.clone()) {
            cfg.fifo_path = f;
        }
        if let Some(p) = args.port.or(file.port) {
            cfg.listen_port = p;
        }
        cfg.login = args.login.clone().or_else(|| file.login.clone());
        if let Some(s) = args.ssh.clone().or_else(|| file.ssh.clone()) {
            cfg.ssh = s;
        }
        if let Some(n) = args.netcat.clone().or_else(|| file.netcat.clone()) {
            cfg.netcat = n;
        }
        if let Some(ms) = args.settle_ms.or(file.settle_ms) {
            cfg.settle = Duration::from_millis(ms);
        }
        if let Some(ms) = args.startup_wait_ms.or(file.startup_wait_ms) {
            cfg.startup_wait = Duration::from_millis(ms);
        }
        if let Some(c) = args.chunk_size.or(file.chunk_size) {
            cfg.chunk_size = c;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.chunk_size == 0 {
            return Err(RelayError::Startup("chunk size must be positive".into()));
        }
        if self.listen_port == 0 {
            return Err(RelayError::Startup("port must be non-zero".into()));
        }
        if self.fifo_path.trim().is_empty() || self.output_filename.trim().is_empty() {
            return Err(RelayError::Startup(
                "fifo and output paths must not be empty".into(),
            ));
        }
        if self.ssh.split_whitespace().next().is_none() {
            return Err(RelayError::Startup("ssh command must not be empty".into()));
        }
        Ok(())
    }
}

/// Optional on-disk settings. Every key may be omitted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub fifo: Option<String>,
    pub output: Option<String>,
    pub port: Option<u16>,
    pub login: Option<String>,
    pub ssh: Option<String>,
    pub netcat: Option<String>,
    pub settle_ms: Option<u64>,
    pub startup_wait_ms: Option<u64>,
    pub chunk_size: Option<usize>,
}

pub fn load_file_config(path: Option<&Path>) -> Result<FileConfig> {
    let Some(p) = path else {
        return Ok(FileConfig::default());
    };
    let data = std::fs::read_to_string(p)
        .with_context(|| format!("Failed to read config file {}", p.display()))?;
    let cfg: FileConfig = toml::from_str(&data)
        .with_context(|| format!("Failed to parse config file {}", p.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["chaincast"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn chain_requires_two_hosts() {
        assert!(ChainSpec::new(vec![]).is_err());
        assert!(ChainSpec::new(vec!["a".into()]).is_err());
        let chain = ChainSpec::new(vec!["a".into(), "b".into()]).unwrap();
        assert_eq!(chain.first(), "a");
        assert_eq!(chain.next_after(0), Some("b"));
        assert_eq!(chain.next_after(1), None);
    }

    #[test]
    fn output_defaults_to_input_basename() {
        let a = args(&["/data/images/disk.img", "h1", "h2"]);
        let cfg = TransferConfig::resolve(&a, &FileConfig::default()).unwrap();
        assert_eq!(cfg.output_filename, "disk.img");
        assert_eq!(cfg.listen_port, DEFAULT_PORT);
        assert_eq!(cfg.fifo_path, DEFAULT_FIFO);
        assert_eq!(cfg.settle, Duration::from_millis(DEFAULT_SETTLE_MS));
        assert!(cfg.login.is_none());
    }

    #[test]
    fn cli_overrides_file_overrides_defaults() {
        let file = FileConfig {
            port: Some(4000),
            login: Some("deploy".into()),
            fifo: Some("/var/tmp/relay.fifo".into()),
            ..FileConfig::default()
        };
        let a = args(&["-p", "9000", "-o", "f.bin", "payload", "h1", "h2"]);
        let cfg = TransferConfig::resolve(&a, &file).unwrap();
        assert_eq!(cfg.listen_port, 9000);
        assert_eq!(cfg.output_filename, "f.bin");
        assert_eq!(cfg.login.as_deref(), Some("deploy"));
        assert_eq!(cfg.fifo_path, "/var/tmp/relay.fifo");
    }

    #[test]
    fn zero_chunk_size_is_a_startup_error() {
        let a = args(&["--chunk-size", "0", "payload", "h1", "h2"]);
        let err = TransferConfig::resolve(&a, &FileConfig::default()).unwrap_err();
        assert!(matches!(err, RelayError::Startup(_)));
    }

    #[test]
    fn loads_toml_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "port = 7000\nnetcat = \"ncat\"\nsettle_ms = 10").unwrap();
        let cfg = load_file_config(Some(f.path())).unwrap();
        assert_eq!(cfg.port, Some(7000));
        assert_eq!(cfg.netcat.as_deref(), Some("ncat"));
        assert_eq!(cfg.settle_ms, Some(10));
        assert!(cfg.fifo.is_none());
    }

    #[test]
    fn rejects_unknown_toml_keys() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "prot = 7000").unwrap();
        assert!(load_file_config(Some(f.path())).is_err());
    }

    #[test]
    fn missing_config_path_means_defaults() {
        assert_eq!(load_file_config(None).unwrap(), FileConfig::default());
    }
}

//! Command-line arguments

use clap::Parser;
use std::path::PathBuf;

/// Options left unset here fall back to `--config`, then to built-in defaults.
#[derive(Clone, Debug, Parser)]
#[command(
    author,
    version,
    about = "Chaincast - send one file through a chain of hosts, each relaying to the next"
)]
pub struct Args {
    /// Local file to distribute
    pub filename: PathBuf,

    /// Chain of hosts, first receives from us, last only stores
    #[arg(required = true, num_args = 2..)]
    pub hosts: Vec<String>,

    /// Filename for fifo on forwarding hosts
    #[arg(short = 'f', long)]
    pub fifo: Option<String>,

    /// Output filename on every host (defaults to the input's base name)
    #[arg(short = 'o', long)]
    pub output: Option<String>,

    /// Port number for all netcats
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Username for all ssh commands
    #[arg(short = 'l', long)]
    pub login: Option<String>,

    /// Remote shell command (program plus leading arguments)
    #[arg(long)]
    pub ssh: Option<String>,

    /// Netcat binary on remote hosts
    #[arg(long)]
    pub netcat: Option<String>,

    /// Pause after each relay dispatch, in milliseconds
    #[arg(long = "settle-ms")]
    pub settle_ms: Option<u64>,

    /// Pause after the chain is up and before connecting, in milliseconds
    #[arg(long = "startup-wait-ms")]
    pub startup_wait_ms: Option<u64>,

    /// Bytes per write to the first host
    #[arg(long = "chunk-size")]
    pub chunk_size: Option<usize>,

    /// TOML file with default option values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Append event lines to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Append a JSON summary of each run to this file
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_filename_and_two_hosts() {
        assert!(Args::try_parse_from(["chaincast", "file", "h1"]).is_err());
        assert!(Args::try_parse_from(["chaincast", "file"]).is_err());
        let a = Args::try_parse_from(["chaincast", "file", "h1", "h2", "h3"]).unwrap();
        assert_eq!(a.hosts, vec!["h1", "h2", "h3"]);
        assert_eq!(a.filename, PathBuf::from("file"));
    }

    #[test]
    fn short_flags() {
        let a = Args::try_parse_from([
            "chaincast", "-f", "/tmp/x.fifo", "-o", "out", "-p", "9000", "-l", "root", "file", "a",
            "b",
        ])
        .unwrap();
        assert_eq!(a.fifo.as_deref(), Some("/tmp/x.fifo"));
        assert_eq!(a.output.as_deref(), Some("out"));
        assert_eq!(a.port, Some(9000));
        assert_eq!(a.login.as_deref(), Some("root"));
    }

    #[test]
    fn help_is_a_display_request() {
        let err = Args::try_parse_from(["chaincast", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}

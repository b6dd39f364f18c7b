use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::error::ExecError;
use crate::relay::RelayRole;

pub trait Logger: Send + Sync {
    fn dispatch(&self, _host: &str, _role: &RelayRole) {}
    fn transfer_start(&self, _src: &Path, _first_host: &str, _bytes: u64) {}
    fn transfer_done(&self, _bytes: u64, _seconds: f64) {}
    fn relay_exit(&self, _host: &str, _outcome: &Result<String, ExecError>) {}
    fn report(&self, _host: &str, _line: &str) {}
    fn error(&self, _context: &str, _msg: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn dispatch(&self, host: &str, role: &RelayRole) {
        match role {
            RelayRole::Forwarding { listen_port, next_host, pipe } => self.line(&format!(
                "DISPATCH host={} role=forward port={} next={} pipe={}",
                host, listen_port, next_host, pipe
            )),
            RelayRole::Terminal { listen_port, output } => self.line(&format!(
                "DISPATCH host={} role=terminal port={} output={}",
                host, listen_port, output
            )),
        }
    }
    fn transfer_start(&self, src: &Path, first_host: &str, bytes: u64) {
        self.line(&format!(
            "START src={} first={} bytes={}",
            src.display(),
            first_host,
            bytes
        ));
    }
    fn transfer_done(&self, bytes: u64, seconds: f64) {
        self.line(&format!("DONE bytes={bytes} seconds={seconds:.3}"));
    }
    fn relay_exit(&self, host: &str, outcome: &Result<String, ExecError>) {
        match outcome {
            Ok(_) => self.line(&format!("EXIT host={} ok", host)),
            Err(e) => self.line(&format!("EXIT host={} err={}", host, e)),
        }
    }
    fn report(&self, host: &str, line: &str) {
        self.line(&format!("REPORT host={} {}", host, line.trim()));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} msg={}", context, msg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_logger_appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/run.log");
        let logger = TextLogger::new(&path).unwrap();
        logger.dispatch(
            "c",
            &RelayRole::Terminal {
                listen_port: 9000,
                output: "f.bin".into(),
            },
        );
        logger.transfer_done(1024, 1.5);
        logger.error("connect", "refused");

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("DISPATCH host=c role=terminal port=9000 output=f.bin"));
        assert!(lines[1].ends_with("DONE bytes=1024 seconds=1.500"));
        assert!(lines[2].ends_with("ERROR ctx=connect msg=refused"));
    }
}

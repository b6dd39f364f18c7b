use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::lifecycle::HostReport;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Interrupted,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub host: String,
    pub ok: bool,
    pub detail: String,
}

impl From<&HostReport> for HostEntry {
    fn from(r: &HostReport) -> Self {
        match &r.outcome {
            Ok(out) => HostEntry {
                host: r.host.clone(),
                ok: true,
                detail: out.trim().to_string(),
            },
            Err(e) => HostEntry {
                host: r.host.clone(),
                ok: false,
                detail: e.to_string(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RunEntry {
    pub timestamp: String,
    pub source: PathBuf,
    pub hosts: Vec<String>,
    pub port: u16,
    pub output: String,
    pub status: RunStatus,
    pub bytes_sent: u64,
    pub error: Option<String>,
    pub reports: Vec<HostEntry>,
}

impl RunEntry {
    pub fn now(
        source: &Path,
        hosts: &[String],
        port: u16,
        output: &str,
        status: RunStatus,
    ) -> Self {
        RunEntry {
            timestamp: Utc::now().to_rfc3339(),
            source: source.to_path_buf(),
            hosts: hosts.to_vec(),
            port,
            output: output.to_string(),
            status,
            bytes_sent: 0,
            error: None,
            reports: Vec::new(),
        }
    }
}

/// Append-only JSON-lines record of runs.
pub struct RunJournal {
    path: PathBuf,
}

impl RunJournal {
    pub fn new(path: &Path) -> Self {
        RunJournal {
            path: path.to_path_buf(),
        }
    }

    pub fn add_entry(&self, entry: &RunEntry) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open run journal")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_entries(&self) -> Result<Vec<RunEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).context("Failed to open run journal for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: RunEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExecError, RelayError};

    #[test]
    fn appends_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let journal = RunJournal::new(&dir.path().join("runs.jsonl"));
        assert!(journal.read_entries().unwrap().is_empty());

        let hosts = vec!["a".to_string(), "b".to_string()];
        let mut first = RunEntry::now(Path::new("disk.img"), &hosts, 9000, "disk.img", RunStatus::Completed);
        first.bytes_sent = 4096;
        first.reports = vec![
            HostEntry::from(&HostReport {
                host: "a".into(),
                outcome: Ok("-rw-r--r-- 1 u u 4096 disk.img\n".into()),
            }),
            HostEntry::from(&HostReport {
                host: "b".into(),
                outcome: Err(RelayError::Verification {
                    host: "b".into(),
                    source: ExecError::Other("unreachable".into()),
                }),
            }),
        ];
        journal.add_entry(&first).unwrap();

        let mut second = RunEntry::now(Path::new("disk.img"), &hosts, 9000, "disk.img", RunStatus::Failed);
        second.error = Some("cannot connect".into());
        journal.add_entry(&second).unwrap();

        let entries = journal.read_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], first);
        assert_eq!(entries[0].reports[0].detail, "-rw-r--r-- 1 u u 4096 disk.img");
        assert!(!entries[0].reports[1].ok);
        assert_eq!(entries[1].status, RunStatus::Failed);
    }
}

//! ---
//! kdm_section: "03-persistence-logging"
//! kdm_subsection: "module"
//! kdm_type: "source"
//! kdm_scope: "code"
//! kdm_description: "Append-only lifecycle event log."
//! kdm_version: "v0.1.0"
//! kdm_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use kdm_common::TenantId;
use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::{Result, StoreError};

/// Format version written into new event log headers.
pub const EVENT_LOG_VERSION: u16 = 1;

/// Event log file header stored as the first line in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventLogHeader {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
}

impl EventLogHeader {
    fn new() -> Self {
        let created_at = Utc::now();
        let hash = Self::hash_for(&created_at);
        Self {
            version: EVENT_LOG_VERSION,
            created_at,
            hash,
        }
    }

    fn hash_for(created_at: &DateTime<Utc>) -> String {
        format!(
            "{:x}",
            sha2::Sha256::digest(created_at.to_rfc3339().as_bytes())
        )
    }

    fn verify(&self) -> bool {
        self.version == EVENT_LOG_VERSION && self.hash == Self::hash_for(&self.created_at)
    }
}

/// Lifecycle event captured in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Sequential identifier assigned when appending.
    pub sequence: u64,
    /// Timestamp when the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Tenant the event applies to.
    pub tenant: TenantId,
    /// Event name (`deployed`, `scaled`, `removed`, ...).
    pub event: String,
    /// Arbitrary JSON payload describing the transition.
    pub payload: serde_json::Value,
}

impl EventLogEntry {
    /// Construct an entry with the provided tenant, event name, and payload.
    pub fn new(tenant: TenantId, event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            tenant,
            event: event.into(),
            payload,
        }
    }
}

/// Append-only writer for the lifecycle event log.
pub struct EventLogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
}

impl EventLogWriter {
    /// Open an event log for appending, writing a header if the file is new.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let exists = path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);

        if !exists || is_empty(path)? {
            let header = EventLogHeader::new();
            let line = serde_json::to_string(&header)?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            return Ok(Self {
                path: path.to_path_buf(),
                writer,
                next_sequence: 0,
            });
        }

        let next_sequence = determine_next_sequence(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            next_sequence,
        })
    }

    /// Append a new entry to the log and return the assigned sequence number.
    pub fn append(&mut self, mut entry: EventLogEntry) -> Result<u64> {
        self.next_sequence += 1;
        entry.sequence = self.next_sequence;
        let line = serde_json::to_string(&entry)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(entry.sequence)
    }

    /// Flush buffered writes to the underlying file handle.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Path of the backing log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Sequential reader over a lifecycle event log.
pub struct EventLogReader {
    lines: std::io::Lines<BufReader<File>>,
}

impl EventLogReader {
    /// Open a log for reading, validating the header line.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut lines = BufReader::new(file).lines();

        let header_line = match lines.next() {
            Some(line) => line?,
            None => return Err(StoreError::CorruptEventLog(path.to_path_buf())),
        };
        let header: EventLogHeader = serde_json::from_str(&header_line)
            .map_err(|_| StoreError::CorruptEventLog(path.to_path_buf()))?;
        if !header.verify() {
            return Err(StoreError::CorruptEventLog(path.to_path_buf()));
        }

        Ok(Self { lines })
    }

    /// Read the next entry, or `None` at end of log.
    pub fn next_entry(&mut self) -> Result<Option<EventLogEntry>> {
        match self.lines.next() {
            Some(line) => {
                let entry: EventLogEntry = serde_json::from_str(&line?)?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }
}

/// Replay every entry in the log through the provided callback.
pub fn replay<F>(path: &Path, mut callback: F) -> Result<usize>
where
    F: FnMut(EventLogEntry) -> Result<()>,
{
    let mut reader = EventLogReader::open(path)?;
    let mut replayed = 0usize;
    while let Some(entry) = reader.next_entry()? {
        callback(entry)?;
        replayed += 1;
    }
    Ok(replayed)
}

fn is_empty(path: &Path) -> Result<bool> {
    Ok(fs::metadata(path)?.len() == 0)
}

fn determine_next_sequence(path: &Path) -> Result<u64> {
    let mut reader = EventLogReader::open(path)?;
    let mut last = 0u64;
    while let Some(entry) = reader.next_entry()? {
        last = entry.sequence;
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(tenant: &str, event: &str) -> EventLogEntry {
        EventLogEntry::new(TenantId::new(tenant), event, json!({ "replicas": 2 }))
    }

    #[test]
    fn append_assigns_monotonic_sequences() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("lifecycle.jsonl");

        let mut writer = EventLogWriter::open(&path).expect("open writer");
        assert_eq!(writer.append(entry("acme", "deployed")).expect("append"), 1);
        assert_eq!(writer.append(entry("acme", "scaled")).expect("append"), 2);
    }

    #[test]
    fn sequences_continue_after_reopen() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("lifecycle.jsonl");

        {
            let mut writer = EventLogWriter::open(&path).expect("open writer");
            writer.append(entry("acme", "deployed")).expect("append");
        }

        let mut writer = EventLogWriter::open(&path).expect("reopen writer");
        assert_eq!(writer.append(entry("acme", "removed")).expect("append"), 2);
    }

    #[test]
    fn replay_visits_all_entries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("lifecycle.jsonl");

        let mut writer = EventLogWriter::open(&path).expect("open writer");
        writer.append(entry("acme", "deployed")).expect("append");
        writer.append(entry("acme", "scaled")).expect("append");
        writer.append(entry("globex", "deployed")).expect("append");

        let mut events = Vec::new();
        let replayed = replay(&path, |entry| {
            events.push((entry.tenant.to_string(), entry.event));
            Ok(())
        })
        .expect("replay");

        assert_eq!(replayed, 3);
        assert_eq!(events[0], ("acme".to_owned(), "deployed".to_owned()));
        assert_eq!(events[2], ("globex".to_owned(), "deployed".to_owned()));
    }

    #[test]
    fn tampered_header_hash_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("lifecycle.jsonl");

        let mut writer = EventLogWriter::open(&path).expect("open writer");
        writer.append(entry("acme", "deployed")).expect("append");
        drop(writer);

        let raw = fs::read_to_string(&path).expect("read log");
        let mut lines = raw.lines();
        let mut header: serde_json::Value =
            serde_json::from_str(lines.next().expect("header line")).expect("parse header");
        header["hash"] = serde_json::Value::String("0".repeat(64));
        let mut doctored = serde_json::to_string(&header).expect("serialize header");
        for line in lines {
            doctored.push('\n');
            doctored.push_str(line);
        }
        fs::write(&path, doctored).expect("rewrite log");

        assert!(matches!(
            EventLogReader::open(&path),
            Err(StoreError::CorruptEventLog(_))
        ));
    }

    #[test]
    fn corrupt_header_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("lifecycle.jsonl");
        fs::write(&path, "not json\n").expect("write garbage");

        assert!(matches!(
            EventLogReader::open(&path),
            Err(StoreError::CorruptEventLog(_))
        ));
    }
}

//! Append-only journey journal, one JSON object per line.
//!
//! Every completed cycle appends a [`JournalEntry`] to
//! `<action_logs_dir>/journey.ndjson`.  Lines are flushed as they are
//! written so a crash loses at most the cycle in flight.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rover_types::Action;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// File name of the journal inside the action-log directory.
pub const JOURNAL_FILE: &str = "journey.ndjson";

/// What happened in one completed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Identifies one process run; lines from several runs share a file.
    pub session: Uuid,
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    /// The photo that was sent to the decision service.
    pub image_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
    pub note: String,
    pub actions: Vec<Action>,
}

/// Append-only writer for [`JournalEntry`] lines.
pub struct JourneyJournal {
    writer: BufWriter<File>,
    path: PathBuf,
    session: Uuid,
}

impl JourneyJournal {
    /// Open or create `dir/journey.ndjson` for appending under a fresh
    /// session id.
    pub fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = dir.as_ref().join(JOURNAL_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
            session: Uuid::new_v4(),
        })
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialise `entry` as one line and flush.
    pub fn append(&mut self, entry: &JournalEntry) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, entry).map_err(std::io::Error::other)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// The last `limit` entries of the journal at `path`, oldest first.
///
/// A missing file reads as empty.  Lines that do not parse are skipped.
pub fn read_tail(path: &Path, limit: usize) -> std::io::Result<Vec<JournalEntry>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<JournalEntry>(&line) {
            entries.push(entry);
        }
    }
    let skip = entries.len().saturating_sub(limit);
    Ok(entries.split_off(skip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_types::ToolName;

    fn entry(session: Uuid, cycle: u64) -> JournalEntry {
        JournalEntry {
            session,
            cycle,
            timestamp: Utc::now(),
            image_path: PathBuf::from(format!("images/{cycle}.png")),
            thoughts: None,
            note: format!("note {cycle}"),
            actions: vec![Action::timed(ToolName::MoveForward, 1)],
        }
    }

    #[test]
    fn appends_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = JourneyJournal::open(dir.path()).unwrap();
        journal.append(&entry(journal.session(), 1)).unwrap();
        journal.append(&entry(journal.session(), 2)).unwrap();

        let raw = std::fs::read_to_string(journal.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.lines().all(|l| l.starts_with('{') && l.ends_with('}')));
    }

    #[test]
    fn reopening_appends_under_a_new_session() {
        let dir = tempfile::tempdir().unwrap();
        let first = {
            let mut journal = JourneyJournal::open(dir.path()).unwrap();
            journal.append(&entry(journal.session(), 1)).unwrap();
            journal.session()
        };
        let mut journal = JourneyJournal::open(dir.path()).unwrap();
        journal.append(&entry(journal.session(), 1)).unwrap();

        let entries = read_tail(journal.path(), 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].session, first);
        assert_ne!(entries[1].session, first);
    }

    #[test]
    fn tail_keeps_newest_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = JourneyJournal::open(dir.path()).unwrap();
        for cycle in 1..=5 {
            journal.append(&entry(journal.session(), cycle)).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(journal.path()).unwrap();
        writeln!(file, "not json").unwrap();

        let tail = read_tail(journal.path(), 2).unwrap();
        let cycles: Vec<u64> = tail.iter().map(|e| e.cycle).collect();
        assert_eq!(cycles, vec![4, 5]);
    }

    #[test]
    fn missing_journal_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_tail(&dir.path().join(JOURNAL_FILE), 5).unwrap().is_empty());
    }
}

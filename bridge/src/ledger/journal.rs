// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Append-only JSON-lines journal backing one ledger partition.
//!
//! Every entry is written as a single line and the file is synced before
//! `append` returns. On open the journal is replayed; a trailing line that does
//! not parse (a crash mid-write) is truncated so the file always holds a valid
//! prefix of entries. A bad line followed by more entries is corruption and
//! fails the open.

use crate::ledger::{LedgerError, LedgerResult};
use crate::types::{now_ms, ProcessedRecord};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalOp {
    /// Full state of a record after a mutation
    Record(ProcessedRecord),
    /// Cursor moved to `block`
    Cursor(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub ts_ms: u64,
    pub op: JournalOp,
}

pub struct Journal {
    file: File,
    path: PathBuf,
    next_seq: u64,
    lines: u64,
}

impl Journal {
    /// Replays the journal at `path` (creating it when absent) and opens it for append.
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<(Self, Vec<JournalEntry>)> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();
        let entries = replay(&path)?;
        let next_seq = entries.last().map(|e| e.seq + 1).unwrap_or(0);
        let file = open_append(&path)?;
        if !existed {
            file.sync_all()?;
            if let Some(parent) = path.parent() {
                fsync_dir(parent)?;
            }
        }
        let journal = Journal {
            file,
            path,
            next_seq,
            lines: entries.len() as u64,
        };
        Ok((journal, entries))
    }

    pub fn append(&mut self, op: JournalOp) -> LedgerResult<JournalEntry> {
        let entry = JournalEntry {
            seq: self.next_seq,
            ts_ms: now_ms(),
            op,
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        // One write per line so a crash can only tear the last line
        self.file.write_all(&line)?;
        self.file.sync_all()?;
        self.next_seq += 1;
        self.lines += 1;
        Ok(entry)
    }

    /// Atomically replaces the journal content with `ops`.
    pub fn rewrite(&mut self, ops: Vec<JournalOp>) -> LedgerResult<()> {
        let tmp_path = self.path.with_extension("jsonl.tmp");
        let mut next_seq = 0;
        {
            let mut tmp = File::create(&tmp_path)?;
            let ts_ms = now_ms();
            for op in ops {
                let entry = JournalEntry {
                    seq: next_seq,
                    ts_ms,
                    op,
                };
                let mut line = serde_json::to_vec(&entry)?;
                line.push(b'\n');
                tmp.write_all(&line)?;
                next_seq += 1;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            fsync_dir(parent)?;
        }
        self.file = open_append(&self.path)?;
        self.next_seq = next_seq;
        self.lines = next_seq;
        Ok(())
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .open(path)
}

/// Directory entries for created or renamed files are only durable after the
/// directory itself is synced.
pub fn fsync_dir(dir: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(dir)?.sync_all()
}

fn replay(path: &Path) -> LedgerResult<Vec<JournalEntry>> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut entries: Vec<JournalEntry> = Vec::new();
    let mut valid_len = 0u64;
    let mut pos = 0u64;
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        pos += read as u64;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            valid_len = pos;
            continue;
        }
        // A line without its newline was never fully written even if it parses
        if !line.ends_with('\n') {
            break;
        }
        let entry = serde_json::from_str::<JournalEntry>(trimmed)
            .ok()
            .filter(|entry| entries.last().map_or(true, |prev| entry.seq > prev.seq));
        match entry {
            Some(entry) => {
                entries.push(entry);
                valid_len = pos;
            }
            None => {
                // Only the last line may be torn
                if has_content(&mut reader)? {
                    return Err(LedgerError::Corrupt {
                        path: path.to_path_buf(),
                        offset: valid_len,
                    });
                }
                break;
            }
        }
    }

    if valid_len < file_len {
        tracing::warn!(
            "Truncating journal {:?} from {} to {} bytes after torn write",
            path,
            file_len,
            valid_len
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(valid_len)?;
        file.sync_all()?;
    }
    Ok(entries)
}

fn has_content(reader: &mut impl BufRead) -> io::Result<bool> {
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest)?;
    Ok(rest.iter().any(|b| !b.is_ascii_whitespace()))
}

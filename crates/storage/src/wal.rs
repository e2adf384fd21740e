// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only write-ahead log for incident and proxy-config mutations (§3.1).
//!
//! Every mutating store call appends one entry and fsyncs before returning,
//! so a crash mid-handler leaves the log (and therefore the materialized
//! state rebuilt from it) consistent with whatever the caller last observed
//! as having succeeded.

use chester_core::{ChesterMetaData, Incident, ProxyConfig};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Schema version for [`WalEntry`]'s on-disk envelope. There has been
/// exactly one version so far; this is asserted at load time but there is
/// no migration machinery to run if it ever changes.
pub const CURRENT_WAL_VERSION: u32 = 1;

/// One durable mutation. Replaying these in order against an empty
/// `MaterializedState` reproduces the state at the time of the last flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEvent {
    PutIncident(Incident),
    DeleteIncident { incident_id: String },
    PutProxyConfig(ProxyConfig),
    PutMetadata {
        instance_group: String,
        metadata: ChesterMetaData,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    #[serde(rename = "v", default = "default_wal_version")]
    pub version: u32,
    pub seq: u64,
    pub event: WalEvent,
}

fn default_wal_version() -> u32 {
    CURRENT_WAL_VERSION
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }
    bak(1)
}

/// Parse `bytes` as newline-delimited JSON `WalEntry` records, stopping at
/// the first line that fails to decode as UTF-8 or JSON. Returns the valid
/// entries and whether the full file was consumed without hitting corruption.
fn parse_valid_prefix(bytes: &[u8]) -> (Vec<WalEntry>, bool) {
    let mut entries = Vec::new();
    let mut consumed = 0usize;
    for line in bytes.split(|&b| b == b'\n') {
        if line.is_empty() {
            consumed += 1;
            continue;
        }
        let Ok(text) = std::str::from_utf8(line) else {
            return (entries, false);
        };
        let Ok(entry) = serde_json::from_str::<WalEntry>(text) else {
            return (entries, false);
        };
        if entry.version != CURRENT_WAL_VERSION {
            return (entries, false);
        }
        entries.push(entry);
        consumed += line.len() + 1;
    }
    (entries, consumed >= bytes.len())
}

fn write_entries(path: &Path, entries: &[WalEntry]) -> Result<(), WalError> {
    let mut file = File::create(path)?;
    for entry in entries {
        let line = serde_json::to_string(entry)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
    }
    file.sync_all()?;
    Ok(())
}

/// An append-only log of [`WalEvent`]s, durable across process restarts.
pub struct Wal {
    path: PathBuf,
    file: File,
    write_seq: u64,
    processed_seq: u64,
    read_offset: u64,
}

impl Wal {
    /// Open (creating if absent) the log at `path`, replaying no further
    /// than necessary: `processed_seq` marks the last entry the caller has
    /// already materialized, so `next_unprocessed` starts after it.
    ///
    /// Corrupt trailing bytes (partial writes from a prior crash, or
    /// non-UTF-8 garbage) are rotated out to a `.bak` file and the clean
    /// prefix is kept; this never fails the open.
    pub fn open(path: impl AsRef<Path>, processed_seq: u64) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();

        let raw = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let (entries, clean) = parse_valid_prefix(&raw);
        if !clean && !raw.is_empty() {
            let bak = rotate_bak_path(&path);
            fs::write(&bak, &raw)?;
            tracing::warn!(path = %path.display(), backup = %bak.display(), "wal corruption detected, rotated to backup");
        }
        write_entries(&path, &entries)?;

        let write_seq = entries.last().map(|e| e.seq).unwrap_or(0);

        let mut read_offset = 0u64;
        for entry in &entries {
            let line = serde_json::to_string(entry)?;
            let line_len = line.len() as u64 + 1;
            if entry.seq <= processed_seq {
                read_offset += line_len;
            } else {
                break;
            }
        }

        let file = OpenOptions::new().append(true).open(&path)?;

        Ok(Self {
            path,
            file,
            write_seq,
            processed_seq,
            read_offset,
        })
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    pub fn processed_seq(&self) -> u64 {
        self.processed_seq
    }

    pub fn mark_processed(&mut self, seq: u64) {
        self.processed_seq = seq;
    }

    /// Append `event`, assigning it the next sequence number. Buffered until
    /// [`Wal::flush`]; callers that need a durability guarantee must flush
    /// before treating the write as committed.
    pub fn append(&mut self, event: &WalEvent) -> Result<u64, WalError> {
        self.write_seq += 1;
        let entry = WalEntry {
            version: CURRENT_WAL_VERSION,
            seq: self.write_seq,
            event: event.clone(),
        };
        let line = serde_json::to_string(&entry)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        Ok(entry.seq)
    }

    /// Flush buffered writes and fsync, so everything appended so far
    /// survives a crash (§3.1).
    pub fn flush(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Read the next entry past the internal cursor, advancing it
    /// regardless of whether the line was readable. Returns `Ok(None)` both
    /// at end-of-file and when the next line fails to decode, so a single
    /// corrupt line does not wedge the cursor: the line is skipped and
    /// later appends remain reachable.
    pub fn next_unprocessed(&mut self) -> Result<Option<WalEntry>, WalError> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(self.read_offset))?;
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(None);
        }
        self.read_offset += n as u64;
        let trimmed = line.strip_suffix(b"\n").unwrap_or(&line);
        if trimmed.is_empty() {
            return self.next_unprocessed();
        }
        let Ok(text) = std::str::from_utf8(trimmed) else {
            return Ok(None);
        };
        match serde_json::from_str::<WalEntry>(text) {
            Ok(entry) if entry.version == CURRENT_WAL_VERSION => Ok(Some(entry)),
            _ => Ok(None),
        }
    }

    /// Collect every entry with `seq > since`, reading from the start of the
    /// file. Stops (without erroring) at the first entry that fails to
    /// decode, so a corrupt tail never surfaces as an error to the caller.
    pub fn entries_after(&self, since: u64) -> Result<Vec<WalEntry>, WalError> {
        let raw = fs::read(&self.path)?;
        let mut out = Vec::new();
        for line in raw.split(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let Ok(text) = std::str::from_utf8(line) else {
                break;
            };
            let Ok(entry) = serde_json::from_str::<WalEntry>(text) else {
                break;
            };
            if entry.version != CURRENT_WAL_VERSION {
                break;
            }
            if entry.seq > since {
                out.push(entry);
            }
        }
        Ok(out)
    }
}

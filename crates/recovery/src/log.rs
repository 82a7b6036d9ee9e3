// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The recovery ledger write side.
//!
//! Index line format (one per entry, single write so concurrent holders
//! of the same log interleave whole lines only):
//!
//! ```text
//! <result>,<date>,<unix-seconds>,<reason>,<from>,<to>,<queue>,<kind>,<payload-path>,<trace-ts>,<compact event>
//! ```
//!
//! `result` is `SUCC` when the payload file holds the full frame, `ERR`
//! when writing it failed — an `ERR` line documents the loss but cannot
//! be replayed.

use crate::RecoveryError;
use rand::Rng;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use txp_core::{frame, Event};

pub const RECOVERY_FILE: &str = "recovery.log";
pub const RECOVERY_DIR: &str = "recovery";

/// Attempts at a unique payload filename before giving up.
const NAME_ATTEMPTS: u32 = 16;

pub struct RecoveryLog {
    index: File,
    index_path: PathBuf,
    payload_dir: PathBuf,
    seq: u32,
    entries_written: u64,
}

impl RecoveryLog {
    /// Open (creating as needed) the ledger under `base_dir`:
    /// `recovery.log` plus the `recovery/` payload directory. Probes the
    /// payload directory for writability so a misconfigured deployment
    /// fails at startup, not at the first crash.
    pub fn open(base_dir: &Path) -> Result<Self, RecoveryError> {
        let payload_dir = base_dir.join(RECOVERY_DIR);
        std::fs::create_dir_all(&payload_dir)?;

        let index_path = base_dir.join(RECOVERY_FILE);
        let index = open_append(&index_path)?;

        let probe = payload_dir.join(".probe");
        std::fs::write(&probe, b"recovery directory probe\n")
            .map_err(|source| RecoveryError::Open { path: probe.clone(), source })?;
        let _ = std::fs::remove_file(&probe);

        tracing::info!(
            index = %index_path.display(),
            payloads = %payload_dir.display(),
            "recovery log open"
        );

        Ok(Self { index, index_path, payload_dir, seq: 0, entries_written: 0 })
    }

    /// Close and reopen the index file, for log rotation. Payload files
    /// are untouched.
    pub fn reopen(&mut self) -> Result<(), RecoveryError> {
        self.index = open_append(&self.index_path)?;
        tracing::info!(index = %self.index_path.display(), "recovery log reopened");
        Ok(())
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Entries written since the counter was last reset.
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    pub fn reset_counter(&mut self) {
        self.entries_written = 0;
    }

    /// Write one event to the ledger: payload file first, index line
    /// second. When this returns Ok the entry is durable; a crash
    /// between the two writes leaves an orphan payload file which replay
    /// treats as authoritative only if it parses.
    pub fn write_entry(
        &mut self,
        event: &Event,
        reason: &str,
        from: &str,
        to: &str,
    ) -> Result<PathBuf, RecoveryError> {
        let (path, payload_ok) = match self.write_payload(event) {
            Ok(path) => (path, true),
            Err(e) => {
                tracing::error!(error = %e, "recovery payload write failed");
                (self.payload_dir.join(format!("r{:06}_LOST", self.seq)), false)
            }
        };
        self.seq += 1;

        let result = if payload_ok { "SUCC" } else { "ERR" };
        let now = chrono::Utc::now();
        let line = format!(
            "{},{},{},{},{},{},{},{},{},{},{}\n",
            result,
            now.format("%Y-%m-%dT%H:%M:%S"),
            now.timestamp(),
            reason,
            from,
            to,
            event.dest_queue,
            event.kind,
            path.display(),
            event.trace_timestamp,
            event.brief(),
        );
        self.index.write_all(line.as_bytes())?;
        self.index.flush()?;
        self.entries_written += 1;

        tracing::info!(
            result,
            reason,
            from,
            to,
            queue = event.dest_queue,
            payload = %path.display(),
            "recovery entry written"
        );
        Ok(path)
    }

    /// Create `rNNNNNN_XXXXXX` with a random suffix and the serialized
    /// frame inside. `create_new` keeps the name unique across every
    /// process appending to the same ledger.
    fn write_payload(&mut self, event: &Event) -> Result<PathBuf, RecoveryError> {
        let bytes = frame::serialize(event)?;
        for _ in 0..NAME_ATTEMPTS {
            let path = self.payload_dir.join(format!("r{:06}_{}", self.seq, random_suffix()));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&bytes)?;
                    file.sync_all()?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(RecoveryError::Open { path, source }),
            }
        }
        Err(RecoveryError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "could not find a unique payload filename",
        )))
    }
}

fn open_append(path: &Path) -> Result<File, RecoveryError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| RecoveryError::Open { path: path.to_path_buf(), source })
}

fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::rng();
    (0..6)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// One parsed index line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryLine {
    pub result: String,
    pub date: String,
    pub unix_secs: u64,
    pub reason: String,
    pub from: String,
    pub to: String,
    pub queue: String,
    pub kind: String,
    pub payload_path: PathBuf,
}

impl RecoveryLine {
    /// Parse the first nine CSV fields; the trace timestamp and compact
    /// rendering after them are free-form and ignored. Returns `None`
    /// for trailer lines and anything else that does not match.
    pub fn parse(line: &str) -> Option<RecoveryLine> {
        let mut fields = line.splitn(11, ',');
        let result = fields.next()?.to_string();
        if result != "SUCC" && result != "ERR" {
            return None;
        }
        let date = fields.next()?.to_string();
        let unix_secs = fields.next()?.parse().ok()?;
        let reason = fields.next()?.to_string();
        let from = fields.next()?.to_string();
        let to = fields.next()?.to_string();
        let queue = fields.next()?.to_string();
        let kind = fields.next()?.to_string();
        let payload_path = PathBuf::from(fields.next()?);
        Some(RecoveryLine { result, date, unix_secs, reason, from, to, queue, kind, payload_path })
    }

    pub fn is_replayable(&self) -> bool {
        self.result == "SUCC"
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replay of a recovery index.
//!
//! Every `SUCC` line's payload file is parsed and handed to the
//! submission sink. Expired events are skipped (their payload files are
//! still removed — there is nothing left to do with them); payload files
//! of resubmitted events are unlinked; lines that fail to parse or
//! resubmit are reported and left on disk.

use crate::log::RecoveryLine;
use crate::RecoveryError;
use std::future::Future;
use std::io::Write;
use std::path::Path;
use txp_core::{frame, Event};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub lines: u64,
    pub resubmitted: u64,
    pub failed: u64,
    pub ignored: u64,
}

/// Replay `file` into `submit`. The sink returns whether the event was
/// accepted; a rejected event keeps its payload file for a later run.
///
/// `ready_time` is rebased from the absolute value it had when the entry
/// was written back to a non-negative offset from now, so a replayed
/// event becomes runnable on the same schedule relative to the replay.
pub async fn replay<F, Fut>(
    file: &Path,
    now_epoch: u64,
    mut submit: F,
) -> Result<ReplaySummary, RecoveryError>
where
    F: FnMut(Event) -> Fut,
    Fut: Future<Output = bool>,
{
    let text = std::fs::read_to_string(file)
        .map_err(|source| RecoveryError::Open { path: file.to_path_buf(), source })?;

    let mut summary = ReplaySummary::default();
    for raw in text.lines() {
        if raw.is_empty() {
            continue;
        }
        summary.lines += 1;

        let line = match RecoveryLine::parse(raw) {
            Some(line) => line,
            None => {
                if !raw.starts_with("done recovery") {
                    tracing::info!(line = raw, "skipping unparseable recovery line");
                }
                continue;
            }
        };
        if !line.is_replayable() {
            summary.ignored += 1;
            continue;
        }

        let mut event = match load_payload(&line.payload_path) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    payload = %line.payload_path.display(),
                    error = %e,
                    "failed to load recovery payload"
                );
                summary.failed += 1;
                continue;
            }
        };

        if event.is_expired(now_epoch) {
            tracing::info!(event = %event, "expired in recovery, dropping");
            summary.ignored += 1;
            let _ = std::fs::remove_file(&line.payload_path);
            continue;
        }

        if event.ready_time > 0 {
            event.ready_time = event.ready_time.saturating_sub(now_epoch);
        }

        if submit(event).await {
            summary.resubmitted += 1;
            let _ = std::fs::remove_file(&line.payload_path);
        } else {
            summary.failed += 1;
            tracing::warn!(
                payload = %line.payload_path.display(),
                "resubmission rejected, payload left on disk"
            );
        }
    }

    write_trailer(file, &summary);
    tracing::info!(
        lines = summary.lines,
        resubmitted = summary.resubmitted,
        failed = summary.failed,
        ignored = summary.ignored,
        "recovery replay finished"
    );
    Ok(summary)
}

fn load_payload(path: &Path) -> Result<Event, RecoveryError> {
    let bytes =
        std::fs::read(path).map_err(|source| RecoveryError::Open { path: path.into(), source })?;
    Ok(frame::parse(&bytes)?)
}

/// Mark the index as processed so a second replay of the same file is
/// visible as such.
fn write_trailer(file: &Path, summary: &ReplaySummary) {
    let Ok(mut f) = std::fs::OpenOptions::new().append(true).open(file) else {
        return;
    };
    let _ = writeln!(
        f,
        "\ndone recovery at {} lines {} resubmitted {} failed {} ignored {}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S"),
        summary.lines,
        summary.resubmitted,
        summary.failed,
        summary.ignored,
    );
}

#[cfg(test)]
#[path = "replay_tests.rs"]
mod tests;

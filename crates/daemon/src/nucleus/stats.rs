// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-queue activity logs and dated stats files.
//!
//! Both are open-append-close writers: write frequency is low and a
//! failure to log must never break the scheduler.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Column key matching the pool status-row order.
pub const STATUS_KEY: &str = "timeLimit,cntExec,mxExec,mnExec,cntQ,mxQ,mnQ,cntW,idleW";

fn utc_now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

/// Appends one-line records to `<log_dir>/q_<queue>.log`.
pub struct QueueLogger {
    log_dir: PathBuf,
}

impl QueueLogger {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    /// Format: `YYYY-MM-DDTHH:MM:SSZ [queue] message`
    pub fn append(&self, queue: &str, message: &str) {
        let path = self.log_dir.join(format!("q_{}.log", queue));
        if let Err(e) = self.write_line(&path, queue, message) {
            tracing::warn!(queue, error = %e, "failed to write queue log");
        }
    }

    fn write_line(&self, path: &Path, queue: &str, message: &str) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}Z [{}] {}", utc_now().format("%Y-%m-%dT%H:%M:%S"), queue, message)?;
        Ok(())
    }
}

/// Appends stats rows to `<stats_dir>/<queue>/<queue>_YYYYMMDD.log`,
/// writing the header row when a file is first created.
pub struct StatsWriter {
    stats_dir: PathBuf,
}

impl StatsWriter {
    pub fn new(stats_dir: PathBuf) -> Self {
        Self { stats_dir }
    }

    pub fn append_row(&self, queue: &str, row: &str) {
        if let Err(e) = self.try_append(queue, row) {
            tracing::warn!(queue, error = %e, "failed to write stats row");
        }
    }

    fn try_append(&self, queue: &str, row: &str) -> std::io::Result<()> {
        let dir = self.stats_dir.join(queue);
        std::fs::create_dir_all(&dir)?;
        let now = utc_now();
        let path = dir.join(format!("{}_{}.log", queue, now.format("%Y%m%d")));
        let fresh = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if fresh {
            writeln!(file, "time,{}", STATUS_KEY)?;
        }
        writeln!(file, "{},{}", now.format("%H:%M:%S"), row)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;

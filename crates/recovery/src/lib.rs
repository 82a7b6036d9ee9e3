// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! txp-recovery: the durable at-least-once ledger.
//!
//! Events that could not be delivered or executed are written twice:
//! the full frame into an individual payload file, and one CSV line into
//! the append-only index. Replay walks an index, resubmits what still
//! applies, and unlinks payload files as they succeed.

mod log;
mod replay;
mod rotate;

pub use log::{RecoveryLine, RecoveryLog, RECOVERY_DIR, RECOVERY_FILE};
pub use replay::{replay, ReplaySummary};
pub use rotate::rotate_logs;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("frame error: {0}")]
    Frame(#[from] txp_core::FrameError),

    #[error("rotate helper failed with status {status}: {output}")]
    RotateFailed { status: i32, output: String },
}

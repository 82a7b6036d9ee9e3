// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! txp-exec: drives the external program that actually runs an event.
//!
//! Two modes, chosen by the queue descriptor: one-shot (spawn per event,
//! collect merged output, wait) and persistent (a long-lived child
//! serving one framed request/response per event over its pipes).

mod command_line;
mod gate;
mod limits;
mod oneshot;
mod persistent;
mod response;

pub use command_line::{shell_escape, CommandSpec};
pub use gate::ChildGate;
pub use oneshot::{run_one_shot, ExecOutcome};
pub use persistent::{ChildExit, PersistentChild};
pub use response::{parse_nested_event, standard_params, ResponseMarkers, ScanOutcome};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("no script configured for event")]
    NoScript,

    #[error("event kind {0} is not executable here")]
    UnsupportedKind(txp_core::EventKind),

    #[error("spawn failed for '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("child i/o error: {0}")]
    ChildIo(#[from] std::io::Error),

    #[error("bad frame from child: {0}")]
    Frame(#[from] txp_core::FrameError),

    #[error("invalid marker pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("persistent child is gone")]
    ChildGone,
}

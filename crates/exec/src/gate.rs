// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared handle on a worker's current child process.
//!
//! The supervisor holds a clone of the gate and signals through it when
//! an execution overruns its time limit; the executing side arms the
//! gate around each spawn. Signaling a disarmed gate is a no-op.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, Default, Debug)]
pub struct ChildGate(Arc<Mutex<Option<i32>>>);

impl ChildGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn arm(&self, pid: u32) {
        *self.0.lock() = Some(pid as i32);
    }

    pub(crate) fn disarm(&self) {
        *self.0.lock() = None;
    }

    pub fn child_pid(&self) -> Option<u32> {
        self.0.lock().map(|pid| pid as u32)
    }

    /// SIGTERM the current child. Returns whether a child was signaled.
    pub fn term(&self) -> bool {
        self.signal(Signal::SIGTERM)
    }

    /// SIGKILL the current child. Returns whether a child was signaled.
    pub fn kill(&self) -> bool {
        self.signal(Signal::SIGKILL)
    }

    fn signal(&self, sig: Signal) -> bool {
        let pid = match *self.0.lock() {
            Some(pid) => pid,
            None => return false,
        };
        match kill(Pid::from_raw(pid), sig) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(pid, signal = %sig, error = %e, "signal to child failed");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;

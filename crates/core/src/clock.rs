// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time handling.
//!
//! Expiry, ready-time and queue-latency arithmetic all work in whole
//! seconds since the Unix epoch, matching the wire format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A clock that provides the current time
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn epoch_secs(&self) -> u64;
}

/// Real system clock
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Fake clock for testing with controllable time
#[derive(Clone)]
pub struct FakeClock {
    start: Instant,
    offset_secs: Arc<AtomicU64>,
    epoch_secs: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset_secs: Arc::new(AtomicU64::new(0)),
            epoch_secs: Arc::new(AtomicU64::new(1_000_000)),
        }
    }

    /// Advance the clock by the given number of seconds
    pub fn advance_secs(&self, secs: u64) {
        self.offset_secs.fetch_add(secs, Ordering::SeqCst);
        self.epoch_secs.fetch_add(secs, Ordering::SeqCst);
    }

    /// Set the epoch-seconds value
    pub fn set_epoch_secs(&self, secs: u64) {
        self.epoch_secs.store(secs, Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + std::time::Duration::from_secs(self.offset_secs.load(Ordering::SeqCst))
    }

    fn epoch_secs(&self) -> u64 {
        self.epoch_secs.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;

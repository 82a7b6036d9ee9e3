// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-correlation reference synthesis.

use rand::Rng;

/// Generate a structured `NNNNN-NNNNN` reference from the thread-local
/// random source.
///
/// Used when an event arrives at the gateway without a reference of its
/// own; the two five-digit halves keep the value greppable in logs.
pub fn generate_reference() -> String {
    let mut rng = rand::rng();
    let hi: u16 = rng.random();
    let lo: u16 = rng.random();
    format!("{:05}-{:05}", hi, lo)
}

#[cfg(test)]
#[path = "reference_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scanning of one-shot output.
//!
//! When a queue runs in standard-response mode the child's merged output
//! is searched for a success marker and a failure marker; absence of
//! both is itself a failure. Configurable prefixes extract an error
//! string, trace timestamps (all occurrences, `-`-joined) and a system
//! parameter from the output.

use crate::ExecError;
use regex::Regex;
use txp_core::{frame, Event, FRAME_HEADER, FRAME_HEADER_LEN};

/// Marker and prefix configuration, compiled once per worker.
pub struct ResponseMarkers {
    success: String,
    failure: String,
    error_re: Regex,
    trace_re: Regex,
    param_re: Regex,
}

/// What a scan concluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub success: bool,
    pub failure_cause: String,
    pub error_string: String,
    pub trace_timestamp: String,
    pub system_param: String,
}

fn prefix_re(prefix: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("{}([^\n]*)", regex::escape(prefix)))
}

impl ResponseMarkers {
    pub fn new(
        success: &str,
        failure: &str,
        error_prefix: &str,
        trace_prefix: &str,
        param_prefix: &str,
    ) -> Result<Self, ExecError> {
        Ok(Self {
            success: success.to_string(),
            failure: failure.to_string(),
            error_re: prefix_re(error_prefix)?,
            trace_re: prefix_re(trace_prefix)?,
            param_re: prefix_re(param_prefix)?,
        })
    }

    /// Scan the merged output.
    ///
    /// `exec_ok` is whether the child itself exited cleanly — marker
    /// evaluation only applies on top of a clean exit. Prefix extraction
    /// runs either way (trace/param always, the error string only on
    /// failure).
    pub fn scan(&self, exec_ok: bool, output: &str) -> ScanOutcome {
        let mut out = ScanOutcome { success: exec_ok, ..ScanOutcome::default() };

        if exec_ok {
            let found_fail = output.contains(&self.failure);
            let found_success = output.contains(&self.success);
            if found_fail {
                out.success = false;
                out.failure_cause = "foundFail".to_string();
            } else if !found_success {
                out.success = false;
                out.failure_cause = "noFailOrSuccess".to_string();
            }
        }

        if !out.success {
            if let Some(c) = self.error_re.captures(output) {
                out.error_string = c[1].to_string();
            }
        }
        for c in self.trace_re.captures_iter(output) {
            if !out.trace_timestamp.is_empty() {
                out.trace_timestamp.push('-');
            }
            out.trace_timestamp.push_str(&c[1]);
        }
        if let Some(c) = self.param_re.captures(output) {
            out.system_param = c[1].to_string();
        }

        out
    }
}

/// Try to interpret one-shot output as a nested framed result event.
///
/// Children are allowed to chat before the frame, so the scan starts at
/// the first frame magic. Trailing bytes after the frame are ignored.
pub fn parse_nested_event(output: &[u8]) -> Option<Event> {
    let magic = FRAME_HEADER.as_bytes();
    let start = output.windows(magic.len()).position(|w| w == magic)?;
    let header = &output[start..];
    let payload_len = frame::parse_header(header).ok()?;
    let payload = header.get(FRAME_HEADER_LEN..FRAME_HEADER_LEN + payload_len)?;
    frame::parse_payload(payload).ok()
}

/// Lift `name:value` lines out of standard-response output. The result
/// event carries these as named parameters.
pub fn standard_params(output: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in output.lines() {
        if let Some((name, value)) = line.split_once(':') {
            if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                out.push((name.to_string(), value.to_string()));
            }
        }
    }
    out
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;

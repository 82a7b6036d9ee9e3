// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot execution: spawn per event, collect output, wait.

use crate::command_line::CommandSpec;
use crate::gate::ChildGate;
use crate::ExecError;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use txp_core::ResourceLimits;

/// What one execution produced.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    /// Child exited with status 0.
    pub success: bool,
    /// Exit status when the child exited; -1 when signaled.
    pub exit_status: i32,
    /// Terminating signal, when there was one.
    pub term_signal: Option<i32>,
    /// Concatenated stdout + stderr bytes.
    pub output: Vec<u8>,
}

impl ExecOutcome {
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Run one command to completion.
///
/// The child pid is armed on `gate` for the duration of the run so the
/// supervisor can TERM/KILL an overrun; a killed child surfaces here as
/// a signaled exit, not an error.
pub async fn run_one_shot(
    spec: &CommandSpec,
    limits: &ResourceLimits,
    gate: &ChildGate,
) -> Result<ExecOutcome, ExecError> {
    let mut cmd = tokio::process::Command::new(&spec.program);
    cmd.args(&spec.args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    crate::limits::apply_limits(&mut cmd, limits);

    let mut child = cmd.spawn().map_err(|source| ExecError::SpawnFailed {
        command: spec.program.clone(),
        source,
    })?;

    if let Some(pid) = child.id() {
        gate.arm(pid);
    }

    // Drain both pipes concurrently, then reap. Reading before waiting
    // avoids a full-pipe deadlock on chatty children.
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let out_pipe = child.stdout.take();
    let err_pipe = child.stderr.take();
    let read_out = async {
        if let Some(mut pipe) = out_pipe {
            let _ = pipe.read_to_end(&mut stdout).await;
        }
    };
    let read_err = async {
        if let Some(mut pipe) = err_pipe {
            let _ = pipe.read_to_end(&mut stderr).await;
        }
    };
    tokio::join!(read_out, read_err);

    let status = child.wait().await;
    gate.disarm();
    let status = status?;

    let mut output = stdout;
    output.extend_from_slice(&stderr);

    Ok(ExecOutcome {
        success: status.success(),
        exit_status: status.code().unwrap_or(-1),
        term_signal: status.signal(),
        output,
    })
}

#[cfg(test)]
#[path = "oneshot_tests.rs"]
mod tests;

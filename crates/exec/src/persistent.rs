// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent-app driver.
//!
//! The child is spawned once per worker with three pipes and serves many
//! events: one framed event in on stdin, exactly one framed event out on
//! stdout per request. Stderr is free-form diagnostics, drained to the
//! log and never parsed. Right after a successful spawn the child is
//! told who it is via a synthetic `startupinfo` command event.

use crate::gate::ChildGate;
use crate::ExecError;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use txp_core::{frame, Command, Event, ResourceLimits, FRAME_HEADER_LEN};

/// Grace period between SIGTERM and SIGKILL on terminate.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Exit summary of a persistent child.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChildExit {
    pub exit_status: i32,
    pub term_signal: Option<i32>,
}

#[derive(Debug)]
pub struct PersistentChild {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    pid: u32,
    command_line: String,
    gate: ChildGate,
}

impl PersistentChild {
    /// Spawn the configured persistent application.
    ///
    /// The command line is split on whitespace — persistent apps are
    /// configured as a program path plus simple flags; anything needing
    /// shell quoting belongs in a wrapper script.
    pub async fn spawn(
        command_line: &str,
        limits: &ResourceLimits,
        gate: ChildGate,
        queue: &str,
    ) -> Result<Self, ExecError> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next().ok_or(ExecError::NoScript)?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(parts);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        crate::limits::apply_limits(&mut cmd, limits);

        let mut child = cmd.spawn().map_err(|source| ExecError::SpawnFailed {
            command: program.to_string(),
            source,
        })?;

        let pid = child.id().unwrap_or_default();
        let stdin = child.stdin.take().ok_or(ExecError::ChildGone)?;
        let stdout = BufReader::new(child.stdout.take().ok_or(ExecError::ChildGone)?);

        // Drain stderr in the background; it is diagnostics only.
        if let Some(stderr) = child.stderr.take() {
            let queue = queue.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::info!(queue, pid, "persistent stderr: {}", line);
                }
            });
        }

        gate.arm(pid);

        tracing::info!(queue, pid, command = command_line, "persistent child spawned");
        Ok(Self {
            child,
            stdin,
            stdout,
            pid,
            command_line: command_line.to_string(),
            gate,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Write one framed event to the child's stdin.
    pub async fn send(&mut self, event: &Event) -> Result<(), ExecError> {
        let bytes = frame::serialize(event)?;
        self.stdin.write_all(&bytes).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Read the next response frame from the child's stdout.
    ///
    /// A response is never a command event; apps that ack or echo
    /// control traffic (`startupinfo`, exit-when-done) put command
    /// frames on stdout, which are logged and skipped here.
    pub async fn recv(&mut self) -> Result<Event, ExecError> {
        loop {
            let event = self.recv_frame().await?;
            if event.is_command() {
                tracing::debug!(pid = self.pid, "skipping command frame from persistent app");
                continue;
            }
            return Ok(event);
        }
    }

    /// Read exactly one framed event from the child's stdout.
    /// EOF means the child is gone.
    async fn recv_frame(&mut self) -> Result<Event, ExecError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        if let Err(e) = self.stdout.read_exact(&mut header).await {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Err(ExecError::ChildGone);
            }
            return Err(e.into());
        }
        let payload_len = frame::parse_header(&header)?;
        let mut payload = vec![0u8; payload_len];
        if let Err(e) = self.stdout.read_exact(&mut payload).await {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Err(ExecError::ChildGone);
            }
            return Err(e.into());
        }
        Ok(frame::parse_payload(&payload)?)
    }

    /// One request, one response.
    pub async fn request(&mut self, event: &Event) -> Result<Event, ExecError> {
        self.send(event).await?;
        self.recv().await
    }

    /// The post-spawn identity handshake: the app learns its queue and
    /// worker id before the first work event arrives.
    pub async fn send_startup_info(&mut self, queue: &str, worker_pid: u32) -> Result<(), ExecError> {
        let mut cmd = Event::command(Command::PersistentApp);
        cmd.params.set("cmd", "startupinfo");
        cmd.params.set("ownqueue", queue);
        cmd.params.set("workerpid", txp_core::ParamValue::UInt(worker_pid as u64));
        self.send(&cmd).await
    }

    /// Reap the child after it died on its own.
    pub async fn wait_exit(&mut self) -> ChildExit {
        let status = self.child.wait().await;
        self.gate.disarm();
        match status {
            Ok(status) => {
                use std::os::unix::process::ExitStatusExt;
                ChildExit {
                    exit_status: status.code().unwrap_or(-1),
                    term_signal: status.signal(),
                }
            }
            Err(_) => ChildExit::default(),
        }
    }

    /// Cooperative shutdown: SIGTERM, bounded wait, SIGKILL.
    pub async fn terminate(&mut self) -> ChildExit {
        self.gate.term();
        match tokio::time::timeout(TERM_GRACE, self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                self.gate.kill();
            }
        }
        self.wait_exit().await
    }
}

#[cfg(test)]
#[path = "persistent_tests.rs"]
mod tests;

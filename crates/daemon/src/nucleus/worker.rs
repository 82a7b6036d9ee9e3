// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One worker: a task owning one external child process.
//!
//! The worker pulls events off its pool channel, executes work events
//! through its child (one-shot or persistent), emits exactly one result
//! per work event plus a `worker-done` envelope, and drives the
//! recovery ledger when execution fails. Commands are handled out of
//! band and produce neither results nor dones.

use crate::nucleus::management;
use crate::nucleus::{ExecSettings, NucleusMsg};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use txp_core::{Clock, Command, Event, EventKind, ParamValue, QueueDescriptor};
use txp_exec::{
    parse_nested_event, run_one_shot, standard_params, ChildGate, CommandSpec, ExecError,
    PersistentChild,
};
use txp_recovery::RecoveryLog;

/// Depth of the pool→worker channel: one work event at a time plus
/// queued commands.
pub(crate) const WORKER_CHANNEL_DEPTH: usize = 64;

/// Everything a pool needs to spawn workers.
pub(crate) struct WorkerCtx<C: Clock> {
    pub msgs: mpsc::Sender<NucleusMsg>,
    pub exec: Arc<ExecSettings>,
    pub clock: C,
    /// Base directory of the recovery ledger; each worker opens its own
    /// handle so a wedged sibling cannot poison its writes.
    pub recovery_dir: PathBuf,
}

impl<C: Clock> WorkerCtx<C> {
    /// Spawn a worker task. Returns its channel and child gate.
    pub(crate) fn spawn_worker(
        &self,
        id: u32,
        desc: &QueueDescriptor,
    ) -> Result<(mpsc::Sender<Event>, ChildGate), txp_recovery::RecoveryError> {
        let (tx, rx) = mpsc::channel(WORKER_CHANNEL_DEPTH);
        let gate = ChildGate::new();
        let recovery = RecoveryLog::open(&self.recovery_dir)?;
        let worker = Worker {
            id,
            desc: desc.clone(),
            rx,
            msgs: self.msgs.clone(),
            exec: Arc::clone(&self.exec),
            clock: self.clock.clone(),
            gate: gate.clone(),
            recovery,
            persistent: None,
            exit_when_done: false,
            max_exec_time: desc.max_exec_time,
        };
        tokio::spawn(worker.run());
        Ok((tx, gate))
    }
}

/// What one execution produced, normalized across both child modes.
#[derive(Default)]
struct WorkOutcome {
    success: bool,
    result_text: String,
    error_string: String,
    trace_timestamp: String,
    failure_cause: String,
    system_param: String,
    /// A full result event the child handed back (nested frame in
    /// one-shot output, or the persistent app's reply).
    result_event: Option<Event>,
}

impl WorkOutcome {
    fn failed(cause: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            failure_cause: cause.to_string(),
            error_string: error.into(),
            ..Self::default()
        }
    }
}

enum Flow {
    Continue,
    Exit,
}

struct Worker<C: Clock> {
    id: u32,
    desc: QueueDescriptor,
    rx: mpsc::Receiver<Event>,
    msgs: mpsc::Sender<NucleusMsg>,
    exec: Arc<ExecSettings>,
    clock: C,
    gate: ChildGate,
    recovery: RecoveryLog,
    persistent: Option<PersistentChild>,
    exit_when_done: bool,
    max_exec_time: u64,
}

impl<C: Clock> Worker<C> {
    async fn run(mut self) {
        if self.desc.is_persistent() && !self.spawn_persistent().await {
            tracing::error!(queue = self.desc.name, worker = self.id, "initial spawn failed");
            // throttle the respawn cycle the pool will start on exit
            tokio::time::sleep(std::time::Duration::from_secs(self.desc.respawn_delay.max(1)))
                .await;
            self.announce_exit().await;
            return;
        }

        while let Some(event) = self.rx.recv().await {
            let flow = if event.is_command() {
                self.handle_command(event).await
            } else {
                self.handle_work(event).await;
                // a persistent worker draining out lives only as long as
                // its child
                if self.exit_when_done && self.desc.is_persistent() && self.persistent.is_none() {
                    Flow::Exit
                } else {
                    Flow::Continue
                }
            };
            if matches!(flow, Flow::Exit) {
                break;
            }
        }

        if let Some(mut child) = self.persistent.take() {
            child.terminate().await;
        }
        self.announce_exit().await;
    }

    async fn announce_exit(&self) {
        let _ = self
            .msgs
            .send(NucleusMsg::WorkerExited { queue: self.desc.name.clone(), worker_id: self.id })
            .await;
    }

    async fn emit(&self, event: Event) {
        let _ = self.msgs.send(NucleusMsg::Emit(event)).await;
    }

    // -- commands ----------------------------------------------------

    async fn handle_command(&mut self, event: Event) -> Flow {
        let cmd = event.command_id();
        tracing::debug!(queue = self.desc.name, worker = self.id, %cmd, "command");
        match cmd {
            Command::Shutdown => {
                if let Some(mut child) = self.persistent.take() {
                    child.terminate().await;
                }
                Flow::Exit
            }
            Command::ExitWhenDone => {
                self.exit_when_done = true;
                if let Some(child) = self.persistent.as_mut() {
                    let _ = child.send(&event).await;
                    // the app owns its exit; wait for it, then leave
                    let _ = child.wait_exit().await;
                    self.persistent = None;
                    return Flow::Exit;
                }
                Flow::Continue
            }
            Command::EndOfQueue => {
                if let Some(child) = self.persistent.as_mut() {
                    let _ = child.send(&event).await;
                }
                Flow::Continue
            }
            Command::PersistentApp => {
                match self.persistent.as_mut() {
                    Some(child) => {
                        let _ = child.send(&event).await;
                    }
                    None => {
                        tracing::warn!(
                            queue = self.desc.name,
                            "persistent-app command on a one-shot worker"
                        );
                    }
                }
                Flow::Continue
            }
            Command::ReopenLog => {
                if let Err(e) = self.recovery.reopen() {
                    tracing::error!(error = %e, "worker failed to reopen recovery log");
                }
                Flow::Continue
            }
            Command::WorkerConf => {
                if event.params.get_str("cmd") == Some("updatemaxexectime") {
                    if let Some(v) = param_u64(&event, "val") {
                        self.max_exec_time = v;
                        tracing::info!(
                            queue = self.desc.name,
                            worker = self.id,
                            limit = v,
                            "max execution time updated"
                        );
                    }
                }
                Flow::Continue
            }
            Command::Stats | Command::ResetStats => Flow::Continue,
            other => {
                tracing::warn!(queue = self.desc.name, cmd = %other, "unhandled worker command");
                Flow::Continue
            }
        }
    }

    // -- work --------------------------------------------------------

    async fn handle_work(&mut self, mut event: Event) {
        let now = self.clock.epoch_secs();
        if event.expired || event.is_expired(now) {
            // the pool checks expiry at admission and before dispatch;
            // this catches the event that aged out in between
            event.expired = true;
            let outcome = WorkOutcome::failed("expired", "");
            self.send_result(&mut event, outcome, 0).await;
            self.send_done_expired().await;
            return;
        }

        event.append_trace(&format!("->q:{} w:{} t:{};", self.desc.name, self.id, now));

        let started = self.clock.now();
        let outcome = if self.desc.is_persistent() {
            self.exec_persistent(&event).await
        } else {
            self.exec_one_shot(&event).await
        };
        let elapsed = started.elapsed().as_secs();

        if self.max_exec_time > 0 && elapsed > self.max_exec_time {
            tracing::warn!(
                queue = self.desc.name,
                worker = self.id,
                elapsed,
                limit = self.max_exec_time,
                "execution exceeded the configured time limit"
            );
        }

        // events no child can run (wrong kind for this queue) are not
        // durable failures: rerouting or recovering them would only
        // replay the same mismatch
        let mut wrote_recovery = false;
        if !outcome.success && outcome.failure_cause != "unsupportedEventType" {
            wrote_recovery = self.fail_path(&mut event, &outcome).await;
        }

        tracing::info!(
            queue = self.desc.name,
            worker = self.id,
            reference = event.reference,
            success = outcome.success,
            elapsed,
            cause = outcome.failure_cause,
            "executed"
        );

        self.send_result(&mut event, outcome, elapsed).await;
        self.send_done(elapsed, wrote_recovery).await;
    }

    async fn exec_one_shot(&mut self, event: &Event) -> WorkOutcome {
        let spec = match CommandSpec::build(
            event,
            &self.exec.shell_path,
            &self.exec.interpreter_path,
            &self.desc.default_script,
        ) {
            Ok(spec) => spec,
            Err(ExecError::NoScript) => {
                return WorkOutcome::failed("noScript", "no script on event or queue")
            }
            Err(ExecError::UnsupportedKind(kind)) => {
                return WorkOutcome::failed(
                    "unsupportedEventType",
                    format!("cannot execute {} events here", kind),
                )
            }
            Err(e) => return WorkOutcome::failed("execFailure", e.to_string()),
        };
        tracing::debug!(queue = self.desc.name, worker = self.id, cmd = spec.render(), "spawning");

        let run = match run_one_shot(&spec, &self.desc.limits, &self.gate).await {
            Ok(run) => run,
            Err(e) => return WorkOutcome::failed("execFailure", e.to_string()),
        };

        let text = run.output_text();
        let mut out = WorkOutcome { result_text: text.clone(), ..WorkOutcome::default() };

        if run.success && self.desc.parse_response_for_object {
            if let Some(nested) = parse_nested_event(&run.output) {
                out.success = nested.sys.success;
                out.failure_cause = nested.sys.failure_cause.clone();
                out.error_string = nested.sys.error_string.clone();
                out.result_event = Some(nested);
                return out;
            }
        }

        if run.success {
            if event.sys.standard_response {
                let scan = self.exec.markers.scan(true, &text);
                out.success = scan.success;
                out.failure_cause = scan.failure_cause;
                out.error_string = scan.error_string;
                out.trace_timestamp = scan.trace_timestamp;
                out.system_param = scan.system_param;
            } else {
                out.success = true;
            }
        } else {
            out.success = false;
            out.failure_cause = match run.term_signal {
                Some(sig) => signal_name(sig),
                None => "execFailure".to_string(),
            };
            if event.sys.standard_response {
                let scan = self.exec.markers.scan(false, &text);
                out.error_string = scan.error_string;
                out.trace_timestamp = scan.trace_timestamp;
                out.system_param = scan.system_param;
            }
        }
        out
    }

    async fn exec_persistent(&mut self, event: &Event) -> WorkOutcome {
        if self.persistent.is_none() && !self.spawn_persistent().await {
            return WorkOutcome::failed("persistentSpawn", "persistent app failed to start");
        }
        let Some(child) = self.persistent.as_mut() else {
            return WorkOutcome::failed("persistentSpawn", "persistent app failed to start");
        };

        match child.request(event).await {
            Ok(reply) => {
                let mut out = WorkOutcome {
                    success: reply.sys.success,
                    result_text: reply.sys.result.clone(),
                    error_string: reply.sys.error_string.clone(),
                    trace_timestamp: reply.trace_timestamp.clone(),
                    system_param: reply.sys.system_param.clone(),
                    failure_cause: reply.sys.failure_cause.clone(),
                    result_event: Some(reply),
                };
                if !out.success && out.failure_cause.is_empty() {
                    out.failure_cause = "appFailure".to_string();
                }
                out
            }
            Err(e) => {
                tracing::warn!(
                    queue = self.desc.name,
                    worker = self.id,
                    error = %e,
                    "persistent app died during request"
                );
                self.reap_persistent("persistentAppDied").await;
                WorkOutcome::failed("persistentAppDied", "persistent app died during request")
            }
        }
    }

    // -- persistent child lifecycle ----------------------------------

    async fn spawn_persistent(&mut self) -> bool {
        match PersistentChild::spawn(
            &self.desc.persistent_app,
            &self.desc.limits,
            self.gate.clone(),
            &self.desc.name,
        )
        .await
        {
            Ok(mut child) => {
                if let Err(e) = child.send_startup_info(&self.desc.name, self.id).await {
                    tracing::warn!(error = %e, "startupinfo handshake failed");
                }
                if let Some(m) = management::persistent_startup(
                    &self.desc,
                    self.id,
                    child.pid(),
                    child.command_line(),
                ) {
                    self.emit(m).await;
                }
                self.persistent = Some(child);
                true
            }
            Err(e) => {
                tracing::error!(
                    queue = self.desc.name,
                    worker = self.id,
                    error = %e,
                    "failed to spawn persistent app"
                );
                false
            }
        }
    }

    /// Reap a died persistent child, emit the management event, then
    /// respawn after the configured delay unless the pool is draining.
    async fn reap_persistent(&mut self, cause: &str) {
        let Some(mut child) = self.persistent.take() else {
            return;
        };
        let child_pid = child.pid();
        let command_line = child.command_line().to_string();
        let exit = child.wait_exit().await;

        if let Some(m) = management::persistent_died(
            &self.desc,
            self.id,
            child_pid,
            &command_line,
            exit.exit_status,
            exit.term_signal,
            "",
            cause,
        ) {
            self.emit(m).await;
        }

        if self.exit_when_done {
            return;
        }

        if self.desc.respawn_delay > 0 {
            tokio::time::sleep(std::time::Duration::from_secs(self.desc.respawn_delay)).await;
        }
        self.spawn_persistent().await;
    }

    // -- failure, result, done ---------------------------------------

    /// Durability for a failed event: reroute to the error queue when
    /// one is configured, else a recovery entry while retries remain.
    /// Returns whether a recovery entry was written.
    async fn fail_path(&mut self, event: &mut Event, outcome: &WorkOutcome) -> bool {
        if !self.desc.error_queue.is_empty() {
            let mut rerouted = event.clone();
            rerouted.kind = EventKind::Error;
            rerouted.dest_queue = self.desc.error_queue.clone();
            rerouted.sys.error_string = outcome.error_string.clone();
            rerouted.sys.failure_cause = outcome.failure_cause.clone();
            self.emit(rerouted).await;
            return false;
        }

        if !event.retry_exceeded(self.desc.max_retries) {
            event.retries += 1;
            let reason = if outcome.failure_cause.starts_with("SIG") {
                outcome.failure_cause.as_str()
            } else {
                "exec_fail"
            };
            if let Err(e) = self.recovery.write_entry(event, reason, "worker", "worker") {
                tracing::error!(error = %e, "recovery write failed");
                return false;
            }
            return true;
        }

        tracing::info!(event = %event, "retries exceeded, dropping event");
        false
    }

    async fn send_result(&mut self, event: &mut Event, outcome: WorkOutcome, elapsed: u64) {
        if !event.return_route.is_empty() {
            // drop the hop being used to reach the originator
            event.return_route.pop();

            let mut result = match outcome.result_event {
                Some(nested) => nested,
                None => {
                    let mut r = Event::new(EventKind::Result);
                    r.sys.success = outcome.success;
                    r.sys.result = outcome.result_text.clone();
                    r.sys.error_string = outcome.error_string.clone();
                    r.sys.failure_cause = outcome.failure_cause.clone();
                    r.sys.system_param = outcome.system_param.clone();
                    r.trace_timestamp = outcome.trace_timestamp.clone();
                    if event.sys.standard_response {
                        for (name, value) in standard_params(&outcome.result_text) {
                            r.params.set(name, value);
                        }
                    }
                    r
                }
            };
            result.reference = event.reference.clone();
            result.sys.elapsed_time = elapsed;
            result.return_route = event.return_route.clone();
            result.dest_queue.clear();
            // whatever the child labeled its reply, to the originator it
            // is a result
            if !matches!(result.kind, EventKind::Result | EventKind::Reply) {
                result.kind = EventKind::Result;
            }
            self.emit(result).await;
            return;
        }

        // no reply expected: a child-produced result object may still be
        // queued onward if it names a destination
        if let Some(result) = outcome.result_event {
            if !result.dest_queue.is_empty() {
                self.emit(result).await;
            }
        }
    }

    async fn send_done(&mut self, elapsed: u64, wrote_recovery: bool) {
        let mut done = Event::new(EventKind::WorkerDone);
        done.sys.elapsed_time = elapsed;
        done.sys.recovery_written = wrote_recovery;
        self.post_done(done).await;
    }

    /// Done envelope for an event refused without execution; the pool
    /// keeps it out of the exec statistics.
    async fn send_done_expired(&mut self) {
        let mut done = Event::new(EventKind::WorkerDone);
        done.sys.failure_cause = "expired".to_string();
        self.post_done(done).await;
    }

    async fn post_done(&mut self, done: Event) {
        let _ = self
            .msgs
            .send(NucleusMsg::WorkerDone {
                queue: self.desc.name.clone(),
                worker_id: self.id,
                done,
            })
            .await;
    }
}

fn param_u64(event: &Event, name: &str) -> Option<u64> {
    match event.params.get(name) {
        Some(ParamValue::UInt(v)) => Some(*v),
        Some(ParamValue::Int(v)) if *v >= 0 => Some(*v as u64),
        Some(ParamValue::Str(s)) => s.parse().ok(),
        _ => None,
    }
}

fn signal_name(sig: i32) -> String {
    match sig {
        9 => "SIGKILL".to_string(),
        15 => "SIGTERM".to_string(),
        other => format!("signal{}", other),
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-queue supervisor: a FIFO of pending events and the set of
//! worker slots it feeds.
//!
//! The pool is plain state owned by the nucleus loop — workers talk
//! back through the nucleus message channel, never to the pool
//! directly. Every mutating operation pushes the events it wants routed
//! (management events, failure results) into the caller's `out` vector.

use crate::nucleus::management;
use crate::nucleus::stats::QueueLogger;
use crate::nucleus::worker::WorkerCtx;
use crate::nucleus::{failure_result, NucleusError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use txp_core::{Clock, Command, Event, QueueDescriptor, QueueKind};
use txp_exec::ChildGate;
use txp_recovery::RecoveryLog;

struct WorkerSlot {
    tx: mpsc::Sender<Event>,
    gate: ChildGate,
    busy: bool,
    terminal: bool,
    busy_since: u64,
    /// SIGTERM already delivered by the overrun check; the next pass
    /// escalates to SIGKILL.
    termed: bool,
    /// The event being executed, kept so a crashed worker's work can be
    /// recovered. Held from dispatch until the done envelope.
    in_flight: Option<Event>,
}

#[derive(Default)]
struct PoolStats {
    recovery_events: u64,
    acc_queue_time: u64,
    max_queue_time: u64,
    count_queue_events: u64,
    acc_exec_time: u64,
    max_exec_time: u64,
    count_exec_events: u64,
}

pub(crate) struct WorkerPool<C: Clock> {
    pub desc: QueueDescriptor,
    ctx: WorkerCtx<C>,
    ids: Arc<AtomicU32>,
    logger: Arc<QueueLogger>,
    fifo: VecDeque<Event>,
    slots: HashMap<u32, WorkerSlot>,
    idle: VecDeque<u32>,
    stats: PoolStats,
    now: u64,
    frozen: bool,
    shutdown: bool,
    shutdown_calls: u32,
    exit_when_done: bool,
    dropped: bool,
}

impl<C: Clock> WorkerPool<C> {
    /// Create the pool and its initial workers. Management
    /// worker-startup events land in `out`.
    pub fn new(
        desc: QueueDescriptor,
        ctx: WorkerCtx<C>,
        ids: Arc<AtomicU32>,
        logger: Arc<QueueLogger>,
        out: &mut Vec<Event>,
    ) -> Result<Self, NucleusError> {
        let mut pool = Self {
            desc,
            ctx,
            ids,
            logger,
            fifo: VecDeque::new(),
            slots: HashMap::new(),
            idle: VecDeque::new(),
            stats: PoolStats::default(),
            now: 0,
            frozen: false,
            shutdown: false,
            shutdown_calls: 0,
            exit_when_done: false,
            dropped: false,
        };
        pool.now = pool.ctx.clock.epoch_secs();
        for _ in 0..pool.desc.workers {
            let id = pool.spawn_slot()?;
            out.extend(management::worker_startup(&pool.desc, 0, id));
        }
        pool.logger.append(
            &pool.desc.name,
            &format!("pool created workers={} maxExecTime={}", pool.desc.workers, pool.desc.max_exec_time),
        );
        Ok(pool)
    }

    fn spawn_slot(&mut self) -> Result<u32, NucleusError> {
        let id = self.ids.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, gate) = self.ctx.spawn_worker(id, &self.desc)?;
        self.slots.insert(
            id,
            WorkerSlot {
                tx,
                gate,
                busy: false,
                terminal: false,
                busy_since: 0,
                termed: false,
                in_flight: None,
            },
        );
        self.idle.push_back(id);
        tracing::info!(queue = self.desc.name, worker = id, "worker started");
        Ok(id)
    }

    // -- accessors ---------------------------------------------------

    pub fn set_now(&mut self, now: u64) {
        self.now = now;
    }

    pub fn total_workers(&self) -> usize {
        self.slots.len()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn busy_count(&self) -> usize {
        self.slots.values().filter(|s| s.busy).count()
    }

    pub fn queue_len(&self) -> usize {
        self.fifo.len()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    /// Nothing queued and nobody executing.
    pub fn is_drained(&self) -> bool {
        self.fifo.is_empty() && self.slots.values().all(|s| !s.busy)
    }

    /// Every worker task has exited.
    pub fn is_stopped(&self) -> bool {
        self.slots.is_empty()
    }

    // -- admission & dispatch ----------------------------------------

    /// Admit one event. Expired events fail straight away; frozen or
    /// full queues reject with a recovery entry. Either way a failure
    /// result (if a reply is expected) is pushed to `out`.
    pub fn submit(&mut self, mut event: Event, recovery: &mut RecoveryLog, out: &mut Vec<Event>) {
        if event.is_expired(self.now) {
            self.expire_event(event, out);
            return;
        }
        if self.frozen || self.fifo.len() >= self.desc.max_length {
            let reason = if self.frozen { "frozen" } else { "queue_full" };
            if let Err(e) = recovery.write_entry(&event, reason, "nucleus", &self.desc.name) {
                tracing::error!(error = %e, "recovery write failed on rejection");
            }
            self.stats.recovery_events += 1;
            self.logger.append(
                &self.desc.name,
                &format!("rejected ref:{} reason:{}", event.reference, reason),
            );
            out.extend(failure_result(&mut event, reason));
            return;
        }

        event.queue_time = self.now;
        // an inbound readyTime is an offset from now; pin it
        if event.ready_time > 0 {
            event.ready_time += self.now;
        }
        self.fifo.push_back(event);
        self.feed(out);
    }

    /// Hand queued events to eligible idle workers until one side runs
    /// dry. Expiry is re-checked here so an event that aged out while
    /// queued never occupies a worker slot. Straight queues are strictly
    /// FIFO (a head that is not ready yet holds the queue); collection
    /// queues dispatch to the worker an event is pinned to.
    pub fn feed(&mut self, out: &mut Vec<Event>) {
        loop {
            if self.fifo.is_empty() || self.idle.is_empty() {
                return;
            }
            let (event, worker_id) = match self.desc.kind {
                QueueKind::Straight => {
                    let Some(front) = self.fifo.front() else { return };
                    if front.is_expired(self.now) {
                        if let Some(event) = self.fifo.pop_front() {
                            self.expire_event(event, out);
                        }
                        continue;
                    }
                    if front.ready_time > self.now {
                        return;
                    }
                    let Some(event) = self.fifo.pop_front() else { return };
                    let Some(worker_id) = self.idle.pop_front() else {
                        self.fifo.push_front(event);
                        return;
                    };
                    (event, worker_id)
                }
                QueueKind::Collection => {
                    let now = self.now;
                    if let Some(pos) = self.fifo.iter().position(|e| e.is_expired(now)) {
                        if let Some(event) = self.fifo.remove(pos) {
                            self.expire_event(event, out);
                        }
                        continue;
                    }
                    let idle = &self.idle;
                    let pos = self.fifo.iter().position(|e| {
                        e.ready_time <= now && idle.contains(&e.worker_pid)
                    });
                    let Some(pos) = pos else { return };
                    let Some(event) = self.fifo.remove(pos) else { return };
                    let worker_id = event.worker_pid;
                    self.idle.retain(|id| *id != worker_id);
                    (event, worker_id)
                }
            };
            self.dispatch(event, worker_id, out);
        }
    }

    /// The expired failure path: no execution, no retry, no recovery
    /// entry — just a failure result for originators that expect one.
    fn expire_event(&mut self, mut event: Event, out: &mut Vec<Event>) {
        event.expired = true;
        self.logger.append(&self.desc.name, &format!("expired ref:{}", event.reference));
        out.extend(failure_result(&mut event, "expired"));
    }

    fn dispatch(&mut self, event: Event, worker_id: u32, _out: &mut Vec<Event>) {
        let Some(slot) = self.slots.get_mut(&worker_id) else {
            tracing::error!(queue = self.desc.name, worker = worker_id, "dispatch to unknown slot");
            self.fifo.push_front(event);
            return;
        };

        let waited = self.now.saturating_sub(event.queue_time);
        self.stats.acc_queue_time += waited;
        self.stats.max_queue_time = self.stats.max_queue_time.max(waited);
        self.stats.count_queue_events += 1;

        slot.busy = true;
        slot.busy_since = self.now;
        slot.termed = false;
        slot.in_flight = Some(event.clone());

        self.logger.append(
            &self.desc.name,
            &format!("dispatch ref:{} worker:{}", event.reference, worker_id),
        );

        if let Err(e) = slot.tx.try_send(event) {
            tracing::error!(
                queue = self.desc.name,
                worker = worker_id,
                error = %e,
                "worker channel refused an event"
            );
            // put the slot back; the event is inside the error
            let event = match e {
                mpsc::error::TrySendError::Full(ev) | mpsc::error::TrySendError::Closed(ev) => ev,
            };
            slot.busy = false;
            slot.in_flight = None;
            self.fifo.push_front(event);
        }
    }

    /// A worker finished its event. Idempotent for a worker that is
    /// already idle (logged and ignored).
    pub fn release(&mut self, worker_id: u32, done: &Event, out: &mut Vec<Event>) {
        let Some(slot) = self.slots.get_mut(&worker_id) else {
            tracing::warn!(queue = self.desc.name, worker = worker_id, "release for unknown worker");
            return;
        };
        if !slot.busy {
            tracing::warn!(queue = self.desc.name, worker = worker_id, "release for idle worker ignored");
            return;
        }

        slot.busy = false;
        slot.in_flight = None;
        if !slot.terminal {
            self.idle.push_back(worker_id);
        }

        // a done envelope for an event the worker refused as expired
        // marks work that never ran; it must not count as an execution
        if done.sys.failure_cause != "expired" {
            let elapsed = done.sys.elapsed_time;
            self.stats.acc_exec_time += elapsed;
            self.stats.max_exec_time = self.stats.max_exec_time.max(elapsed);
            self.stats.count_exec_events += 1;
        }
        if done.sys.recovery_written {
            self.stats.recovery_events += 1;
        }

        self.feed(out);
    }

    /// A worker task ended. Recovers any in-flight event, then either
    /// respawns the slot or lets the pool shrink.
    pub fn worker_exited(
        &mut self,
        worker_id: u32,
        recovery: &mut RecoveryLog,
        out: &mut Vec<Event>,
    ) {
        let Some(slot) = self.slots.remove(&worker_id) else {
            return;
        };
        self.idle.retain(|id| *id != worker_id);

        if let Some(event) = slot.in_flight {
            tracing::warn!(
                queue = self.desc.name,
                worker = worker_id,
                reference = event.reference,
                "recovering in-flight event of dead worker"
            );
            if let Err(e) = recovery.write_entry(&event, "worker_crash", "pool", &self.desc.name) {
                tracing::error!(error = %e, "recovery write failed for crashed worker");
            }
            self.stats.recovery_events += 1;
        }

        if !slot.terminal && !self.shutdown {
            match self.spawn_slot() {
                Ok(new_id) => {
                    self.logger.append(
                        &self.desc.name,
                        &format!("worker {} respawned as {}", worker_id, new_id),
                    );
                    out.extend(management::worker_startup(&self.desc, worker_id, new_id));
                }
                Err(e) => {
                    tracing::error!(queue = self.desc.name, error = %e, "respawn failed");
                }
            }
        } else {
            self.logger.append(&self.desc.name, &format!("worker {} retired", worker_id));
            out.extend(management::worker_startup(&self.desc, worker_id, 0));
        }

        self.feed(out);
    }

    // -- supervision -------------------------------------------------

    /// Adjust the pool to `new_count` workers. Shrinking retires idle
    /// workers first, then marks busy ones terminal so they exit after
    /// their current event. Returns the signed delta.
    pub fn resize(&mut self, new_count: u32, out: &mut Vec<Event>) -> i64 {
        let current = self.slots.len() as i64;
        let delta = new_count as i64 - current;
        tracing::info!(queue = self.desc.name, from = current, to = new_count, "resize");
        self.desc.workers = new_count;

        if delta > 0 {
            for _ in 0..delta {
                match self.spawn_slot() {
                    Ok(id) => out.extend(management::worker_startup(&self.desc, 0, id)),
                    Err(e) => tracing::error!(error = %e, "grow failed"),
                }
            }
        } else if delta < 0 {
            let mut to_kill = (-delta) as usize;
            while to_kill > 0 {
                let Some(id) = self.idle.pop_front() else { break };
                if let Some(slot) = self.slots.get_mut(&id) {
                    slot.terminal = true;
                    let _ = slot.tx.try_send(Event::command(Command::Shutdown));
                }
                to_kill -= 1;
            }
            // the rest must come from busy workers
            for slot in self.slots.values_mut() {
                if to_kill == 0 {
                    break;
                }
                if slot.busy && !slot.terminal {
                    slot.terminal = true;
                    let _ = slot.tx.try_send(Event::command(Command::Shutdown));
                    to_kill -= 1;
                }
            }
            if to_kill != 0 {
                tracing::warn!(queue = self.desc.name, remaining = to_kill, "resize shortfall");
            }
        }
        delta
    }

    /// TERM an overrunning child on the first pass, KILL on the next.
    pub fn check_overruns(&mut self) {
        let limit = self.desc.max_exec_time;
        if limit == 0 {
            return;
        }
        for (id, slot) in self.slots.iter_mut() {
            if !slot.busy || self.now.saturating_sub(slot.busy_since) <= limit {
                continue;
            }
            if slot.termed {
                tracing::warn!(queue = self.desc.name, worker = *id, "overrun: escalating to SIGKILL");
                slot.gate.kill();
            } else {
                tracing::warn!(queue = self.desc.name, worker = *id, "overrun: sending SIGTERM");
                slot.gate.term();
                slot.termed = true;
            }
        }
    }

    /// Fail queued events that are past their deadline without running
    /// them.
    pub fn scan_for_expired(&mut self, out: &mut Vec<Event>) {
        let now = self.now;
        let before = self.fifo.len();
        let mut kept = VecDeque::with_capacity(before);
        while let Some(event) = self.fifo.pop_front() {
            if event.is_expired(now) {
                self.expire_event(event, out);
            } else {
                kept.push_back(event);
            }
        }
        let dropped = before - kept.len();
        if dropped > 0 {
            tracing::info!(queue = self.desc.name, dropped, "expired events failed");
        }
        self.fifo = kept;
    }

    pub fn freeze(&mut self, frozen: bool) {
        self.frozen = frozen;
        tracing::info!(queue = self.desc.name, frozen, "freeze state changed");
    }

    pub fn set_max_queue_length(&mut self, len: usize) {
        self.desc.max_length = len;
    }

    /// Update the execution ceiling and tell the workers.
    pub fn set_max_exec_time(&mut self, secs: u64) {
        self.desc.max_exec_time = secs;
        let mut cmd = Event::command(Command::WorkerConf);
        cmd.params.set("cmd", "updatemaxexectime");
        cmd.params.set("val", txp_core::ParamValue::UInt(secs));
        self.broadcast(&cmd);
    }

    /// Begin draining: persistent workers are told to exit when their
    /// app is done; straight pools simply drain their FIFO.
    pub fn exit_when_done(&mut self) {
        self.exit_when_done = true;
        if self.desc.is_persistent() {
            self.broadcast(&Event::command(Command::ExitWhenDone));
        }
    }

    pub fn mark_dropped(&mut self) {
        self.dropped = true;
    }

    /// Freeze admissions and terminate workers. Repeated calls
    /// escalate: commands, then SIGTERM to children, then SIGKILL.
    pub fn shutdown(&mut self) {
        self.frozen = true;
        self.shutdown = true;
        self.shutdown_calls += 1;
        match self.shutdown_calls {
            1 => self.broadcast(&Event::command(Command::Shutdown)),
            2 => {
                for slot in self.slots.values() {
                    slot.gate.term();
                }
            }
            _ => {
                for slot in self.slots.values() {
                    slot.gate.kill();
                }
            }
        }
    }

    pub fn broadcast(&self, event: &Event) {
        for (id, slot) in self.slots.iter() {
            if slot.tx.try_send(event.clone()).is_err() {
                tracing::warn!(queue = self.desc.name, worker = *id, "broadcast dropped");
            }
        }
    }

    /// Send a command only to the worker an event addresses, or to all
    /// when unaddressed.
    pub fn forward_command(&self, event: &Event) {
        if event.worker_pid != 0 {
            if let Some(slot) = self.slots.get(&event.worker_pid) {
                if slot.tx.try_send(event.clone()).is_err() {
                    tracing::warn!(queue = self.desc.name, worker = event.worker_pid, "forward dropped");
                }
                return;
            }
        }
        self.broadcast(event);
    }

    // -- stats -------------------------------------------------------

    /// CSV snapshot in `STATUS_KEY` column order. Reading resets the
    /// accumulators.
    pub fn status_csv(&mut self) -> String {
        let s = &self.stats;
        let mean_exec = if s.count_exec_events > 0 {
            s.acc_exec_time as f64 / s.count_exec_events as f64
        } else {
            0.0
        };
        let mean_queue = if s.count_queue_events > 0 {
            s.acc_queue_time as f64 / s.count_queue_events as f64
        } else {
            0.0
        };
        let row = format!(
            "{},{},{},{:.3},{},{},{:.3},{},{}",
            self.desc.max_exec_time,
            s.count_exec_events,
            s.max_exec_time,
            mean_exec,
            s.count_queue_events,
            s.max_queue_time,
            mean_queue,
            self.slots.len(),
            self.idle.len(),
        );
        self.reset_stats();
        row
    }

    pub fn reset_stats(&mut self) {
        self.stats = PoolStats::default();
    }

    pub fn exec_count(&self) -> u64 {
        self.stats.count_exec_events
    }

    pub fn recovery_event_count(&self) -> u64 {
        self.stats.recovery_events
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The nucleus: one cooperative loop over the gateway endpoint, the
//! worker message channel and the maintenance timer.
//!
//! Everything stateful — the queue map, each pool's FIFO and slots, the
//! recovery ledger — is owned by this loop; workers only ever talk back
//! through the message channel, so no locks guard any of it.

pub(crate) mod management;
mod pool;
pub(crate) mod stats;
mod worker;

use crate::gateway::NucleusEndpoint;
use pool::WorkerPool;
use stats::{QueueLogger, StatsWriter};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use txp_config::Config;
use txp_core::{
    Clock, Command, Event, EventKind, ParamValue, QueueDescriptor, SystemClock,
};
use txp_exec::{ExecError, ResponseMarkers};
use txp_recovery::{RecoveryError, RecoveryLog};
use worker::WorkerCtx;

#[derive(Debug, Error)]
pub enum NucleusError {
    #[error("recovery log: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("exec setup: {0}")]
    Exec(#[from] ExecError),
}

/// Settings every worker shares: paths of the shell and interpreter and
/// the compiled response markers.
pub struct ExecSettings {
    pub shell_path: String,
    pub interpreter_path: String,
    pub markers: ResponseMarkers,
}

impl ExecSettings {
    fn from_config(config: &Config) -> Result<Self, NucleusError> {
        let n = &config.nucleus;
        Ok(Self {
            shell_path: n.shell_path.clone(),
            interpreter_path: n.interpreter_path.clone(),
            markers: ResponseMarkers::new(
                &n.exec_success,
                &n.exec_failure,
                &n.error_prefix,
                &n.trace_prefix,
                &n.param_prefix,
            )?,
        })
    }
}

/// Messages workers send back to the nucleus loop.
pub(crate) enum NucleusMsg {
    /// A worker finished one work event.
    WorkerDone { queue: String, worker_id: u32, done: Event },
    /// A worker task ended.
    WorkerExited { queue: String, worker_id: u32 },
    /// An event to route: a result toward its originator, an error
    /// reroute, a management or stats event toward a queue.
    Emit(Event),
}

enum Flow {
    Continue,
    Exit,
}

/// Build a `success=false` result headed back to the originator.
/// `None` when the event expects no reply.
pub(crate) fn failure_result(event: &mut Event, cause: &str) -> Option<Event> {
    if event.return_route.is_empty() {
        return None;
    }
    event.return_route.pop();
    let mut result = Event::new(EventKind::Result);
    result.reference = event.reference.clone();
    result.sys.success = false;
    result.sys.failure_cause = cause.to_string();
    result.return_route = event.return_route.clone();
    Some(result)
}

pub struct Nucleus<C: Clock = SystemClock> {
    config: Config,
    clock: C,
    pools: HashMap<String, WorkerPool<C>>,
    inbound: mpsc::Receiver<Event>,
    outbound: mpsc::Sender<Event>,
    msg_rx: mpsc::Receiver<NucleusMsg>,
    msg_tx: mpsc::Sender<NucleusMsg>,
    recovery: RecoveryLog,
    exec: Arc<ExecSettings>,
    logger: Arc<QueueLogger>,
    stats: StatsWriter,
    ids: Arc<AtomicU32>,
    exit_when_done: bool,
    drain_deadline: u64,
    shutdown_requested: bool,
    pending_startup: Vec<Event>,
}

impl<C: Clock> Nucleus<C> {
    /// Build the nucleus and its pools from the configuration.
    pub fn new(config: Config, clock: C, endpoint: NucleusEndpoint) -> Result<Self, NucleusError> {
        std::fs::create_dir_all(&config.main.log_dir).map_err(RecoveryError::Io)?;
        let recovery = RecoveryLog::open(&config.main.log_dir)?;
        let exec = Arc::new(ExecSettings::from_config(&config)?);
        let logger = Arc::new(QueueLogger::new(config.main.log_dir.clone()));
        let stats = StatsWriter::new(config.main.stats_dir.clone());
        let (msg_tx, msg_rx) = mpsc::channel(4096);
        let ids = Arc::new(AtomicU32::new(0));

        let mut nucleus = Self {
            config,
            clock,
            pools: HashMap::new(),
            inbound: endpoint.rx,
            outbound: endpoint.tx,
            msg_rx,
            msg_tx,
            recovery,
            exec,
            logger,
            stats,
            ids,
            exit_when_done: false,
            drain_deadline: 0,
            shutdown_requested: false,
            pending_startup: Vec::new(),
        };

        let descriptors: Vec<QueueDescriptor> = nucleus.config.queues.clone();
        let mut emitted = Vec::new();
        for desc in descriptors {
            nucleus.create_pool(desc, &mut emitted)?;
        }
        // management events from pool creation are routed once the loop
        // starts, when every target queue exists
        nucleus.pending_startup = emitted;
        Ok(nucleus)
    }

    fn worker_ctx(&self) -> WorkerCtx<C> {
        WorkerCtx {
            msgs: self.msg_tx.clone(),
            exec: Arc::clone(&self.exec),
            clock: self.clock.clone(),
            recovery_dir: self.config.main.log_dir.clone(),
        }
    }

    fn create_pool(
        &mut self,
        desc: QueueDescriptor,
        out: &mut Vec<Event>,
    ) -> Result<(), NucleusError> {
        let name = desc.name.clone();
        let pool = WorkerPool::new(
            desc,
            self.worker_ctx(),
            Arc::clone(&self.ids),
            Arc::clone(&self.logger),
            out,
        )?;
        self.pools.insert(name, pool);
        Ok(())
    }

    /// Run until shutdown. Consumes the nucleus.
    pub async fn run(mut self) -> Result<(), NucleusError> {
        let tick_secs = self.config.nucleus.maintenance_interval.max(1);
        let mut tick = tokio::time::interval(Duration::from_secs(tick_secs));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks: u64 = 0;

        let pending = std::mem::take(&mut self.pending_startup);
        self.route_all(pending).await;

        loop {
            tokio::select! {
                inbound = self.inbound.recv() => match inbound {
                    Some(event) => {
                        if matches!(self.handle_inbound(event).await, Flow::Exit) {
                            break;
                        }
                    }
                    None => {
                        tracing::info!("gateway endpoint closed, shutting down");
                        break;
                    }
                },
                msg = self.msg_rx.recv() => {
                    if let Some(msg) = msg {
                        self.handle_msg(msg).await;
                    }
                },
                _ = tick.tick() => {
                    ticks += 1;
                    if matches!(self.maintenance(ticks).await, Flow::Exit) {
                        break;
                    }
                },
            }
        }

        self.drain_shutdown().await;
        Ok(())
    }

    // -- inbound -----------------------------------------------------

    async fn handle_inbound(&mut self, event: Event) -> Flow {
        if event.is_command() {
            return self.handle_command(event).await;
        }
        self.admit(event).await;
        Flow::Continue
    }

    /// Route one event to its pool, the router fallback, or the
    /// unknown-queue failure path. Any events produced along the way
    /// (management events, failure results) are routed in turn.
    async fn admit(&mut self, event: Event) {
        let mut pending = VecDeque::from([event]);
        let mut emitted = Vec::new();
        while let Some(mut event) = pending.pop_front() {
            event.ensure_reference();
            let queue = event.queue_name().to_string();

            let target = if self.pools.contains_key(&queue) {
                Some(queue.clone())
            } else {
                let router = self.config.nucleus.router_queue.clone();
                if !router.is_empty() && self.pools.contains_key(&router) {
                    tracing::debug!(
                        queue,
                        router,
                        reference = event.reference,
                        "forwarding to router queue"
                    );
                    Some(router)
                } else {
                    None
                }
            };

            match target {
                Some(name) => {
                    if let Some(pool) = self.pools.get_mut(&name) {
                        pool.submit(event, &mut self.recovery, &mut emitted);
                    }
                }
                None => {
                    tracing::warn!(queue, reference = event.reference, "unknown destination queue");
                    if let Err(e) =
                        self.recovery.write_entry(&event, "unknown_queue", "nucleus", &queue)
                    {
                        tracing::error!(error = %e, "recovery write failed");
                    }
                    emitted.extend(failure_result(&mut event, "unknownQueue"));
                }
            }

            for e in emitted.drain(..) {
                self.enqueue_routed_into(e, &mut pending).await;
            }
        }
    }

    /// Route an emitted event: results go out the gateway, events with
    /// a destination are queued for admission.
    async fn enqueue_routed_into(&mut self, event: Event, pending: &mut VecDeque<Event>) {
        if !event.dest_queue.is_empty() {
            pending.push_back(event);
            return;
        }
        match event.kind {
            EventKind::Result | EventKind::Reply => {
                if self.outbound.send(event).await.is_err() {
                    tracing::debug!("gateway result channel closed");
                }
            }
            other => {
                tracing::warn!(kind = %other, "dropping emitted event with no destination");
            }
        }
    }

    async fn route_all(&mut self, events: Vec<Event>) {
        for event in events {
            self.route_one(event).await;
        }
    }

    async fn route_one(&mut self, event: Event) {
        if !event.dest_queue.is_empty() {
            self.admit(event).await;
            return;
        }
        match event.kind {
            EventKind::Result | EventKind::Reply => {
                if self.outbound.send(event).await.is_err() {
                    tracing::debug!("gateway result channel closed");
                }
            }
            other => {
                tracing::warn!(kind = %other, "dropping emitted event with no destination");
            }
        }
    }

    // -- worker messages ---------------------------------------------

    async fn handle_msg(&mut self, msg: NucleusMsg) {
        let mut emitted = Vec::new();
        match msg {
            NucleusMsg::WorkerDone { queue, worker_id, done } => {
                if let Some(pool) = self.pools.get_mut(&queue) {
                    pool.release(worker_id, &done, &mut emitted);
                } else {
                    tracing::warn!(queue, worker = worker_id, "done from unknown pool");
                }
            }
            NucleusMsg::WorkerExited { queue, worker_id } => {
                if let Some(pool) = self.pools.get_mut(&queue) {
                    pool.worker_exited(worker_id, &mut self.recovery, &mut emitted);
                }
            }
            NucleusMsg::Emit(event) => {
                self.route_one(event).await;
            }
        }
        self.route_all(emitted).await;
    }

    // -- commands ----------------------------------------------------

    async fn handle_command(&mut self, event: Event) -> Flow {
        let cmd = event.command_id();
        tracing::info!(%cmd, queue = event.dest_queue, "nucleus command");
        match cmd {
            Command::Shutdown => {
                if self.shutdown_requested {
                    // a second request during drain turns forcible
                    for pool in self.pools.values_mut() {
                        pool.shutdown();
                        pool.shutdown();
                    }
                } else {
                    self.shutdown_requested = true;
                    for pool in self.pools.values_mut() {
                        pool.shutdown();
                    }
                }
                Flow::Exit
            }
            Command::ExitWhenDone => {
                self.exit_when_done = true;
                self.drain_deadline =
                    self.clock.epoch_secs() + self.config.nucleus.max_shutdown_wait;
                for pool in self.pools.values_mut() {
                    pool.exit_when_done();
                }
                Flow::Continue
            }
            Command::Stats => {
                self.emit_stats(&event).await;
                Flow::Continue
            }
            Command::ResetStats => {
                for pool in self.pools.values_mut() {
                    pool.reset_stats();
                    pool.broadcast(&event);
                }
                self.recovery.reset_counter();
                Flow::Continue
            }
            Command::ReopenLog => {
                if let Err(e) = self.recovery.reopen() {
                    tracing::error!(error = %e, "nucleus failed to reopen recovery log");
                }
                for pool in self.pools.values() {
                    pool.broadcast(&event);
                }
                Flow::Continue
            }
            Command::NucleusConf => {
                self.reconfigure(&event).await;
                Flow::Continue
            }
            Command::WorkerConf => {
                let queue = event.queue_name().to_string();
                match self.pools.get(&queue) {
                    Some(pool) => pool.forward_command(&event),
                    None => tracing::warn!(queue, "worker-conf for unknown queue"),
                }
                Flow::Continue
            }
            _ => {
                // everything else goes to the workers, filtered by
                // destination queue when one is named
                let queue = event.queue_name().to_string();
                if queue.is_empty() {
                    for pool in self.pools.values() {
                        pool.broadcast(&event);
                    }
                } else if let Some(pool) = self.pools.get(&queue) {
                    pool.forward_command(&event);
                } else {
                    tracing::warn!(queue, cmd = %cmd, "command for unknown queue");
                }
                Flow::Continue
            }
        }
    }

    async fn emit_stats(&mut self, command: &Event) {
        let mut stats_events = Vec::new();
        let stats_queue = self.config.nucleus.stats_queue.clone();
        for (name, pool) in self.pools.iter_mut() {
            let row = pool.status_csv();
            self.stats.append_row(name, &row);
            if !stats_queue.is_empty() {
                let mut e = Event::to_queue(EventKind::Url, stats_queue.clone());
                e.ensure_reference();
                e.params.set("queue", name.as_str());
                e.params.set("stats", row.as_str());
                stats_events.push(e);
            }
            pool.broadcast(command);
        }
        self.route_all(stats_events).await;
    }

    /// `nucleus-conf`: runtime reconfiguration. The sub-command is in
    /// the `cmd` parameter.
    async fn reconfigure(&mut self, event: &Event) {
        let cmd = event.params.get_str("cmd").unwrap_or("").to_string();
        let queue = event.params.get_str("queue").unwrap_or("").to_string();
        let val = param_u64(event, "val");
        let mut emitted = Vec::new();

        match cmd.as_str() {
            "resize" => {
                if let (Some(pool), Some(val)) = (self.pools.get_mut(&queue), val) {
                    pool.resize(val as u32, &mut emitted);
                }
            }
            "freeze" => {
                if let Some(pool) = self.pools.get_mut(&queue) {
                    pool.freeze(true);
                }
            }
            "unfreeze" => {
                if let Some(pool) = self.pools.get_mut(&queue) {
                    pool.freeze(false);
                }
            }
            "maxqueuelength" => {
                if let (Some(pool), Some(val)) = (self.pools.get_mut(&queue), val) {
                    pool.set_max_queue_length(val as usize);
                }
            }
            "maxexectime" => {
                if let (Some(pool), Some(val)) = (self.pools.get_mut(&queue), val) {
                    pool.set_max_exec_time(val);
                }
            }
            "createqueue" => {
                if queue.is_empty() || self.pools.contains_key(&queue) {
                    tracing::warn!(queue, "createqueue refused");
                } else {
                    let mut desc = QueueDescriptor::new(queue.clone());
                    if let Some(workers) = param_u64(event, "workers") {
                        desc.workers = workers as u32;
                    }
                    if let Some(max_exec) = param_u64(event, "maxexectime") {
                        desc.max_exec_time = max_exec;
                    }
                    if let Some(max_len) = param_u64(event, "maxlength") {
                        desc.max_length = max_len as usize;
                    }
                    if let Some(app) = event.params.get_str("persistentapp") {
                        desc.persistent_app = app.to_string();
                    }
                    if let Some(script) = event.params.get_str("defaultscript") {
                        desc.default_script = script.to_string();
                    }
                    if let Err(e) = self.create_pool(desc, &mut emitted) {
                        tracing::error!(queue, error = %e, "createqueue failed");
                    }
                }
            }
            "dropqueue" => {
                if let Some(pool) = self.pools.get_mut(&queue) {
                    pool.mark_dropped();
                    pool.shutdown();
                }
            }
            "loglevel" => {
                let level = event.params.get_str("val").unwrap_or("");
                tracing::info!(level, "log level change requested");
                self.config.nucleus.log_level = level.to_string();
            }
            other => {
                tracing::warn!(cmd = other, "unknown nucleus-conf sub-command");
            }
        }
        self.route_all(emitted).await;
    }

    // -- maintenance -------------------------------------------------

    async fn maintenance(&mut self, ticks: u64) -> Flow {
        let now = self.clock.epoch_secs();
        let scan_every = (self.config.nucleus.expired_scan_interval
            / self.config.nucleus.maintenance_interval.max(1))
        .max(1);

        let mut emitted = Vec::new();
        for pool in self.pools.values_mut() {
            pool.set_now(now);
            pool.check_overruns();
            if ticks % scan_every == 0 {
                pool.scan_for_expired(&mut emitted);
            }
            pool.feed(&mut emitted);
        }
        self.route_all(emitted).await;

        // retire pools dropped at runtime once their workers are gone
        self.pools.retain(|name, pool| {
            if pool.is_dropped() && pool.is_stopped() {
                tracing::info!(queue = name, "dropped queue retired");
                false
            } else {
                true
            }
        });

        if self.exit_when_done {
            for pool in self.pools.values_mut() {
                if !pool.is_shutdown() && pool.is_drained() {
                    pool.shutdown();
                }
            }
            if now >= self.drain_deadline {
                for pool in self.pools.values_mut() {
                    if !pool.is_stopped() {
                        pool.shutdown();
                    }
                }
            }
            if self.pools.values().all(|p| p.is_stopped()) {
                tracing::info!("all pools drained, exiting");
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    /// After the loop: give workers a bounded window to exit cleanly,
    /// recovering in-flight events as they report in.
    async fn drain_shutdown(&mut self) {
        for pool in self.pools.values_mut() {
            if !pool.is_shutdown() {
                pool.shutdown();
            }
        }

        let deadline = Duration::from_secs(self.config.nucleus.max_shutdown_wait.max(1));
        let drain = async {
            while !self.pools.values().all(|p| p.is_stopped()) {
                match self.msg_rx.recv().await {
                    Some(NucleusMsg::WorkerExited { queue, worker_id }) => {
                        let mut emitted = Vec::new();
                        if let Some(pool) = self.pools.get_mut(&queue) {
                            pool.worker_exited(worker_id, &mut self.recovery, &mut emitted);
                        }
                        // results cannot be routed any more; drop them
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        };
        if tokio::time::timeout(deadline, drain).await.is_err() {
            tracing::warn!("shutdown grace period elapsed, killing children");
            for pool in self.pools.values_mut() {
                pool.shutdown();
                pool.shutdown();
            }
        }
        tracing::info!("nucleus stopped");
    }

    // -- introspection for tests and callers -------------------------

    pub fn queue_names(&self) -> Vec<String> {
        self.pools.keys().cloned().collect()
    }

    pub fn recovery_index_path(&self) -> std::path::PathBuf {
        self.recovery.index_path().to_path_buf()
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

#[cfg(test)]
#[path = "nucleus_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness: a running nucleus wired to an in-test gateway.

use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use txp_config::Config;
use txp_core::{Command, Event, QueueDescriptor, SystemClock};
use txp_daemon::gateway::{self, GatewayEndpoint};
use txp_daemon::Nucleus;

pub const RESULT_WAIT: Duration = Duration::from_secs(15);

pub struct Harness {
    pub gateway: GatewayEndpoint,
    pub log_dir: PathBuf,
    task: tokio::task::JoinHandle<Result<(), txp_daemon::NucleusError>>,
    _dir: tempfile::TempDir,
}

impl Harness {
    /// Start a nucleus over the given queues in a fresh state dir.
    pub fn start(queues: Vec<QueueDescriptor>) -> Harness {
        Self::start_with(queues, |_| {})
    }

    /// Start with extra configuration applied before launch.
    pub fn start_with(queues: Vec<QueueDescriptor>, tweak: impl FnOnce(&mut Config)) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::load(None, &[]).expect("default config");
        config.main.log_dir = dir.path().join("logs");
        config.main.stats_dir = dir.path().join("stats");
        config.queues = queues;
        tweak(&mut config);
        let log_dir = config.main.log_dir.clone();

        let (gateway, endpoint) = gateway::endpoint_pair(gateway::ENDPOINT_DEPTH);
        let nucleus = Nucleus::new(config, SystemClock, endpoint).expect("nucleus");
        let task = tokio::spawn(nucleus.run());
        Harness { gateway, log_dir, task, _dir: dir }
    }

    pub async fn submit(&self, event: Event) {
        self.gateway.tx.send(event).await.expect("submit");
    }

    /// Wait for the next result event.
    pub async fn next_result(&mut self) -> Event {
        tokio::time::timeout(RESULT_WAIT, self.gateway.rx.recv())
            .await
            .expect("timed out waiting for a result")
            .expect("gateway closed")
    }

    /// Assert no result is sitting in the gateway right now.
    pub fn assert_no_result(&mut self) {
        match self.gateway.rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            other => panic!("expected no pending result, got {:?}", other.map(|e| e.brief())),
        }
    }

    pub fn recovery_log(&self) -> String {
        std::fs::read_to_string(self.log_dir.join(txp_recovery::RECOVERY_FILE)).unwrap_or_default()
    }

    /// Shut the nucleus down and wait for it.
    pub async fn stop(self) {
        let _ = self.gateway.tx.send(Event::command(Command::Shutdown)).await;
        let _ = tokio::time::timeout(RESULT_WAIT, self.task).await;
    }
}

/// An executable event carrying a return route so results come back.
pub fn routed_event(kind: txp_core::EventKind, queue: &str, reference: &str) -> Event {
    let mut e = Event::to_queue(kind, queue);
    e.reference = reference.to_string();
    e.return_route.push(txp_core::RouteHop::new(1));
    e
}

pub fn script_queue(name: &str, workers: u32) -> QueueDescriptor {
    let mut d = QueueDescriptor::new(name);
    d.workers = workers;
    d
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pool state-machine tests.
//!
//! These run on the current-thread runtime: spawned worker tasks do not
//! progress while the test body holds the thread, so dispatch, release
//! and crash handling can be driven step by step.

use super::*;
use crate::nucleus::{ExecSettings, NucleusMsg};
use txp_core::{EventKind, FakeClock};

fn exec_settings() -> Arc<ExecSettings> {
    Arc::new(ExecSettings {
        shell_path: "/bin/sh".to_string(),
        interpreter_path: "/usr/bin/perl".to_string(),
        markers: txp_exec::ResponseMarkers::new("SUCCESS", "FAILURE", "error:", "trace:", "param:")
            .unwrap(),
    })
}

struct Fixture {
    pool: WorkerPool<FakeClock>,
    recovery: RecoveryLog,
    clock: FakeClock,
    _msg_rx: mpsc::Receiver<NucleusMsg>,
    dir: tempfile::TempDir,
}

fn fixture(mut desc: QueueDescriptor) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    clock.set_epoch_secs(1_000);
    let (msg_tx, msg_rx) = mpsc::channel(256);
    let ctx = WorkerCtx {
        msgs: msg_tx,
        exec: exec_settings(),
        clock: clock.clone(),
        recovery_dir: dir.path().to_path_buf(),
    };
    desc.name = "work".to_string();
    let logger = Arc::new(QueueLogger::new(dir.path().to_path_buf()));
    let mut out = Vec::new();
    let mut pool =
        WorkerPool::new(desc, ctx, Arc::new(AtomicU32::new(0)), logger, &mut out).unwrap();
    pool.set_now(1_000);
    let recovery = RecoveryLog::open(dir.path()).unwrap();
    Fixture { pool, recovery, clock, _msg_rx: msg_rx, dir }
}

fn work_event(reference: &str) -> Event {
    let mut e = Event::to_queue(EventKind::Script, "work");
    e.reference = reference.to_string();
    e.sys.script_name = "/bin/echo".to_string();
    e
}

fn done_event(elapsed: u64, wrote_recovery: bool) -> Event {
    let mut done = Event::new(EventKind::WorkerDone);
    done.sys.elapsed_time = elapsed;
    done.sys.recovery_written = wrote_recovery;
    done
}

fn recovery_lines(dir: &tempfile::TempDir) -> Vec<String> {
    std::fs::read_to_string(dir.path().join(txp_recovery::RECOVERY_FILE))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn workers_start_idle_and_counted() {
    let mut desc = QueueDescriptor::new("work");
    desc.workers = 3;
    let f = fixture(desc);
    assert_eq!(f.pool.total_workers(), 3);
    assert_eq!(f.pool.idle_count(), 3);
    assert_eq!(f.pool.busy_count(), 0);
    assert!(f.pool.is_drained());
}

#[tokio::test]
async fn idle_plus_busy_equals_total_at_every_step() {
    let mut desc = QueueDescriptor::new("work");
    desc.workers = 2;
    let mut f = fixture(desc);
    let mut out = Vec::new();

    for i in 0..3 {
        f.pool.submit(work_event(&format!("e{}", i)), &mut f.recovery, &mut out);
        assert_eq!(f.pool.idle_count() + f.pool.busy_count(), f.pool.total_workers());
    }
    assert_eq!(f.pool.busy_count(), 2);
    assert_eq!(f.pool.queue_len(), 1);

    f.pool.release(1, &done_event(1, false), &mut out);
    assert_eq!(f.pool.idle_count() + f.pool.busy_count(), f.pool.total_workers());
    // released worker immediately picked up the queued event
    assert_eq!(f.pool.busy_count(), 2);
    assert_eq!(f.pool.queue_len(), 0);
}

#[tokio::test]
async fn fifo_order_is_preserved() {
    let mut desc = QueueDescriptor::new("work");
    desc.workers = 1;
    let mut f = fixture(desc);
    let mut out = Vec::new();

    f.pool.submit(work_event("first"), &mut f.recovery, &mut out);
    f.pool.submit(work_event("second"), &mut f.recovery, &mut out);
    f.pool.submit(work_event("third"), &mut f.recovery, &mut out);
    assert_eq!(f.pool.busy_count(), 1);
    assert_eq!(f.pool.queue_len(), 2);

    f.pool.release(1, &done_event(0, false), &mut out);
    assert_eq!(f.pool.queue_len(), 1);
    f.pool.release(1, &done_event(0, false), &mut out);
    assert_eq!(f.pool.queue_len(), 0);
}

#[tokio::test]
async fn full_queue_rejects_with_recovery_and_result() {
    let mut desc = QueueDescriptor::new("work");
    desc.workers = 1;
    desc.max_length = 1;
    let mut f = fixture(desc);
    let mut out = Vec::new();

    f.pool.submit(work_event("runs"), &mut f.recovery, &mut out);
    f.pool.submit(work_event("queued"), &mut f.recovery, &mut out);
    let mut rejected = work_event("rejected");
    rejected.return_route.push(txp_core::RouteHop::new(5));
    f.pool.submit(rejected, &mut f.recovery, &mut out);

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].kind, EventKind::Result);
    assert!(!out[0].sys.success);
    assert_eq!(out[0].sys.failure_cause, "queue_full");

    let lines = recovery_lines(&f.dir);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("queue_full"));
}

#[tokio::test]
async fn frozen_pool_rejects_with_frozen_reason() {
    let mut desc = QueueDescriptor::new("work");
    desc.workers = 1;
    let mut f = fixture(desc);
    let mut out = Vec::new();

    f.pool.freeze(true);
    let mut e = work_event("nope");
    e.return_route.push(txp_core::RouteHop::new(3));
    f.pool.submit(e, &mut f.recovery, &mut out);
    assert_eq!(out[0].sys.failure_cause, "frozen");
    assert_eq!(f.pool.busy_count(), 0);

    f.pool.freeze(false);
    f.pool.submit(work_event("yes"), &mut f.recovery, &mut out);
    assert_eq!(f.pool.busy_count(), 1);
}

#[tokio::test]
async fn release_of_idle_worker_is_ignored() {
    let mut desc = QueueDescriptor::new("work");
    desc.workers = 1;
    let mut f = fixture(desc);
    let mut out = Vec::new();

    f.pool.release(1, &done_event(1, false), &mut out);
    assert_eq!(f.pool.idle_count(), 1);
    assert_eq!(f.pool.total_workers(), 1);

    // unknown worker id is equally harmless
    f.pool.release(99, &done_event(1, false), &mut out);
}

#[tokio::test]
async fn crashed_busy_worker_recovers_event_and_respawns() {
    let mut desc = QueueDescriptor::new("work");
    desc.workers = 1;
    let mut f = fixture(desc);
    let mut out = Vec::new();

    f.pool.submit(work_event("inflight"), &mut f.recovery, &mut out);
    assert_eq!(f.pool.busy_count(), 1);

    f.pool.worker_exited(1, &mut f.recovery, &mut out);
    assert_eq!(f.pool.total_workers(), 1, "worker count restored");
    assert_eq!(f.pool.idle_count(), 1);

    let lines = recovery_lines(&f.dir);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("worker_crash"));
    assert!(lines[0].contains("inflight"));
}

#[tokio::test]
async fn done_then_exit_produces_no_recovery_entry() {
    let mut desc = QueueDescriptor::new("work");
    desc.workers = 1;
    let mut f = fixture(desc);
    let mut out = Vec::new();

    f.pool.submit(work_event("clean"), &mut f.recovery, &mut out);
    f.pool.release(1, &done_event(1, false), &mut out);
    f.pool.worker_exited(1, &mut f.recovery, &mut out);

    assert!(recovery_lines(&f.dir).is_empty());
    assert_eq!(f.pool.total_workers(), 1, "respawned");
}

#[tokio::test]
async fn resize_grows_and_shrinks() {
    let mut desc = QueueDescriptor::new("work");
    desc.workers = 2;
    let mut f = fixture(desc);
    let mut out = Vec::new();

    assert_eq!(f.pool.resize(4, &mut out), 2);
    assert_eq!(f.pool.total_workers(), 4);

    // shrink: idle workers are marked terminal and told to exit; the
    // slots leave the pool when their tasks report back
    assert_eq!(f.pool.resize(1, &mut out), -3);
    assert_eq!(f.pool.idle_count(), 1, "terminal workers left the idle set");
}

#[tokio::test]
async fn collection_queue_pins_events_to_workers() {
    let mut desc = QueueDescriptor::new("work");
    desc.kind = QueueKind::Collection;
    desc.workers = 2;
    let mut f = fixture(desc);
    let mut out = Vec::new();

    // pin to worker 2 — worker 1 stays idle
    let mut pinned = work_event("pinned");
    pinned.worker_pid = 2;
    f.pool.submit(pinned, &mut f.recovery, &mut out);
    assert_eq!(f.pool.busy_count(), 1);
    assert_eq!(f.pool.idle_count(), 1);

    // a second event for the same busy worker waits even though
    // worker 1 is idle
    let mut also_pinned = work_event("waits");
    also_pinned.worker_pid = 2;
    f.pool.submit(also_pinned, &mut f.recovery, &mut out);
    assert_eq!(f.pool.queue_len(), 1);

    f.pool.release(2, &done_event(0, false), &mut out);
    assert_eq!(f.pool.queue_len(), 0);
    assert_eq!(f.pool.busy_count(), 1);
}

#[tokio::test]
async fn ready_time_defers_dispatch() {
    let mut desc = QueueDescriptor::new("work");
    desc.workers = 1;
    let mut f = fixture(desc);
    let mut out = Vec::new();

    let mut e = work_event("later");
    e.ready_time = 30; // relative on admission
    f.pool.submit(e, &mut f.recovery, &mut out);
    assert_eq!(f.pool.busy_count(), 0, "not ready yet");
    assert_eq!(f.pool.queue_len(), 1);

    f.clock.advance_secs(31);
    f.pool.set_now(1_031);
    f.pool.feed(&mut out);
    assert_eq!(f.pool.busy_count(), 1);
}

#[tokio::test]
async fn expired_at_admission_never_reaches_a_worker() {
    let mut desc = QueueDescriptor::new("work");
    desc.workers = 1;
    let mut f = fixture(desc);
    let mut out = Vec::new();

    let mut e = work_event("stale");
    e.expiry = 900; // before now=1000
    e.return_route.push(txp_core::RouteHop::new(4));
    f.pool.submit(e, &mut f.recovery, &mut out);

    assert_eq!(out.len(), 1);
    assert!(!out[0].sys.success);
    assert_eq!(out[0].sys.failure_cause, "expired");
    assert_eq!(f.pool.busy_count(), 0, "idle worker untouched");
    assert_eq!(f.pool.queue_len(), 0);
    assert!(recovery_lines(&f.dir).is_empty(), "expiry is not a recovery case");

    // neither the queue nor the exec accumulators saw the event
    let row = f.pool.status_csv();
    assert!(row.starts_with("0,0,0,0.000,0,0,0.000,1,1"), "row: {}", row);
}

#[tokio::test]
async fn feed_rechecks_expiry_before_dispatch() {
    let mut desc = QueueDescriptor::new("work");
    desc.workers = 1;
    let mut f = fixture(desc);
    let mut out = Vec::new();

    f.pool.submit(work_event("running"), &mut f.recovery, &mut out);
    let mut queued = work_event("ages-out");
    queued.expiry = 1_005;
    queued.return_route.push(txp_core::RouteHop::new(4));
    f.pool.submit(queued, &mut f.recovery, &mut out);
    assert_eq!(f.pool.queue_len(), 1);

    // the queued event expires while the worker is busy
    f.pool.set_now(1_010);
    f.pool.release(1, &done_event(10, false), &mut out);

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].sys.failure_cause, "expired");
    assert_eq!(f.pool.queue_len(), 0);
    assert_eq!(f.pool.busy_count(), 0, "expired event never occupied the worker");
    assert_eq!(f.pool.exec_count(), 1, "only the real execution counted");
}

#[tokio::test]
async fn expired_done_envelope_skips_exec_stats() {
    let mut desc = QueueDescriptor::new("work");
    desc.workers = 1;
    let mut f = fixture(desc);
    let mut out = Vec::new();

    f.pool.submit(work_event("raced"), &mut f.recovery, &mut out);
    let mut done = done_event(0, false);
    done.sys.failure_cause = "expired".to_string();
    f.pool.release(1, &done, &mut out);

    assert_eq!(f.pool.idle_count(), 1, "worker back in the idle set");
    assert_eq!(f.pool.exec_count(), 0, "refused event not counted as executed");
}

#[tokio::test]
async fn expired_scan_fails_queued_events() {
    let mut desc = QueueDescriptor::new("work");
    desc.workers = 0;
    let mut f = fixture(desc);
    let mut out = Vec::new();

    let mut e = work_event("dead");
    e.expiry = 1_050;
    e.return_route.push(txp_core::RouteHop::new(4));
    f.pool.submit(e, &mut f.recovery, &mut out);
    f.pool.submit(work_event("alive"), &mut f.recovery, &mut out);
    assert_eq!(f.pool.queue_len(), 2);

    f.pool.set_now(1_100);
    f.pool.scan_for_expired(&mut out);
    assert_eq!(f.pool.queue_len(), 1);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].sys.failure_cause, "expired");
    assert_eq!(f.pool.exec_count(), 0, "expired event never executed");
}

#[tokio::test]
async fn stats_accumulate_and_reset_on_read() {
    let mut desc = QueueDescriptor::new("work");
    desc.workers = 1;
    desc.max_exec_time = 10;
    let mut f = fixture(desc);
    let mut out = Vec::new();

    f.pool.submit(work_event("a"), &mut f.recovery, &mut out);
    f.pool.release(1, &done_event(4, true), &mut out);

    let row = f.pool.status_csv();
    let fields: Vec<&str> = row.split(',').collect();
    assert_eq!(fields[0], "10"); // timeLimit
    assert_eq!(fields[1], "1"); // cntExec
    assert_eq!(fields[2], "4"); // mxExec
    assert_eq!(fields[4], "1"); // cntQ
    assert_eq!(fields[7], "1"); // cntW
    assert_eq!(fields[8], "1"); // idleW
    assert_eq!(f.pool.recovery_event_count(), 0, "reset after read");

    let again = f.pool.status_csv();
    assert!(again.starts_with("10,0,0,"));
}

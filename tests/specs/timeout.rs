// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution-timeout enforcement: SIGTERM, then SIGKILL a tick later.

use super::prelude::*;
use txp_core::EventKind;

#[tokio::test]
async fn overrunning_child_is_killed_and_worker_survives() {
    let mut queue = script_queue("slow", 1);
    queue.max_exec_time = 1;
    let mut harness = Harness::start(vec![queue]);

    let mut e = routed_event(EventKind::Binary, "slow", "sleeper");
    e.sys.script_name = "/bin/sleep".to_string();
    e.params.push("30");
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(!result.sys.success);
    assert!(
        result.sys.failure_cause.starts_with("SIG"),
        "expected a signal cause, got {:?}",
        result.sys.failure_cause
    );

    let recovery = harness.recovery_log();
    assert!(
        recovery.contains("SIGTERM") || recovery.contains("SIGKILL"),
        "recovery log:\n{}",
        recovery
    );

    // the pool is healthy again: a quick follow-up event executes
    let mut e = routed_event(EventKind::Script, "slow", "after");
    e.sys.script_name = "/bin/echo".to_string();
    e.params.push("recovered");
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(result.sys.success);
    assert!(result.sys.result.contains("recovered"));

    harness.stop().await;
}

#[tokio::test]
async fn unlimited_queue_never_times_out() {
    let mut harness = Harness::start(vec![script_queue("work", 1)]);

    let mut e = routed_event(EventKind::Binary, "work", "short-nap");
    e.sys.script_name = "/bin/sleep".to_string();
    e.params.push("2");
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(result.sys.success, "sleep must finish untouched");

    harness.stop().await;
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backpressure: a full or frozen queue fails fast and durably.

use super::prelude::*;
use txp_core::{Command, Event, EventKind};

#[tokio::test]
async fn overfull_queue_rejects_the_overflow() {
    let mut queue = script_queue("tight", 1);
    queue.max_length = 2;
    let mut harness = Harness::start(vec![queue]);

    // four events: one runs, two queue, the fourth is rejected — the
    // long-running script keeps the worker busy while we flood
    for i in 0..4 {
        let mut e = routed_event(EventKind::Binary, "tight", &format!("flood-{}", i));
        e.sys.script_name = "/bin/sleep".to_string();
        e.params.push("2");
        harness.submit(e).await;
    }

    // the rejection comes back immediately, long before any sleep ends
    let result = harness.next_result().await;
    assert!(!result.sys.success);
    assert_eq!(result.sys.failure_cause, "queue_full");
    assert_eq!(result.reference, "flood-3");

    let recovery = harness.recovery_log();
    let rejected = recovery.lines().filter(|l| l.contains("queue_full")).count();
    assert_eq!(rejected, 1, "recovery log:\n{}", recovery);

    harness.stop().await;
}

#[tokio::test]
async fn frozen_queue_rejects_until_unfrozen() {
    let mut harness = Harness::start(vec![script_queue("work", 1)]);

    let mut freeze = Event::command(Command::NucleusConf);
    freeze.params.set("cmd", "freeze");
    freeze.params.set("queue", "work");
    harness.submit(freeze).await;

    let mut e = routed_event(EventKind::Script, "work", "iced");
    e.sys.script_name = "/bin/echo".to_string();
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(!result.sys.success);
    assert_eq!(result.sys.failure_cause, "frozen");

    let mut unfreeze = Event::command(Command::NucleusConf);
    unfreeze.params.set("cmd", "unfreeze");
    unfreeze.params.set("queue", "work");
    harness.submit(unfreeze).await;

    let mut e = routed_event(EventKind::Script, "work", "thawed");
    e.sys.script_name = "/bin/echo".to_string();
    e.params.push("back");
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(result.sys.success);
    assert_eq!(result.reference, "thawed");

    harness.stop().await;
}

#[tokio::test]
async fn error_queue_reroutes_failures_instead_of_recovery() {
    let mut work = script_queue("work", 1);
    work.error_queue = "errors".to_string();
    let harness_queues = vec![work, script_queue("errors", 1)];
    let mut harness = Harness::start(harness_queues);

    let mut e = routed_event(EventKind::Binary, "work", "reroute-1");
    e.sys.script_name = "/bin/false".to_string();
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(!result.sys.success, "originator still sees the failure");

    // give the rerouted error event time to execute in the error queue
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    let recovery = harness.recovery_log();
    assert!(
        !recovery.contains("exec_fail"),
        "error-queue reroute must not write recovery entries:\n{}",
        recovery
    );

    harness.stop().await;
}

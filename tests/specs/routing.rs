// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Destination routing: router fallback and the unknown-queue path.

use super::prelude::*;
use txp_core::EventKind;

#[tokio::test]
async fn unknown_destination_falls_back_to_router_queue() {
    let mut harness = Harness::start_with(vec![script_queue("forward", 1)], |config| {
        config.nucleus.router_queue = "forward".to_string();
    });

    let mut e = routed_event(EventKind::Script, "nowhere", "fallback-1");
    e.sys.script_name = "/bin/echo".to_string();
    e.params.push("routed");
    harness.submit(e).await;

    // the event ran in the `forward` pool
    let result = harness.next_result().await;
    assert!(result.sys.success);
    assert!(result.sys.result.contains("routed"));

    harness.stop().await;
}

#[tokio::test]
async fn unknown_destination_without_router_fails_durably() {
    let mut harness = Harness::start(vec![script_queue("work", 1)]);

    let mut e = routed_event(EventKind::Script, "nowhere", "lost-1");
    e.sys.script_name = "/bin/echo".to_string();
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(!result.sys.success);
    assert_eq!(result.sys.failure_cause, "unknownQueue");

    let recovery = harness.recovery_log();
    assert!(recovery.contains("unknown_queue"));
    assert!(recovery.contains("nowhere"));

    harness.stop().await;
}

#[tokio::test]
async fn sub_queue_suffix_still_reaches_the_queue() {
    let mut harness = Harness::start(vec![script_queue("work", 1)]);

    let mut e = routed_event(EventKind::Script, "work;3", "sub-1");
    e.sys.script_name = "/bin/echo".to_string();
    e.params.push("sub queue");
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(result.sys.success);
    assert!(result.sys.result.contains("sub queue"));

    harness.stop().await;
}

#[tokio::test]
async fn reference_is_synthesized_on_admission() {
    let mut harness = Harness::start(vec![script_queue("work", 1)]);

    let mut e = routed_event(EventKind::Script, "work", "");
    e.sys.script_name = "/bin/echo".to_string();
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert_eq!(result.reference.len(), 11, "NNNNN-NNNNN reference");
    assert_eq!(&result.reference[5..6], "-");

    harness.stop().await;
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent-app round trips. `/bin/cat` is a contract-shaped echoer:
//! every frame in comes back out byte-identical.

use super::prelude::*;
use txp_core::EventKind;

fn cat_queue(name: &str, workers: u32) -> txp_core::QueueDescriptor {
    let mut d = script_queue(name, workers);
    d.persistent_app = "/bin/cat".to_string();
    d
}

#[tokio::test]
async fn three_requests_come_back_in_order() {
    let mut harness = Harness::start(vec![cat_queue("persist", 1)]);

    for i in 0..3 {
        let mut e = routed_event(EventKind::Interpreter, "persist", &format!("req-{}", i));
        // the echoer reflects the frame, so pre-marking success makes
        // the echo a well-formed successful reply
        e.sys.success = true;
        e.sys.result = format!("payload {}", i);
        harness.submit(e).await;
    }

    for i in 0..3 {
        let result = harness.next_result().await;
        assert!(result.sys.success);
        assert_eq!(result.reference, format!("req-{}", i));
        assert_eq!(result.sys.result, format!("payload {}", i));
    }

    harness.stop().await;
}

#[tokio::test]
async fn failed_reply_takes_the_failure_path() {
    let mut harness = Harness::start(vec![cat_queue("persist", 1)]);

    // an echoed frame with success unset is a failed reply
    let mut e = routed_event(EventKind::Interpreter, "persist", "sad");
    e.sys.error_string = "did not work".to_string();
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(!result.sys.success);

    let recovery = harness.recovery_log();
    assert!(recovery.contains("exec_fail"), "recovery log:\n{}", recovery);

    harness.stop().await;
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expired events fail fast, without execution.

use super::prelude::*;
use txp_core::EventKind;

#[tokio::test]
async fn expired_event_never_executes() {
    let dir = tempfile::tempdir().unwrap();
    let witness = dir.path().join("ran");
    let mut harness = Harness::start(vec![script_queue("work", 1)]);

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();

    let mut e = routed_event(EventKind::Script, "work", "too-late");
    e.sys.script_name = "/usr/bin/touch".to_string();
    e.params.push(witness.display().to_string());
    e.expiry = now - 1;
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(!result.sys.success);
    assert_eq!(result.sys.failure_cause, "expired");
    assert!(!witness.exists(), "the script must not have run");

    harness.stop().await;
}

#[tokio::test]
async fn future_expiry_executes_normally() {
    let mut harness = Harness::start(vec![script_queue("work", 1)]);

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();

    let mut e = routed_event(EventKind::Script, "work", "in-time");
    e.sys.script_name = "/bin/echo".to_string();
    e.params.push("still valid");
    e.expiry = now + 3600;
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(result.sys.success);

    harness.stop().await;
}

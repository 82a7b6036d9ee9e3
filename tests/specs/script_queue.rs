// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Script-queue happy path.

use super::prelude::*;
use txp_core::EventKind;

#[tokio::test]
async fn echo_script_round_trips() {
    let mut harness = Harness::start(vec![script_queue("work", 2)]);

    let mut e = routed_event(EventKind::Script, "work", "s1-echo");
    e.sys.script_name = "/bin/echo".to_string();
    e.params.push("hello");
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert_eq!(result.kind, EventKind::Result);
    assert!(result.sys.success, "echo must succeed: {:?}", result.sys.failure_cause);
    assert_eq!(result.reference, "s1-echo");
    assert!(result.sys.result.contains("hello\n"), "got {:?}", result.sys.result);

    harness.stop().await;
}

#[tokio::test]
async fn worker_returns_to_idle_and_runs_the_next_event() {
    let mut harness = Harness::start(vec![script_queue("work", 1)]);

    for i in 0..3 {
        let mut e = routed_event(EventKind::Script, "work", &format!("seq-{}", i));
        e.sys.script_name = "/bin/echo".to_string();
        e.params.push(format!("run {}", i));
        harness.submit(e).await;
    }

    // one worker: results come back in submission order
    for i in 0..3 {
        let result = harness.next_result().await;
        assert!(result.sys.success);
        assert_eq!(result.reference, format!("seq-{}", i));
        assert!(result.sys.result.contains(&format!("run {}", i)));
    }

    harness.stop().await;
}

#[tokio::test]
async fn interpreter_kind_uses_configured_interpreter() {
    // `/bin/sh script args` — the script is argv[1] to the interpreter
    let mut harness = Harness::start_with(vec![script_queue("work", 1)], |config| {
        config.nucleus.interpreter_path = "/bin/sh".to_string();
    });

    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("greet.sh");
    std::fs::write(&script, "echo \"greetings $1\"\n").unwrap();

    let mut e = routed_event(EventKind::Interpreter, "work", "interp-1");
    e.sys.script_name = script.display().to_string();
    e.params.push("friend");
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(result.sys.success);
    assert!(result.sys.result.contains("greetings friend"));

    harness.stop().await;
}

#[tokio::test]
async fn standard_response_markers_decide_success() {
    let mut harness = Harness::start(vec![script_queue("work", 1)]);

    // exit 0 but no success marker in the output
    let mut e = routed_event(EventKind::Script, "work", "markers-1");
    e.sys.script_name = "/bin/echo".to_string();
    e.sys.standard_response = true;
    e.params.push("nothing conclusive");
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(!result.sys.success);
    assert_eq!(result.sys.failure_cause, "noFailOrSuccess");

    // now with the marker
    let mut e = routed_event(EventKind::Script, "work", "markers-2");
    e.sys.script_name = "/bin/echo".to_string();
    e.sys.standard_response = true;
    e.params.push("SUCCESS all done");
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(result.sys.success);

    harness.stop().await;
}

#[tokio::test]
async fn default_script_runs_when_event_names_none() {
    let mut queue = script_queue("work", 1);
    queue.default_script = "/bin/echo".to_string();
    let mut harness = Harness::start(vec![queue]);

    let mut e = routed_event(EventKind::Script, "work", "default-1");
    e.params.push("from default");
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(result.sys.success);
    assert!(result.sys.result.contains("from default"));

    harness.stop().await;
}

#[tokio::test]
async fn failing_script_writes_recovery_and_bumps_retries() {
    let mut harness = Harness::start(vec![script_queue("work", 1)]);

    let mut e = routed_event(EventKind::Script, "work", "fails-1");
    e.sys.script_name = "/bin/false".to_string();
    harness.submit(e).await;

    let result = harness.next_result().await;
    assert!(!result.sys.success);
    assert_eq!(result.sys.failure_cause, "execFailure");

    let recovery = harness.recovery_log();
    assert!(recovery.contains("exec_fail"), "recovery log:\n{}", recovery);
    assert!(recovery.contains("retries:1"), "retry counter bumped:\n{}", recovery);

    harness.stop().await;
}

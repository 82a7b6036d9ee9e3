// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recovery replay into a live nucleus: ledger entries become
//! submissions again.

use super::prelude::*;
use txp_core::{Event, EventKind, RouteHop};
use txp_recovery::{RecoveryLog, RECOVERY_FILE};

fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[tokio::test]
async fn replayed_entries_execute_in_the_queues() {
    // a previous run left two undelivered events in its ledger
    let old_run = tempfile::tempdir().unwrap();
    let mut ledger = RecoveryLog::open(old_run.path()).unwrap();
    for i in 0..2 {
        let mut e = Event::to_queue(EventKind::Script, "work");
        e.reference = format!("replayed-{}", i);
        e.return_route.push(RouteHop::new(1));
        e.sys.script_name = "/bin/echo".to_string();
        e.params.push(format!("resurrected {}", i));
        ledger.write_entry(&e, "exec_fail", "worker", "worker").unwrap();
    }

    // same queue layout as the original run
    let mut harness = Harness::start(vec![script_queue("work", 1)]);
    let tx = harness.gateway.tx.clone();
    let summary = txp_recovery::replay(&old_run.path().join(RECOVERY_FILE), now_epoch(), {
        move |event| {
            let tx = tx.clone();
            async move { tx.send(event).await.is_ok() }
        }
    })
    .await
    .unwrap();
    assert_eq!(summary.resubmitted, 2);
    assert_eq!(summary.failed, 0);

    for i in 0..2 {
        let result = harness.next_result().await;
        assert!(result.sys.success);
        assert_eq!(result.reference, format!("replayed-{}", i));
        assert!(result.sys.result.contains(&format!("resurrected {}", i)));
    }

    // payload files were consumed
    let payloads = std::fs::read_dir(old_run.path().join(txp_recovery::RECOVERY_DIR))
        .unwrap()
        .count();
    assert_eq!(payloads, 0);

    harness.stop().await;
}

#[tokio::test]
async fn expired_ledger_entries_stay_dead() {
    let old_run = tempfile::tempdir().unwrap();
    let mut ledger = RecoveryLog::open(old_run.path()).unwrap();
    let mut e = Event::to_queue(EventKind::Script, "work");
    e.reference = "ancient".to_string();
    e.sys.script_name = "/bin/echo".to_string();
    e.expiry = 1_000; // long past
    ledger.write_entry(&e, "exec_fail", "worker", "worker").unwrap();

    let mut harness = Harness::start(vec![script_queue("work", 1)]);
    let tx = harness.gateway.tx.clone();
    let summary = txp_recovery::replay(&old_run.path().join(RECOVERY_FILE), now_epoch(), {
        move |event| {
            let tx = tx.clone();
            async move { tx.send(event).await.is_ok() }
        }
    })
    .await
    .unwrap();
    assert_eq!(summary.resubmitted, 0);
    assert_eq!(summary.ignored, 1);

    harness.assert_no_result();
    harness.stop().await;
}

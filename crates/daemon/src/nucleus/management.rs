// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue management events.
//!
//! Optional bookkeeping events a pool emits on supervisor transitions,
//! addressed to the queue's configured management queue with its
//! configured event kind. The descriptor's mask selects which of the
//! four types are emitted; no management queue means none are.

use txp_core::{Event, ManagementEventKind, ParamValue, QueueDescriptor};

/// Worker created, respawned (`old` and `new` ids set), or removed
/// (`new` = 0). `old` = 0 on initial creation.
pub fn worker_startup(desc: &QueueDescriptor, old_id: u32, new_id: u32) -> Option<Event> {
    if !desc.emits(ManagementEventKind::WorkerStartup) {
        return None;
    }
    let mut e = base(desc);
    e.params.set("event", ManagementEventKind::WorkerStartup.as_str());
    e.params.set("ownQueue", desc.name.as_str());
    e.params.set("oldPid", ParamValue::UInt(old_id as u64));
    e.params.set("newPid", ParamValue::UInt(new_id as u64));
    Some(e)
}

/// Persistent child up and handshaken.
pub fn persistent_startup(
    desc: &QueueDescriptor,
    worker_id: u32,
    child_pid: u32,
    script_cmd: &str,
) -> Option<Event> {
    if !desc.emits(ManagementEventKind::PersistentStartup) {
        return None;
    }
    let mut e = base(desc);
    e.params.set("event", ManagementEventKind::PersistentStartup.as_str());
    e.params.set("ownQueue", desc.name.as_str());
    e.params.set("workerPid", ParamValue::UInt(worker_id as u64));
    e.params.set("childPid", ParamValue::UInt(child_pid as u64));
    e.params.set("scriptCmd", script_cmd);
    Some(e)
}

/// Persistent child died outside a requested shutdown.
#[allow(clippy::too_many_arguments)]
pub fn persistent_died(
    desc: &QueueDescriptor,
    worker_id: u32,
    child_pid: u32,
    script_cmd: &str,
    exit_status: i32,
    term_signal: Option<i32>,
    error_string: &str,
    failure_cause: &str,
) -> Option<Event> {
    if !desc.emits(ManagementEventKind::PersistentDied) {
        return None;
    }
    let mut e = base(desc);
    e.params.set("event", ManagementEventKind::PersistentDied.as_str());
    e.params.set("ownQueue", desc.name.as_str());
    e.params.set("workerPid", ParamValue::UInt(worker_id as u64));
    e.params.set("childPid", ParamValue::UInt(child_pid as u64));
    e.params.set("scriptCmd", script_cmd);
    e.params.set("exitStatus", ParamValue::Int(exit_status as i64));
    e.params.set("termSignal", ParamValue::Int(term_signal.unwrap_or(0) as i64));
    e.params.set("errorString", error_string);
    e.params.set("failureCause", failure_cause);
    Some(e)
}

fn base(desc: &QueueDescriptor) -> Event {
    let mut e = Event::to_queue(desc.management_event_kind, desc.management_queue.clone());
    e.ensure_reference();
    e
}

#[cfg(test)]
#[path = "management_tests.rs"]
mod tests;

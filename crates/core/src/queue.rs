// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue descriptors — the per-queue configuration the nucleus and its
//! worker pools run from.

use crate::event::EventKind;
use crate::limits::ResourceLimits;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// How a pool hands events to workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// FIFO to any idle worker.
    #[default]
    Straight,
    /// Workers are individually addressable: an event runs only on the
    /// worker whose id matches its `workerPid`.
    Collection,
}

/// Bookkeeping events a pool may emit on supervisor transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagementEventKind {
    WorkerStartup,
    PersistentStartup,
    PersistentDied,
    Done,
}

impl ManagementEventKind {
    fn bit(self) -> u32 {
        match self {
            ManagementEventKind::WorkerStartup => 0x1,
            ManagementEventKind::PersistentStartup => 0x2,
            ManagementEventKind::PersistentDied => 0x4,
            ManagementEventKind::Done => 0x8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ManagementEventKind::WorkerStartup => "worker-startup",
            ManagementEventKind::PersistentStartup => "persistent-startup",
            ManagementEventKind::PersistentDied => "persistent-died",
            ManagementEventKind::Done => "done",
        }
    }

    fn parse_name(s: &str) -> Option<Self> {
        match s {
            "worker-startup" => Some(ManagementEventKind::WorkerStartup),
            "persistent-startup" => Some(ManagementEventKind::PersistentStartup),
            "persistent-died" => Some(ManagementEventKind::PersistentDied),
            "done" => Some(ManagementEventKind::Done),
            _ => None,
        }
    }
}

impl fmt::Display for ManagementEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ALL_MANAGEMENT_KINDS: [ManagementEventKind; 4] = [
    ManagementEventKind::WorkerStartup,
    ManagementEventKind::PersistentStartup,
    ManagementEventKind::PersistentDied,
    ManagementEventKind::Done,
];

/// Which management events a queue emits. Configured as a list of event
/// names; empty means none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagementMask(u32);

impl ManagementMask {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        Self(ALL_MANAGEMENT_KINDS.iter().map(|k| k.bit()).sum())
    }

    pub fn with(mut self, kind: ManagementEventKind) -> Self {
        self.0 |= kind.bit();
        self
    }

    pub fn contains(&self, kind: ManagementEventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl Serialize for ManagementMask {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let names: Vec<&str> =
            ALL_MANAGEMENT_KINDS.iter().filter(|k| self.contains(**k)).map(|k| k.as_str()).collect();
        names.serialize(s)
    }
}

impl<'de> Deserialize<'de> for ManagementMask {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(d)?;
        let mut mask = ManagementMask::empty();
        for name in &names {
            match ManagementEventKind::parse_name(name) {
                Some(kind) => mask = mask.with(kind),
                None => {
                    return Err(serde::de::Error::custom(format!(
                        "unknown management event '{}'",
                        name
                    )))
                }
            }
        }
        Ok(mask)
    }
}

fn default_workers() -> u32 {
    2
}

fn default_max_length() -> usize {
    500_000
}

fn default_max_retries() -> u32 {
    crate::event::MAX_RETRIES
}

fn default_management_kind() -> EventKind {
    EventKind::Interpreter
}

fn default_parse_response() -> bool {
    true
}

/// Per-queue configuration. Immutable except for the fields the
/// nucleus-conf command may rewrite (worker count, max length, max exec
/// time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDescriptor {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: QueueKind,
    /// Pool size.
    #[serde(default = "default_workers")]
    pub workers: u32,
    /// Admissions beyond this fail the queue-full path.
    #[serde(rename = "maxLength", default = "default_max_length")]
    pub max_length: usize,
    /// Per-event execution ceiling in seconds; 0 = unlimited.
    #[serde(rename = "maxExecTime", default)]
    pub max_exec_time: u64,
    #[serde(rename = "maxRetries", default = "default_max_retries")]
    pub max_retries: u32,
    /// Command line of a long-lived child; empty = one-shot execution.
    #[serde(rename = "persistentApp", default)]
    pub persistent_app: String,
    /// Script to run when an executable event names none.
    #[serde(rename = "defaultScript", default)]
    pub default_script: String,
    #[serde(rename = "defaultUrl", default)]
    pub default_url: String,
    /// When set, failed events are re-typed `error` and rerouted here
    /// instead of being written to the recovery log.
    #[serde(rename = "errorQueue", default)]
    pub error_queue: String,
    #[serde(rename = "managementQueue", default)]
    pub management_queue: String,
    #[serde(rename = "managementEventKind", default = "default_management_kind")]
    pub management_event_kind: EventKind,
    #[serde(rename = "managementEvents", default)]
    pub management_events: ManagementMask,
    #[serde(rename = "runPrivileged", default)]
    pub run_privileged: bool,
    #[serde(rename = "blockingWorkerSocket", default)]
    pub blocking_worker_socket: bool,
    /// Try to parse one-shot output as a nested framed result event.
    #[serde(rename = "parseResponseForObject", default = "default_parse_response")]
    pub parse_response_for_object: bool,
    /// Seconds to sleep before respawning a died persistent child.
    #[serde(rename = "respawnDelay", default)]
    pub respawn_delay: u64,
    #[serde(default, skip_serializing_if = "ResourceLimits::is_empty")]
    pub limits: ResourceLimits,
}

impl QueueDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: QueueKind::Straight,
            workers: default_workers(),
            max_length: default_max_length(),
            max_exec_time: 0,
            max_retries: default_max_retries(),
            persistent_app: String::new(),
            default_script: String::new(),
            default_url: String::new(),
            error_queue: String::new(),
            management_queue: String::new(),
            management_event_kind: default_management_kind(),
            management_events: ManagementMask::empty(),
            run_privileged: false,
            blocking_worker_socket: false,
            parse_response_for_object: default_parse_response(),
            respawn_delay: 0,
            limits: ResourceLimits::default(),
        }
    }

    pub fn is_persistent(&self) -> bool {
        !self.persistent_app.is_empty()
    }

    /// Management events are suppressed entirely without a target queue.
    pub fn emits(&self, kind: ManagementEventKind) -> bool {
        !self.management_queue.is_empty() && self.management_events.contains(kind)
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

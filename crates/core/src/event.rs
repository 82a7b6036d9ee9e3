// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The event — the one message type everything in the server exchanges.
//!
//! An event carries four groups of data matching the four wire sections:
//! routing (kind, reference, return route, destination queue), the
//! envelope (trace, expiry, retries, worker pid), typed system
//! parameters, and user-supplied execution parameters. Queue and ready
//! times are bookkeeping only and never serialized.

use crate::route::ReturnRoute;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Cap on the retry counter before an event is dropped for good.
pub const MAX_RETRIES: u32 = 5;

/// Event kind. `Unknown` never travels on the wire from our side; it is
/// what a missing or unrecognized kind parses to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[default]
    Unknown,
    Base,
    Script,
    Interpreter,
    Binary,
    Url,
    Result,
    WorkerDone,
    Command,
    Reply,
    Error,
}

impl EventKind {
    /// Numeric code used in the routing section.
    pub fn wire_code(self) -> i32 {
        match self {
            EventKind::Unknown => 0,
            EventKind::Base => 1,
            EventKind::Script => 2,
            EventKind::Interpreter => 3,
            EventKind::Binary => 4,
            EventKind::Url => 5,
            EventKind::Result => 6,
            EventKind::WorkerDone => 7,
            EventKind::Command => 8,
            EventKind::Reply => 9,
            EventKind::Error => 10,
        }
    }

    pub fn from_wire(code: i32) -> Self {
        match code {
            1 => EventKind::Base,
            2 => EventKind::Script,
            3 => EventKind::Interpreter,
            4 => EventKind::Binary,
            5 => EventKind::Url,
            6 => EventKind::Result,
            7 => EventKind::WorkerDone,
            8 => EventKind::Command,
            9 => EventKind::Reply,
            10 => EventKind::Error,
            _ => EventKind::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Unknown => "unknown",
            EventKind::Base => "base",
            EventKind::Script => "script",
            EventKind::Interpreter => "interpreter",
            EventKind::Binary => "binary",
            EventKind::Url => "url",
            EventKind::Result => "result",
            EventKind::WorkerDone => "worker_done",
            EventKind::Command => "command",
            EventKind::Reply => "reply",
            EventKind::Error => "error",
        }
    }

    /// Kinds a worker hands to its child process.
    pub fn is_executable(self) -> bool {
        matches!(
            self,
            EventKind::Script | EventKind::Interpreter | EventKind::Binary | EventKind::Url
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command id carried in the system parameters of a `command` event.
///
/// Commands are handled out of band: they never produce results or done
/// envelopes. Codes are fixed by the wire format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum Command {
    #[default]
    None,
    Stats,
    ResetStats,
    ReopenLog,
    ExitWhenDone,
    Shutdown,
    NucleusConf,
    EndOfQueue,
    PersistentApp,
    WorkerConf,
}

impl Command {
    pub fn is_none(&self) -> bool {
        matches!(self, Command::None)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Command::None => "none",
            Command::Stats => "stats",
            Command::ResetStats => "reset_stats",
            Command::ReopenLog => "reopen_log",
            Command::ExitWhenDone => "exit_when_done",
            Command::Shutdown => "shutdown",
            Command::NucleusConf => "nucleus_conf",
            Command::EndOfQueue => "end_of_queue",
            Command::PersistentApp => "persistent_app",
            Command::WorkerConf => "worker_conf",
        }
    }
}

impl From<Command> for i32 {
    fn from(cmd: Command) -> i32 {
        match cmd {
            Command::None => 0,
            Command::Stats => 1,
            Command::ResetStats => 2,
            Command::ReopenLog => 3,
            Command::ExitWhenDone => 5,
            Command::Shutdown => 10,
            Command::NucleusConf => 11,
            Command::EndOfQueue => 14,
            Command::PersistentApp => 16,
            Command::WorkerConf => 18,
        }
    }
}

impl From<i32> for Command {
    fn from(code: i32) -> Command {
        match code {
            1 => Command::Stats,
            2 => Command::ResetStats,
            3 => Command::ReopenLog,
            5 => Command::ExitWhenDone,
            10 => Command::Shutdown,
            11 => Command::NucleusConf,
            14 => Command::EndOfQueue,
            16 => Command::PersistentApp,
            18 => Command::WorkerConf,
            _ => Command::None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accept `true`/`false` as well as `0`/`1` for boolean flags — peer
/// implementations serialize these inconsistently.
fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    struct FlagVisitor;

    impl serde::de::Visitor<'_> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a boolean or integer flag")
        }

        fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<bool, E> {
            Ok(v != 0)
        }
    }

    d.deserialize_any(FlagVisitor)
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// Typed system parameters. All fields are optional on the wire; zero
/// values are omitted when serializing. Unknown keys are ignored when
/// parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SysParams {
    #[serde(default, skip_serializing_if = "Command::is_none")]
    pub command: Command,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(rename = "scriptName", default, skip_serializing_if = "String::is_empty")]
    pub script_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result: String,
    #[serde(
        rename = "bSuccess",
        default,
        skip_serializing_if = "is_false",
        deserialize_with = "flag"
    )]
    pub success: bool,
    #[serde(
        rename = "bExpectReply",
        default,
        skip_serializing_if = "is_false",
        deserialize_with = "flag"
    )]
    pub expect_reply: bool,
    #[serde(rename = "errorString", default, skip_serializing_if = "String::is_empty")]
    pub error_string: String,
    #[serde(rename = "failureCause", default, skip_serializing_if = "String::is_empty")]
    pub failure_cause: String,
    #[serde(rename = "systemParam", default, skip_serializing_if = "String::is_empty")]
    pub system_param: String,
    #[serde(rename = "elapsedTime", default, skip_serializing_if = "is_zero")]
    pub elapsed_time: u64,
    #[serde(
        rename = "bGeneratedRecoveryEvent",
        default,
        skip_serializing_if = "is_false",
        deserialize_with = "flag"
    )]
    pub recovery_written: bool,
    #[serde(
        rename = "bStandardResponse",
        default,
        skip_serializing_if = "is_false",
        deserialize_with = "flag"
    )]
    pub standard_response: bool,
}

impl SysParams {
    pub fn is_empty(&self) -> bool {
        *self == SysParams::default()
    }
}

/// A single execution-parameter scalar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Str(String),
    UInt(u64),
    Int(i64),
    Float(f64),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn from_json(value: serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::String(s) => Ok(ParamValue::Str(s)),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Ok(ParamValue::UInt(u))
                } else if let Some(i) = n.as_i64() {
                    Ok(ParamValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(ParamValue::Float(f))
                } else {
                    Err(format!("unrepresentable number: {}", n))
                }
            }
            other => Err(format!("unsupported parameter value: {}", other)),
        }
    }
}

impl PartialEq for ParamValue {
    /// Numeric equality across the integer variants: an unsigned 5 and a
    /// signed 5 are the same wire value.
    fn eq(&self, other: &Self) -> bool {
        use ParamValue::*;
        match (self, other) {
            (Str(a), Str(b)) => a == b,
            (UInt(a), UInt(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (UInt(a), Int(b)) | (Int(b), UInt(a)) => {
                *b >= 0 && *a == *b as u64
            }
            _ => false,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::UInt(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

/// Execution parameters: either an ordered name→value mapping or a
/// positional list, never both — the wire carries one JSON container.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ExecParams {
    #[default]
    Empty,
    Named(IndexMap<String, ParamValue>),
    Positional(Vec<ParamValue>),
}

impl ExecParams {
    pub fn is_empty(&self) -> bool {
        match self {
            ExecParams::Empty => true,
            ExecParams::Named(m) => m.is_empty(),
            ExecParams::Positional(v) => v.is_empty(),
        }
    }

    /// Insert or replace a named parameter. Ignored with a diagnostic if
    /// the container already holds positional values.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        let name = name.into();
        match self {
            ExecParams::Empty => {
                let mut map = IndexMap::new();
                map.insert(name, value.into());
                *self = ExecParams::Named(map);
            }
            ExecParams::Named(map) => {
                map.insert(name, value.into());
            }
            ExecParams::Positional(_) => {
                tracing::warn!(name, "ignoring named parameter on positional container");
            }
        }
    }

    /// Append a positional parameter. Ignored with a diagnostic if the
    /// container already holds named values.
    pub fn push(&mut self, value: impl Into<ParamValue>) {
        match self {
            ExecParams::Empty => *self = ExecParams::Positional(vec![value.into()]),
            ExecParams::Positional(v) => v.push(value.into()),
            ExecParams::Named(_) => {
                tracing::warn!("ignoring positional parameter on named container");
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        match self {
            ExecParams::Named(map) => map.get(name),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_str())
    }

    pub fn positional(&self) -> &[ParamValue] {
        match self {
            ExecParams::Positional(v) => v,
            _ => &[],
        }
    }

    pub fn named(&self) -> Option<&IndexMap<String, ParamValue>> {
        match self {
            ExecParams::Named(map) => Some(map),
            _ => None,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Null => Ok(ExecParams::Empty),
            serde_json::Value::Object(map) => {
                if map.is_empty() {
                    return Ok(ExecParams::Empty);
                }
                let mut out = IndexMap::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k, ParamValue::from_json(v)?);
                }
                Ok(ExecParams::Named(out))
            }
            serde_json::Value::Array(values) => {
                if values.is_empty() {
                    return Ok(ExecParams::Empty);
                }
                let mut out = Vec::with_capacity(values.len());
                for v in values {
                    out.push(ParamValue::from_json(v)?);
                }
                Ok(ExecParams::Positional(out))
            }
            other => Err(format!("unsupported parameter container: {}", other)),
        }
    }
}

impl Serialize for ExecParams {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        match self {
            ExecParams::Empty => s.serialize_map(Some(0))?.end(),
            ExecParams::Named(map) => map.serialize(s),
            ExecParams::Positional(v) => v.serialize(s),
        }
    }
}

impl<'de> Deserialize<'de> for ExecParams {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(d)?;
        ExecParams::from_json(value).map_err(serde::de::Error::custom)
    }
}

/// A self-describing message. Equality covers the archived (wire) fields
/// only; queue time and the expired flag are local bookkeeping.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub reference: String,
    pub return_route: ReturnRoute,
    pub dest_queue: String,
    pub trace: String,
    pub trace_timestamp: String,
    /// Absolute expiry, epoch seconds; 0 = never expires.
    pub expiry: u64,
    /// Relative lifetime hint in seconds; -1 = not applicable.
    pub lifetime: i64,
    pub retries: u32,
    /// Target worker id for collection queues; 0 = any worker.
    pub worker_pid: u32,
    /// Earliest execution time. A relative offset on admission, absolute
    /// epoch seconds once the event sits in a queue.
    pub ready_time: u64,
    pub sys: SysParams,
    pub params: ExecParams,

    // local bookkeeping, never serialized
    pub queue_time: u64,
    pub expired: bool,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            reference: String::new(),
            return_route: ReturnRoute::new(),
            dest_queue: String::new(),
            trace: String::new(),
            trace_timestamp: String::new(),
            expiry: 0,
            lifetime: -1,
            retries: 0,
            worker_pid: 0,
            ready_time: 0,
            sys: SysParams::default(),
            params: ExecParams::default(),
            queue_time: 0,
            expired: false,
        }
    }

    pub fn to_queue(kind: EventKind, queue: impl Into<String>) -> Self {
        let mut e = Self::new(kind);
        e.dest_queue = queue.into();
        e
    }

    pub fn command(cmd: Command) -> Self {
        let mut e = Self::new(EventKind::Command);
        e.sys.command = cmd;
        e
    }

    pub fn is_command(&self) -> bool {
        self.kind == EventKind::Command
    }

    pub fn command_id(&self) -> Command {
        if self.kind == EventKind::Command {
            self.sys.command
        } else {
            Command::None
        }
    }

    /// Queue name with any `;sub` suffix stripped.
    pub fn queue_name(&self) -> &str {
        match self.dest_queue.split_once(';') {
            Some((name, _)) => name,
            None => &self.dest_queue,
        }
    }

    /// Numeric sub-queue id, when the destination carries one.
    pub fn sub_queue(&self) -> Option<u32> {
        self.dest_queue
            .split_once(';')
            .and_then(|(_, sub)| sub.parse().ok())
    }

    /// Synthesize a reference if the event arrived without one.
    pub fn ensure_reference(&mut self) -> &str {
        if self.reference.is_empty() {
            self.reference = crate::reference::generate_reference();
        }
        &self.reference
    }

    pub fn is_expired(&self, now_epoch: u64) -> bool {
        self.expiry != 0 && self.expiry <= now_epoch
    }

    pub fn retry_exceeded(&self, max_retries: u32) -> bool {
        self.retries >= max_retries
    }

    pub fn append_trace(&mut self, stamp: &str) {
        self.trace.push_str(stamp);
    }

    /// Compact single-line rendering for logs and the recovery ledger.
    /// Deliberately comma-free so it can sit in a CSV tail field.
    pub fn brief(&self) -> String {
        let mut s = format!("{} ref:{} queue:{}", self.kind, self.reference, self.dest_queue);
        if self.retries > 0 {
            s.push_str(&format!(" retries:{}", self.retries));
        }
        if self.kind == EventKind::Command {
            s.push_str(&format!(" cmd:{}", self.sys.command));
        }
        if self.kind == EventKind::Result {
            s.push_str(&format!(" success:{}", self.sys.success));
        }
        if !self.sys.script_name.is_empty() {
            s.push_str(&format!(" script:{}", self.sys.script_name));
        }
        s
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.reference == other.reference
            && self.return_route == other.return_route
            && self.dest_queue == other.dest_queue
            && self.trace == other.trace
            && self.trace_timestamp == other.trace_timestamp
            && self.expiry == other.expiry
            && self.lifetime == other.lifetime
            && self.retries == other.retries
            && self.worker_pid == other.worker_pid
            && self.ready_time == other.ready_time
            && self.sys == other.sys
            && self.params == other.params
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.brief())
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;

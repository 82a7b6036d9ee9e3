// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! POSIX resource limits applied to a queue's child processes.

use serde::{Deserialize, Serialize};

/// Optional per-queue RLIMIT values, all in the unit of the underlying
/// limit (bytes except `cpuSeconds`). Unset fields leave the inherited
/// limit untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(rename = "addressSpace", default, skip_serializing_if = "Option::is_none")]
    pub address_space: Option<u64>,
    #[serde(rename = "cpuSeconds", default, skip_serializing_if = "Option::is_none")]
    pub cpu_seconds: Option<u64>,
    #[serde(rename = "dataSegment", default, skip_serializing_if = "Option::is_none")]
    pub data_segment: Option<u64>,
    #[serde(rename = "fileSize", default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(rename = "stackSize", default, skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<u64>,
}

impl ResourceLimits {
    pub fn is_empty(&self) -> bool {
        *self == ResourceLimits::default()
    }
}

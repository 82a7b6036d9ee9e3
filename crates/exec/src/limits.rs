// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RLIMIT application between fork and exec.

use nix::sys::resource::{setrlimit, Resource};
use txp_core::ResourceLimits;

fn set_one(resource: Resource, value: Option<u64>) -> std::io::Result<()> {
    if let Some(v) = value {
        setrlimit(resource, v, v).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    }
    Ok(())
}

/// Install a `pre_exec` hook applying the configured limits in the
/// child, after fork and before exec. `pre_exec` is unsafe by signature
/// (the hook runs in a forked child where only async-signal-safe calls
/// are allowed); `setrlimit` is on that list.
pub(crate) fn apply_limits(cmd: &mut tokio::process::Command, limits: &ResourceLimits) {
    if limits.is_empty() {
        return;
    }
    let limits = limits.clone();
    #[allow(unsafe_code)]
    unsafe {
        cmd.pre_exec(move || {
            set_one(Resource::RLIMIT_AS, limits.address_space)?;
            set_one(Resource::RLIMIT_CPU, limits.cpu_seconds)?;
            set_one(Resource::RLIMIT_DATA, limits.data_segment)?;
            set_one(Resource::RLIMIT_FSIZE, limits.file_size)?;
            set_one(Resource::RLIMIT_STACK, limits.stack_size)?;
            Ok(())
        });
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot spawn of the external rotate helper.

use crate::RecoveryError;
use std::path::Path;
use std::time::Duration;

/// Ceiling on a rotate run; a wedged helper must not block startup
/// forever.
const ROTATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Run the rotate helper once, before logs are opened.
///
/// Invoked as `<helper> -s <state-file> -f <config>`; success is the
/// helper's zero exit. Stdout/stderr are captured and surfaced in the
/// error on failure.
pub async fn rotate_logs(
    helper: &Path,
    state_file: &Path,
    config: &Path,
) -> Result<(), RecoveryError> {
    let mut cmd = tokio::process::Command::new(helper);
    cmd.arg("-s").arg(state_file).arg("-f").arg(config);

    let output = match tokio::time::timeout(ROTATE_TIMEOUT, cmd.output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(RecoveryError::RotateFailed {
                status: -1,
                output: format!("timed out after {}s", ROTATE_TIMEOUT.as_secs()),
            })
        }
    };

    if output.status.success() {
        return Ok(());
    }
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Err(RecoveryError::RotateFailed {
        status: output.status.code().unwrap_or(-1),
        output: text,
    })
}

#[cfg(test)]
#[path = "rotate_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line assembly for the three executable event kinds.

use crate::ExecError;
use txp_core::{Event, EventKind};

/// Single-quote a string for embedding in a `sh -c` command line.
/// Embedded quotes close the quoting, emit an escaped quote, and reopen:
/// `it's` becomes `'it'\''s'`.
pub fn shell_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// A resolved program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Build the invocation for an executable event.
    ///
    /// - `script`: configured shell runs `-c '<script> <quoted params>'`
    /// - `interpreter`: configured interpreter gets the script as its
    ///   first argument and the event parameters as the rest
    /// - `binary`: the script path is executed directly
    ///
    /// Falls back to the queue's default script when the event names
    /// none.
    pub fn build(
        event: &Event,
        shell_path: &str,
        interpreter_path: &str,
        default_script: &str,
    ) -> Result<CommandSpec, ExecError> {
        let mut script = event.sys.script_name.clone();
        if script.is_empty() {
            script = default_script.to_string();
        }
        if script.is_empty() {
            return Err(ExecError::NoScript);
        }

        let params = event.params.positional();

        match event.kind {
            EventKind::Script => {
                let mut cmdline = script;
                for p in params {
                    cmdline.push(' ');
                    cmdline.push_str(&shell_escape(&p.to_string()));
                }
                Ok(CommandSpec {
                    program: shell_path.to_string(),
                    args: vec!["-c".to_string(), cmdline],
                })
            }
            EventKind::Interpreter => {
                let mut args = Vec::with_capacity(1 + params.len());
                args.push(script);
                args.extend(params.iter().map(|p| p.to_string()));
                Ok(CommandSpec { program: interpreter_path.to_string(), args })
            }
            EventKind::Binary => Ok(CommandSpec {
                program: script,
                args: params.iter().map(|p| p.to_string()).collect(),
            }),
            other => Err(ExecError::UnsupportedKind(other)),
        }
    }

    /// Loggable rendering of the invocation.
    pub fn render(&self) -> String {
        let mut s = self.program.clone();
        for a in &self.args {
            s.push(' ');
            s.push('"');
            s.push_str(a);
            s.push('"');
        }
        s
    }
}

#[cfg(test)]
#[path = "command_line_tests.rs"]
mod tests;

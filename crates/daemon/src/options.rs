// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line surface of `txprocd`.
//!
//! Flags are parsed by hand: besides the fixed switches, every config
//! key is reachable as `--section.key=value` and forwarded into the
//! config loader, so the option table never chases the config schema.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("unexpected argument '{0}'")]
    Unexpected(String),
}

#[derive(Debug, Default)]
pub struct Options {
    pub help: bool,
    pub version: bool,
    pub display_options: bool,
    pub daemonise: bool,
    pub rotate: bool,
    pub nologconsole: bool,
    pub logstderr: bool,
    pub flushlogs: bool,
    pub config_file: Option<PathBuf>,
    /// `section.key` → raw value, applied onto the config tree.
    pub overrides: Vec<(String, String)>,
}

impl Options {
    /// Parse argv (without the program name).
    pub fn parse<I, S>(args: I) -> Result<Options, OptionsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut opts = Options::default();
        for arg in args {
            let arg = arg.as_ref();
            match arg {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--display_options" => opts.display_options = true,
                "--daemonise" => opts.daemonise = true,
                "--rotate" => opts.rotate = true,
                "--nologconsole" => opts.nologconsole = true,
                "--logstderr" => opts.logstderr = true,
                "--flushlogs" => opts.flushlogs = true,
                other => match txp_config::parse_override(other) {
                    Some((key, value)) if key == "main.configFile" => {
                        opts.config_file = Some(PathBuf::from(value));
                    }
                    Some(pair) => opts.overrides.push(pair),
                    None => return Err(OptionsError::Unexpected(other.to_string())),
                },
            }
        }
        Ok(opts)
    }

    pub fn usage() -> String {
        let mut s = String::new();
        s.push_str("Usage: txprocd [OPTIONS]\n\n");
        s.push_str("Transaction-processing server: routes events to per-queue worker pools.\n\n");
        s.push_str("OPTIONS:\n");
        s.push_str("    -h, --help              Print help information\n");
        s.push_str("    -V, --version           Print version information\n");
        s.push_str("    --display_options       Print the effective configuration and exit\n");
        s.push_str("    --daemonise             Detach from the terminal\n");
        s.push_str("    --rotate                Rotate logs on startup\n");
        s.push_str("    --nologconsole          Do not log to the console\n");
        s.push_str("    --logstderr             Log to stderr instead of the log file\n");
        s.push_str("    --flushlogs             Flush log writers after every line\n");
        s.push_str("    --main.configFile=FILE  Configuration file\n");
        s.push_str("    --main.recover=FILE     Replay FILE into the queues, drain, exit\n");
        s.push_str("    --section.key=value     Override any configuration key\n");
        s
    }
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;

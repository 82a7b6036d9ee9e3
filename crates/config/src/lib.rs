// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! txp-config: TOML configuration for the txProc server.
//!
//! A config file has `[main]`, `[nucleus]` and `[recovery]` tables plus
//! any number of `[[queue]]` entries. Every key is also reachable from
//! the command line as `--section.key=value`; overrides are applied to
//! the raw TOML tree before it is typed, so they follow exactly the same
//! validation as the file.

mod overrides;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use txp_core::QueueDescriptor;

pub use overrides::parse_override;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid override '{0}'")]
    InvalidOverride(String),

    #[error("duplicate queue '{0}'")]
    DuplicateQueue(String),
}

fn default_base_name() -> String {
    "txproc".to_string()
}

fn state_root() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("txproc")
}

fn default_log_dir() -> PathBuf {
    state_root().join("logs")
}

fn default_stats_dir() -> PathBuf {
    state_root().join("stats")
}

fn default_pid_file() -> PathBuf {
    state_root().join("txproc.pid")
}

/// `[main]` — process identity and filesystem layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MainConfig {
    #[serde(rename = "baseName")]
    pub base_name: String,
    #[serde(rename = "logDir")]
    pub log_dir: PathBuf,
    #[serde(rename = "statsDir")]
    pub stats_dir: PathBuf,
    #[serde(rename = "pidFile")]
    pub pid_file: PathBuf,
    /// Skip starting the nucleus (gateway-only deployments).
    pub nonucleus: bool,
    /// Skip opening external sockets (nucleus-only deployments).
    pub nosocket: bool,
    /// Recovery-only mode: replay this file, drain, exit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recover: Option<PathBuf>,
    /// Flush log writers after every line.
    #[serde(rename = "flushLogs")]
    pub flush_logs: bool,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            base_name: default_base_name(),
            log_dir: default_log_dir(),
            stats_dir: default_stats_dir(),
            pid_file: default_pid_file(),
            nonucleus: false,
            nosocket: false,
            recover: None,
            flush_logs: false,
        }
    }
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

fn default_interpreter() -> String {
    "/usr/bin/perl".to_string()
}

fn default_exec_success() -> String {
    "SUCCESS".to_string()
}

fn default_exec_failure() -> String {
    "FAILURE".to_string()
}

fn default_error_prefix() -> String {
    "error:".to_string()
}

fn default_trace_prefix() -> String {
    "trace:".to_string()
}

fn default_param_prefix() -> String {
    "param:".to_string()
}

fn default_maintenance_interval() -> u64 {
    1
}

fn default_expired_scan_interval() -> u64 {
    10
}

fn default_max_shutdown_wait() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `[nucleus]` — scheduler behaviour shared by every queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NucleusConfig {
    /// Queue receiving events whose destination is not configured
    /// locally; empty disables the fallback.
    #[serde(rename = "notLocalQueueRouterQueue")]
    pub router_queue: String,
    /// Queue that stats events are pushed into on the stats command.
    #[serde(rename = "statsQueue")]
    pub stats_queue: String,
    /// Seconds between maintenance ticks.
    #[serde(rename = "maintenanceInterval")]
    pub maintenance_interval: u64,
    /// Seconds between expired-event scans (a multiple of the tick).
    #[serde(rename = "expiredScanInterval")]
    pub expired_scan_interval: u64,
    /// Grace period before drain-then-exit escalates to termination.
    #[serde(rename = "maxShutdownWaitTime")]
    pub max_shutdown_wait: u64,
    #[serde(rename = "shellPath")]
    pub shell_path: String,
    #[serde(rename = "interpreterPath")]
    pub interpreter_path: String,
    /// Substring in one-shot output that marks success.
    #[serde(rename = "execSuccess")]
    pub exec_success: String,
    /// Substring in one-shot output that marks failure.
    #[serde(rename = "execFailure")]
    pub exec_failure: String,
    #[serde(rename = "errorPrefix")]
    pub error_prefix: String,
    #[serde(rename = "tracePrefix")]
    pub trace_prefix: String,
    #[serde(rename = "paramPrefix")]
    pub param_prefix: String,
    #[serde(rename = "logLevel")]
    pub log_level: String,
}

impl Default for NucleusConfig {
    fn default() -> Self {
        Self {
            router_queue: String::new(),
            stats_queue: String::new(),
            maintenance_interval: default_maintenance_interval(),
            expired_scan_interval: default_expired_scan_interval(),
            max_shutdown_wait: default_max_shutdown_wait(),
            shell_path: default_shell(),
            interpreter_path: default_interpreter(),
            exec_success: default_exec_success(),
            exec_failure: default_exec_failure(),
            error_prefix: default_error_prefix(),
            trace_prefix: default_trace_prefix(),
            param_prefix: default_param_prefix(),
            log_level: default_log_level(),
        }
    }
}

fn default_rotate_helper() -> PathBuf {
    PathBuf::from("/usr/sbin/logrotate")
}

fn default_keep_files() -> u32 {
    5
}

/// `[recovery]` — durable ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Rotate the logs once at startup (also `--rotate`).
    #[serde(rename = "rotateOnStart")]
    pub rotate_on_start: bool,
    #[serde(rename = "rotateHelper")]
    pub rotate_helper: PathBuf,
    /// Configuration file handed to the rotate helper.
    #[serde(rename = "rotateConfig")]
    pub rotate_config: PathBuf,
    /// Log-file owner applied when running privileged; empty = leave.
    pub owner: String,
    pub group: String,
    #[serde(rename = "keepFiles")]
    pub keep_files: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            rotate_on_start: false,
            rotate_helper: default_rotate_helper(),
            rotate_config: PathBuf::new(),
            owner: String::new(),
            group: String::new(),
            keep_files: default_keep_files(),
        }
    }
}

/// The whole server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub main: MainConfig,
    pub nucleus: NucleusConfig,
    pub recovery: RecoveryConfig,
    #[serde(rename = "queue")]
    pub queues: Vec<QueueDescriptor>,
}

impl Config {
    /// Load from an optional file, then apply `--section.key=value`
    /// overrides. With no file the built-in defaults apply.
    pub fn load(
        path: Option<&Path>,
        overrides: &[(String, String)],
    ) -> Result<Config, ConfigError> {
        let mut value: toml::Value = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .map_err(|source| ConfigError::Read { path: p.to_path_buf(), source })?;
                text.parse()?
            }
            None => toml::Value::Table(toml::map::Map::new()),
        };

        for (key, raw) in overrides {
            overrides::apply(&mut value, key, raw)?;
        }

        let config: Config = value.try_into()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for q in &self.queues {
            if !seen.insert(q.name.as_str()) {
                return Err(ConfigError::DuplicateQueue(q.name.clone()));
            }
        }
        Ok(())
    }

    pub fn queue(&self, name: &str) -> Option<&QueueDescriptor> {
        self.queues.iter().find(|q| q.name == name)
    }

    /// Rendering for `--display_options`.
    pub fn display(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|e| format!("<unrenderable config: {}>", e))
    }

    /// `<logDir>/<baseName>.log`
    pub fn main_log_path(&self) -> PathBuf {
        self.main.log_dir.join(format!("{}.log", self.main.base_name))
    }

    /// `<logDir>/q_<queue>.log`
    pub fn queue_log_path(&self, queue: &str) -> PathBuf {
        self.main.log_dir.join(format!("q_{}.log", queue))
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `--section.key=value` command-line overrides.
//!
//! Overrides mutate the raw TOML tree before it is deserialized. Plain
//! sections use `section.key`; queues are addressed by name as
//! `queue.<name>.<key>` and must already exist in the file (the command
//! line cannot define a whole queue).

use crate::ConfigError;
use toml::Value;

/// Split a `--section.key=value` argument into its key path and value.
/// Returns `None` for arguments not in that shape.
pub fn parse_override(arg: &str) -> Option<(String, String)> {
    let stripped = arg.strip_prefix("--")?;
    let (key, value) = stripped.split_once('=')?;
    if !key.contains('.') {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

/// Interpret the raw value the way TOML would: integer, float, boolean,
/// then string.
fn coerce(raw: &str) -> Value {
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Integer(v);
    }
    if let Ok(v) = raw.parse::<f64>() {
        return Value::Float(v);
    }
    match raw {
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        _ => Value::String(raw.to_string()),
    }
}

/// Apply one override to the TOML tree.
pub fn apply(root: &mut Value, key: &str, raw: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = key.split('.').collect();
    let table = root
        .as_table_mut()
        .ok_or_else(|| ConfigError::InvalidOverride(key.to_string()))?;

    match parts.as_slice() {
        [section, field] => {
            let entry = table
                .entry((*section).to_string())
                .or_insert_with(|| Value::Table(toml::map::Map::new()));
            let section_table = entry
                .as_table_mut()
                .ok_or_else(|| ConfigError::InvalidOverride(key.to_string()))?;
            section_table.insert((*field).to_string(), coerce(raw));
            Ok(())
        }
        ["queue", name, field] => {
            let queues = table
                .get_mut("queue")
                .and_then(Value::as_array_mut)
                .ok_or_else(|| ConfigError::InvalidOverride(key.to_string()))?;
            for q in queues.iter_mut() {
                let qt = q
                    .as_table_mut()
                    .ok_or_else(|| ConfigError::InvalidOverride(key.to_string()))?;
                if qt.get("name").and_then(Value::as_str) == Some(*name) {
                    qt.insert((*field).to_string(), coerce(raw));
                    return Ok(());
                }
            }
            Err(ConfigError::InvalidOverride(key.to_string()))
        }
        _ => Err(ConfigError::InvalidOverride(key.to_string())),
    }
}

#[cfg(test)]
#[path = "overrides_tests.rs"]
mod tests;

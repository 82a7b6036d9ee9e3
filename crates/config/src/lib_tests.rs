// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Write;

fn write_config(dir: &tempfile::TempDir, text: &str) -> PathBuf {
    let path = dir.path().join("txproc.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(text.as_bytes()).unwrap();
    path
}

#[test]
fn defaults_without_file() {
    let config = Config::load(None, &[]).unwrap();
    assert_eq!(config.main.base_name, "txproc");
    assert_eq!(config.nucleus.shell_path, "/bin/sh");
    assert_eq!(config.nucleus.maintenance_interval, 1);
    assert!(config.queues.is_empty());
    assert!(config.main.recover.is_none());
}

#[test]
fn full_file_parses() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
        [main]
        baseName = "txp"
        logDir = "/var/log/txp"

        [nucleus]
        notLocalQueueRouterQueue = "forward"
        statsQueue = "stats"
        execSuccess = "OK"

        [recovery]
        keepFiles = 3

        [[queue]]
        name = "work"
        workers = 4

        [[queue]]
        name = "persist"
        persistentApp = "/usr/bin/app --serve"
        "#,
    );

    let config = Config::load(Some(&path), &[]).unwrap();
    assert_eq!(config.main.base_name, "txp");
    assert_eq!(config.main_log_path(), PathBuf::from("/var/log/txp/txp.log"));
    assert_eq!(config.queue_log_path("work"), PathBuf::from("/var/log/txp/q_work.log"));
    assert_eq!(config.nucleus.router_queue, "forward");
    assert_eq!(config.nucleus.exec_success, "OK");
    assert_eq!(config.recovery.keep_files, 3);
    assert_eq!(config.queues.len(), 2);
    assert!(config.queue("persist").unwrap().is_persistent());
    assert!(config.queue("missing").is_none());
}

#[test]
fn overrides_win_over_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
        [main]
        baseName = "txp"

        [[queue]]
        name = "work"
        workers = 2
        "#,
    );

    let overrides = vec![
        ("main.baseName".to_string(), "other".to_string()),
        ("nucleus.statsQueue".to_string(), "stats".to_string()),
        ("queue.work.workers".to_string(), "8".to_string()),
    ];
    let config = Config::load(Some(&path), &overrides).unwrap();
    assert_eq!(config.main.base_name, "other");
    assert_eq!(config.nucleus.stats_queue, "stats");
    assert_eq!(config.queue("work").unwrap().workers, 8);
}

#[test]
fn override_for_unknown_queue_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[[queue]]\nname = \"work\"\n");
    let overrides = vec![("queue.nope.workers".to_string(), "8".to_string())];
    let err = Config::load(Some(&path), &overrides).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidOverride(_)));
}

#[test]
fn duplicate_queue_names_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[[queue]]\nname = \"work\"\n\n[[queue]]\nname = \"work\"\n");
    let err = Config::load(Some(&path), &[]).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateQueue(name) if name == "work"));
}

#[test]
fn missing_file_is_read_error() {
    let err = Config::load(Some(Path::new("/nonexistent/txproc.toml")), &[]).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn display_round_trips_through_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[main]\nbaseName = \"txp\"\n[[queue]]\nname = \"work\"\n");
    let config = Config::load(Some(&path), &[]).unwrap();
    let rendered = config.display();
    let reparsed: Config = toml::from_str(&rendered).unwrap();
    assert_eq!(reparsed.main.base_name, "txp");
    assert_eq!(reparsed.queues.len(), 1);
}

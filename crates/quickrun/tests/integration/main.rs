//! Integration tests for quickrun
//!
//! These tests require the Go toolchain to be installed and on PATH.
//! Run with: cargo test -p quickrun --features integration-tests

#![cfg(feature = "integration-tests")]

use std::fs;
use std::path::Path;

use quickrun::config::Config;

mod concurrency;
mod config_loading;
mod go_toolchain;
mod two_step_build;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

pub(crate) fn fixture_path(kind: &str, name: &str) -> String {
    format!("{FIXTURES_PATH}/{kind}/{name}")
}

/// Default config with workspaces placed under `root`
///
/// The timeout leaves room for a cold Go build cache.
pub(crate) fn test_config(root: &Path) -> Config {
    Config {
        workspace_root: Some(root.to_path_buf()),
        timeout: std::time::Duration::from_secs(120),
        ..Config::default()
    }
}

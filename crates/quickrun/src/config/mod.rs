use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::config::toolchain::Toolchain;
use crate::types::duration_secs;

mod loader;
pub mod toolchain;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../quickrun.example.toml");

/// Lowest timeout a config may carry
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);
/// Lowest memory ceiling a config may carry, in bytes
pub const MIN_MEMORY: u64 = 1024 * 1024;
/// Lowest cache TTL a config may carry
pub const MIN_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for quickrun
///
/// Zero values (`0`, empty strings, empty collections, `None`) mean "unset" when
/// one config is [merged](Self::merge) over another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory under which workspaces are created (system temp dir if unset)
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Name given to the build unit created in every workspace
    #[serde(default)]
    pub module_name: String,

    /// Deadline for a whole compile-and-run cycle, in seconds in config files
    #[serde(default, with = "duration_secs")]
    pub timeout: Duration,

    /// Memory ceiling for the toolchain process tree in bytes
    #[serde(default)]
    pub max_memory: u64,

    #[serde(default = "enabled")]
    pub enable_cache: bool,

    /// Maximum number of cached results
    #[serde(default)]
    pub cache_size: usize,

    /// Age after which a cached result is ignored, in seconds in config files
    #[serde(default, with = "duration_secs")]
    pub cache_ttl: Duration,

    /// Keep workspaces on disk after each compilation for inspection
    #[serde(default)]
    pub debug: bool,

    /// Log every finished compilation at INFO instead of DEBUG
    #[serde(default)]
    pub verbose: bool,

    /// Remove still-tracked workspaces when the compiler is closed
    #[serde(default = "enabled")]
    pub cleanup_on_exit: bool,

    /// Ceiling on simultaneously running toolchain processes
    #[serde(default)]
    pub max_concurrent_jobs: usize,

    /// Accept sources that import denied packages
    #[serde(default)]
    pub allow_unsafe_imports: bool,

    /// Environment variables overlaid on the inherited environment
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Build tags handed to the toolchain
    #[serde(default)]
    pub build_tags: Vec<String>,

    #[serde(default)]
    pub toolchain: Toolchain,
}

impl Config {
    /// Create a new config from the embedded example
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config with every field unset
    ///
    /// Useful as the base of a partial override handed to [`merge`](Self::merge).
    /// Note that booleans are always taken from the override.
    pub fn empty() -> Self {
        Self {
            workspace_root: None,
            module_name: String::new(),
            timeout: Duration::ZERO,
            max_memory: 0,
            enable_cache: false,
            cache_size: 0,
            cache_ttl: Duration::ZERO,
            debug: false,
            verbose: false,
            cleanup_on_exit: false,
            max_concurrent_jobs: 0,
            allow_unsafe_imports: false,
            environment: HashMap::new(),
            build_tags: Vec::new(),
            toolchain: Toolchain::empty(),
        }
    }

    /// Return a new config with the set fields of `other` applied over `self`
    ///
    /// Scalars and strings are taken from `other` when non-zero, maps and lists
    /// are replaced wholesale when non-empty, and booleans always come from
    /// `other`.
    pub fn merge(&self, other: &Config) -> Config {
        let mut merged = self.clone();

        if other.workspace_root.is_some() {
            merged.workspace_root = other.workspace_root.clone();
        }
        if !other.module_name.is_empty() {
            merged.module_name = other.module_name.clone();
        }
        if !other.timeout.is_zero() {
            merged.timeout = other.timeout;
        }
        if other.max_memory != 0 {
            merged.max_memory = other.max_memory;
        }
        if other.cache_size != 0 {
            merged.cache_size = other.cache_size;
        }
        if !other.cache_ttl.is_zero() {
            merged.cache_ttl = other.cache_ttl;
        }
        if other.max_concurrent_jobs != 0 {
            merged.max_concurrent_jobs = other.max_concurrent_jobs;
        }

        merged.enable_cache = other.enable_cache;
        merged.debug = other.debug;
        merged.verbose = other.verbose;
        merged.cleanup_on_exit = other.cleanup_on_exit;
        merged.allow_unsafe_imports = other.allow_unsafe_imports;

        if !other.environment.is_empty() {
            merged.environment = other.environment.clone();
        }
        if !other.build_tags.is_empty() {
            merged.build_tags = other.build_tags.clone();
        }

        merged.toolchain = self.toolchain.merge(&other.toolchain);
        merged
    }

    /// Raise out-of-range tunables to their floors
    pub fn validate(&mut self) {
        if self.timeout < MIN_TIMEOUT {
            self.timeout = MIN_TIMEOUT;
        }
        if self.max_memory < MIN_MEMORY {
            self.max_memory = MIN_MEMORY;
        }
        if self.cache_size < 1 {
            self.cache_size = 1;
        }
        if self.cache_ttl < MIN_CACHE_TTL {
            self.cache_ttl = MIN_CACHE_TTL;
        }
        if self.max_concurrent_jobs < 1 {
            self.max_concurrent_jobs = 1;
        }
    }

    /// Directory workspaces are created under
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Environment overlay for toolchain subprocesses, build tags included
    pub fn subprocess_env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .environment
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        env.sort();

        if let Some(tags) = self.toolchain.tags_variable(&self.build_tags) {
            env.push(tags);
        }
        env
    }
}

fn enabled() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        let mut config =
            Self::parse_layer(EXAMPLE_CONFIG).expect("embedded default config should be valid");
        config.validate();
        config
    }
}

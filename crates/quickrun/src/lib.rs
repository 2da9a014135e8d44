//! A library for compiling and running source code through an external toolchain.
//!
//! Quickrun takes a source file or string, writes it into a fresh temporary
//! workspace, drives a configurable toolchain over it (Go by default) and
//! reports the outcome as a [`CompilationResult`] with captured output, timings,
//! peak memory and an error classification.
//!
//! # Features
//!
//! - **Result cache** - Successful results are keyed by a hash of the source and expire after a TTL.
//! - **Static checks** - Sources importing denied packages are rejected before anything runs.
//! - **Bounded execution** - Deadline, cancellation and memory ceiling kill the whole process group.
//! - **Job ceiling** - At most `max_concurrent_jobs` toolchain cycles run at once.
//! - **TOML configuration** - Tunables and the toolchain commands live in one file.
//! - **Metrics** - Success, cache and timing statistics per compiler.

pub use cache::{Cache, CacheEntry, CacheError, MemoryCache, content_hash};
pub use compiler::{CLOSED_MESSAGE, Compiler, CompilerError};
pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Toolchain};
pub use engine::{
    ExecuteError, ExecutionOutput, ExecutionRequest, Executor, ToolchainExecutor, Workspace,
    WorkspaceError, WorkspaceRegistry,
};
pub use metrics::{Metrics, MetricsSnapshot};
pub use types::{CompilationResult, CompilationStatus, ValidationResult};
pub use validator::Validator;

pub mod cache;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod types;
pub mod validator;

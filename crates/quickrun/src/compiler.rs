//! Compiler facade
//!
//! Ties the pieces together for one call: hash the source, consult the cache,
//! validate, hand the source to the engine under the job ceiling, then record
//! the outcome. Every call produces a [`CompilationResult`]; failures are
//! folded into its status rather than returned as errors.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use futures::FutureExt;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{Cache, CacheEntry, CacheError, MemoryCache, content_hash};
use crate::config::Config;
use crate::engine::{
    ExecuteError, ExecutionOutput, ExecutionRequest, Executor, ToolchainExecutor,
    WorkspaceRegistry,
};
use crate::metrics::Metrics;
use crate::types::{CompilationResult, CompilationStatus};
use crate::validator::Validator;

/// Runtime error text of calls made after [`Compiler::close`]
pub const CLOSED_MESSAGE: &str = "compiler is closed";

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("compiler is closed")]
    Closed,

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

#[derive(Debug)]
struct State {
    closed: bool,
    config: Arc<Config>,
}

/// Compiles and runs sources through an external toolchain
///
/// Safe to share between tasks. Configuration, cache, metrics and workspace
/// bookkeeping each sit behind their own lock; the toolchain itself runs
/// outside all of them, bounded by `max_concurrent_jobs`.
#[derive(Debug)]
pub struct Compiler {
    state: RwLock<State>,
    /// Permits for concurrently running toolchain cycles
    jobs: Semaphore,
    /// Permits to drop instead of returning, left over from lowering the ceiling
    retired: AtomicUsize,
    cache: Arc<dyn Cache>,
    metrics: Arc<Metrics>,
    workspaces: Arc<WorkspaceRegistry>,
    executor: Arc<dyn Executor>,
}

impl Compiler {
    /// Create a compiler
    ///
    /// `config` is merged over [`Config::default`] and clamped; `None` uses
    /// the defaults as they are.
    pub fn new(config: Option<Config>) -> Self {
        Self::with_executor(config, Arc::new(ToolchainExecutor::new()))
    }

    /// Create a compiler that runs sources through `executor`
    pub fn with_executor(config: Option<Config>, executor: Arc<dyn Executor>) -> Self {
        let config = effective_config(config);
        let cache = Arc::new(MemoryCache::new(config.cache_size, config.cache_ttl));
        Self::with_parts(config, cache, executor)
    }

    /// Create a compiler from fully specified parts
    ///
    /// `config` is clamped but not merged with the defaults.
    pub fn with_parts(mut config: Config, cache: Arc<dyn Cache>, executor: Arc<dyn Executor>) -> Self {
        config.validate();
        Self {
            jobs: Semaphore::new(job_permits(config.max_concurrent_jobs)),
            retired: AtomicUsize::new(0),
            state: RwLock::new(State {
                closed: false,
                config: Arc::new(config),
            }),
            cache,
            metrics: Arc::new(Metrics::new()),
            workspaces: Arc::new(WorkspaceRegistry::new()),
            executor,
        }
    }

    /// Compile and run the source file at `path`
    pub async fn compile(&self, path: impl AsRef<Path>) -> CompilationResult {
        self.compile_with_cancel(path, &CancellationToken::new())
            .await
    }

    /// Compile and run the source file at `path`, aborting when `cancel` fires
    #[instrument(skip(self, path, cancel), fields(path = %path.as_ref().display()))]
    pub async fn compile_with_cancel(
        &self,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> CompilationResult {
        let path = path.as_ref();
        if self.is_closed() {
            return closed_result();
        }

        let mut result = match tokio::fs::read_to_string(path).await {
            Ok(source) => self.compile_code_with_cancel(&source, cancel).await,
            Err(e) => {
                let mut result = CompilationResult::compile_error(format!(
                    "failed to read source file {}: {e}",
                    path.display()
                ));
                let config = self.config();
                self.finish(&config, &result);
                result.file_path = Some(path.to_path_buf());
                return result;
            }
        };
        result.file_path = Some(path.to_path_buf());
        result
    }

    /// Compile and run `code`
    pub async fn compile_code(&self, code: &str) -> CompilationResult {
        self.compile_code_with_cancel(code, &CancellationToken::new())
            .await
    }

    /// Compile and run `code`, aborting when `cancel` fires
    #[instrument(skip_all, fields(len = code.len()))]
    pub async fn compile_code_with_cancel(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> CompilationResult {
        let started = Instant::now();
        let Some(config) = self.open_state() else {
            return closed_result();
        };

        let hash = content_hash(code);
        debug!(%hash, "compiling");

        if config.enable_cache
            && let Some(entry) = self.cache.get(&hash)
        {
            let mut result = entry.result;
            result.status = CompilationStatus::CacheHit;
            result.cache_hit = true;
            result.file_path = None;
            result.hash = hash;
            result.duration = started.elapsed();
            self.finish(&config, &result);
            return result;
        }

        let mut result = CompilationResult::new();
        result.hash = hash.clone();

        let validation = Validator::from_config(&config).validate(code);
        result.set_metadata("complexity_score", validation.complexity_score);
        if validation.has_warnings() {
            result.set_metadata("warnings", validation.warnings.clone());
        }
        if validation.has_unsafe_imports() {
            result.set_metadata("unsafe_imports", validation.unsafe_imports.clone());
        }
        if !validation.valid {
            result.fail_compile(
                CompilationStatus::ValidationError,
                validation.errors.join("; "),
            );
            result.duration = started.elapsed();
            self.finish(&config, &result);
            return result;
        }

        match self.run(code, &config, cancel).await {
            Ok(output) => apply_output(&mut result, output),
            Err(err) => apply_error(&mut result, &err),
        }
        result.duration = started.elapsed();

        if result.success && config.enable_cache {
            let entry = CacheEntry::new(hash.as_str(), result.clone());
            if let Err(e) = self.cache.set(&hash, entry) {
                warn!(%hash, error = %e, "failed to cache result");
            }
        }

        self.finish(&config, &result);
        result
    }

    /// Acquire a job permit and a workspace, then hand over to the engine
    async fn run(
        &self,
        code: &str,
        config: &Config,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutput, ExecuteError> {
        let deadline = tokio::time::Instant::now() + config.timeout;

        let permit = tokio::select! {
            permit = tokio::time::timeout_at(deadline, self.jobs.acquire()) => match permit {
                Ok(Ok(permit)) => permit,
                // Semaphore closed by close()
                Ok(Err(_)) => return Err(ExecuteError::Cancelled),
                Err(_) => return Err(ExecuteError::TimedOut(config.timeout)),
            },
            () = cancel.cancelled() => return Err(ExecuteError::Cancelled),
        };
        let _slot = JobSlot {
            permit: Some(permit),
            retired: &self.retired,
        };

        let workspace = self
            .workspaces
            .create(&config.workspace_root(), config.debug)
            .await?;

        let request = ExecutionRequest {
            source: code,
            workspace: &workspace,
            config,
            deadline,
            cancel,
        };
        let outcome = match AssertUnwindSafe(self.executor.execute(request))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(%message, "engine panicked");
                Err(ExecuteError::Crashed(message))
            }
        };
        workspace.remove().await;
        outcome
    }

    /// Current configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.state.read().config)
    }

    /// Merge `config` over the current configuration and make it active
    ///
    /// Compilations already running keep the configuration they started with.
    #[instrument(skip_all)]
    pub fn update_config(&self, config: Config) -> Result<(), CompilerError> {
        let mut state = self.state.write();
        if state.closed {
            return Err(CompilerError::Closed);
        }

        let mut merged = state.config.merge(&config);
        merged.validate();

        self.resize_jobs(state.config.max_concurrent_jobs, merged.max_concurrent_jobs);
        self.cache.reconfigure(merged.cache_size, merged.cache_ttl);
        if !merged.enable_cache {
            self.cache.clear()?;
        }

        debug!(?merged, "configuration updated");
        state.config = Arc::new(merged);
        Ok(())
    }

    /// Close the compiler
    ///
    /// Idempotent. Clears the cache and, with `cleanup_on_exit`, removes every
    /// workspace still on disk. Compilations waiting for a job permit are
    /// cancelled; later calls return a runtime-error result.
    #[instrument(skip_all)]
    pub fn close(&self) -> Result<(), CompilerError> {
        let config = {
            let mut state = self.state.write();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            self.jobs.close();
            Arc::clone(&state.config)
        };

        self.cache.clear()?;
        if config.cleanup_on_exit {
            let removed = self.workspaces.cleanup_all();
            debug!(removed, "removed tracked workspaces");
        }
        info!("compiler closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Live metrics
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn cache(&self) -> &dyn Cache {
        self.cache.as_ref()
    }

    /// Workspaces still on disk
    pub fn workspaces(&self) -> &WorkspaceRegistry {
        &self.workspaces
    }

    fn open_state(&self) -> Option<Arc<Config>> {
        let state = self.state.read();
        if state.closed {
            return None;
        }
        Some(Arc::clone(&state.config))
    }

    /// Move the job ceiling from `from` to `to` without swapping semaphores
    ///
    /// Permits held by running jobs cannot be taken back; the shortfall is
    /// recorded in `retired` and settled as those jobs finish. Callers hold the
    /// state write lock.
    fn resize_jobs(&self, from: usize, to: usize) {
        let (from, to) = (job_permits(from), job_permits(to));
        if to > from {
            let grow = to - from;
            let owed = self
                .retired
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |owed| {
                    Some(owed.saturating_sub(grow))
                })
                .unwrap_or_else(|owed| owed);
            self.jobs.add_permits(grow - owed.min(grow));
        } else if from > to {
            let shrink = from - to;
            let forgotten = self.jobs.forget_permits(shrink);
            self.retired.fetch_add(shrink - forgotten, Ordering::AcqRel);
        }
        debug!(from, to, "job ceiling resized");
    }

    fn finish(&self, config: &Config, result: &CompilationResult) {
        self.metrics.record(result);
        if config.verbose {
            info!(
                status = %result.status,
                hash = %result.hash,
                exit_code = result.exit_code,
                duration = ?result.duration,
                cache_hit = result.cache_hit,
                "compilation finished"
            );
        } else {
            debug!(
                status = %result.status,
                hash = %result.hash,
                exit_code = result.exit_code,
                duration = ?result.duration,
                "compilation finished"
            );
        }
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Drop for Compiler {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close compiler on drop");
        }
    }
}

fn effective_config(config: Option<Config>) -> Config {
    let mut config = match config {
        Some(config) => Config::default().merge(&config),
        None => Config::default(),
    };
    config.validate();
    config
}

fn job_permits(jobs: usize) -> usize {
    jobs.clamp(1, Semaphore::MAX_PERMITS)
}

/// A running job's permit
///
/// Returned to the semaphore on drop, unless the ceiling was lowered while the
/// job ran and a permit is still owed.
struct JobSlot<'a> {
    permit: Option<SemaphorePermit<'a>>,
    retired: &'a AtomicUsize,
}

impl Drop for JobSlot<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take()
            && self
                .retired
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |owed| owed.checked_sub(1))
                .is_ok()
        {
            permit.forget();
        }
    }
}

fn closed_result() -> CompilationResult {
    CompilationResult::error(CompilationStatus::RuntimeError, CLOSED_MESSAGE)
}

fn apply_output(result: &mut CompilationResult, output: ExecutionOutput) {
    result.compile_time = output.compile_time;
    result.execution_time = output.execution_time;
    result.memory_used = output.memory_used;
    result.exit_code = output.exit_code;
    if !output.success() {
        result.fail_runtime(
            CompilationStatus::RuntimeError,
            format!("exit status {}", output.exit_code),
        );
    }
    result.content = output.stdout;
    result.error_output = output.stderr;
}

fn apply_error(result: &mut CompilationResult, err: &ExecuteError) {
    if let Some(code) = err.exit_code() {
        result.exit_code = code;
    }
    let status = err.status();
    if status == CompilationStatus::CompileError {
        result.fail_compile(status, err.to_string());
    } else {
        result.fail_runtime(status, err.to_string());
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

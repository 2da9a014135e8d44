//! Execution engine
//!
//! Materializes a source file in a workspace and drives the configured
//! toolchain over it: optional build-unit init, optional separate build, then
//! the run step. Every subprocess runs in its own process group under the
//! cycle's deadline, the caller's cancellation token and the memory ceiling.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

pub use crate::engine::command::Step;
pub use crate::engine::workspace::{WORKSPACE_PREFIX, Workspace, WorkspaceError, WorkspaceRegistry};
use crate::config::Config;
use crate::engine::command::StepCommand;
use crate::engine::process::{Limits, ProcessOutput};
use crate::types::CompilationStatus;

mod command;
mod memory;
mod process;
mod workspace;

/// Errors that stop a compile-and-run cycle before the program exits on its own
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("failed to prepare workspace: {0}")]
    Setup(#[from] WorkspaceError),

    #[error("command '{0}' not found in PATH")]
    CommandNotFound(String),

    #[error("{step} step failed with exit code {exit_code}: {output}")]
    StepFailed {
        step: Step,
        exit_code: i32,
        output: String,
    },

    #[error("failed to spawn '{program}' for {step} step: {source}")]
    Spawn {
        step: Step,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("execution timed out after {0:?}")]
    TimedOut(Duration),

    #[error("execution cancelled")]
    Cancelled,

    #[error("memory limit exceeded: {used} bytes used, limit {limit} bytes")]
    MemoryExceeded { used: u64, limit: u64 },

    #[error("execution crashed: {0}")]
    Crashed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecuteError {
    /// Result status this failure is reported under
    pub fn status(&self) -> CompilationStatus {
        match self {
            ExecuteError::TimedOut(_) => CompilationStatus::Timeout,
            ExecuteError::Setup(_)
            | ExecuteError::CommandNotFound(_)
            | ExecuteError::StepFailed { .. } => CompilationStatus::CompileError,
            ExecuteError::Spawn { step, .. } if step.is_compile_phase() => {
                CompilationStatus::CompileError
            }
            ExecuteError::Spawn { .. }
            | ExecuteError::Cancelled
            | ExecuteError::MemoryExceeded { .. }
            | ExecuteError::Crashed(_)
            | ExecuteError::Io(_) => CompilationStatus::RuntimeError,
        }
    }

    /// Exit code to report, when the failure carries one
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecuteError::StepFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

/// Everything the engine needs for one cycle
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub source: &'a str,
    pub workspace: &'a Workspace,
    pub config: &'a Config,
    /// Absolute deadline for the whole cycle
    pub deadline: Instant,
    pub cancel: &'a CancellationToken,
}

/// Outcome of a cycle whose run step exited, with any exit code
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    /// Workspace setup, init, build and spawn of the run step
    pub compile_time: Duration,
    /// Spawn of the run step until its exit
    pub execution_time: Duration,
    /// Peak resident memory over all steps, in bytes
    pub memory_used: u64,
}

impl ExecutionOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs sources through a toolchain
#[async_trait]
pub trait Executor: Send + Sync + fmt::Debug {
    async fn execute(
        &self,
        request: ExecutionRequest<'_>,
    ) -> Result<ExecutionOutput, ExecuteError>;
}

/// [`Executor`] that spawns the configured external toolchain
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolchainExecutor;

impl ToolchainExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for ToolchainExecutor {
    #[instrument(skip_all, fields(workspace = %request.workspace.path().display()))]
    async fn execute(
        &self,
        request: ExecutionRequest<'_>,
    ) -> Result<ExecutionOutput, ExecuteError> {
        let started = Instant::now();
        let ExecutionRequest {
            source,
            workspace,
            config,
            deadline,
            cancel,
        } = request;
        let toolchain = &config.toolchain;
        let module = config.module_name.as_str();
        let dir = workspace.path();
        let env = config.subprocess_env();

        workspace
            .write_file(&toolchain.entry_file, source.as_bytes())
            .await?;

        // Resolve every program before running anything
        let init = if toolchain.init_command.is_empty() {
            None
        } else {
            let args = toolchain.expand(&toolchain.init_command, module);
            Some(StepCommand::new(Step::Init, args, dir).envs(env.clone()).resolve()?)
        };
        let build = match toolchain.build_command {
            Some(ref command) if !command.is_empty() => {
                let args = toolchain.expand(command, module);
                Some(StepCommand::new(Step::Build, args, dir).envs(env.clone()).resolve()?)
            }
            _ => None,
        };
        let run = StepCommand::new(
            Step::Run,
            toolchain.expand(&toolchain.run_command, module),
            dir,
        )
        .envs(env)
        .resolve()?;

        let limits = Limits {
            deadline,
            timeout: config.timeout,
            max_memory: config.max_memory,
            cancel,
        };

        let mut memory_used = 0;
        for step in [init, build].into_iter().flatten() {
            let output = process::run(&step, limits).await?;
            memory_used = memory_used.max(output.peak_memory);
            check_step(&step, &output)?;
        }

        let output = process::run(&run, limits).await?;
        let finished = Instant::now();
        memory_used = memory_used.max(output.peak_memory);

        let result = ExecutionOutput {
            exit_code: output.exit_code,
            compile_time: output.started.duration_since(started),
            execution_time: finished.duration_since(output.started),
            memory_used,
            stdout: output.stdout,
            stderr: output.stderr,
        };
        debug!(
            exit_code = result.exit_code,
            compile_time = ?result.compile_time,
            execution_time = ?result.execution_time,
            memory_used,
            "execution finished"
        );
        Ok(result)
    }
}

/// A compile-phase step must exit cleanly
fn check_step(command: &StepCommand, output: &ProcessOutput) -> Result<(), ExecuteError> {
    if output.exit_code == 0 {
        return Ok(());
    }
    Err(ExecuteError::StepFailed {
        step: command.step(),
        exit_code: output.exit_code,
        output: output.combined(),
    })
}

/// A toolchain of plain shell commands, for tests that must not need Go
#[cfg(all(test, unix))]
pub(crate) fn shell_toolchain() -> crate::config::Toolchain {
    let args = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    crate::config::Toolchain {
        init_command: args(&["sh", "-c", "echo {module} > unit.txt"]),
        build_command: None,
        run_command: args(&["sh", "{entry}"]),
        entry_file: "main.sh".to_string(),
        binary_name: "main".to_string(),
        tags_env: "BUILD_TAGS".to_string(),
        tags_format: "-tags={tags}".to_string(),
        denied_imports: args(&["unsafe"]),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::*;

    fn config() -> Config {
        Config {
            toolchain: shell_toolchain(),
            ..Config::default()
        }
    }

    async fn execute_in(
        root: &Path,
        config: &Config,
        source: &str,
    ) -> (Result<ExecutionOutput, ExecuteError>, Workspace) {
        let registry = Arc::new(WorkspaceRegistry::new());
        let workspace = registry.create(root, false).await.unwrap();
        let cancel = CancellationToken::new();
        let request = ExecutionRequest {
            source,
            workspace: &workspace,
            config,
            deadline: Instant::now() + config.timeout,
            cancel: &cancel,
        };
        let result = ToolchainExecutor.execute(request).await;
        (result, workspace)
    }

    #[tokio::test]
    async fn runs_source_and_captures_output() {
        let root = tempfile::tempdir().unwrap();
        let config = config();
        let (result, workspace) = execute_in(root.path(), &config, "printf hello").await;

        let output = result.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, b"hello");
        assert!(output.stderr.is_empty());
        assert!(output.execution_time > Duration::ZERO);

        let unit = std::fs::read_to_string(workspace.path().join("unit.txt")).unwrap();
        assert_eq!(unit.trim(), "temp-module");
        assert!(workspace.path().join("main.sh").is_file());
    }

    #[tokio::test]
    async fn nonzero_run_exit_is_returned_not_raised() {
        let root = tempfile::tempdir().unwrap();
        let (result, _workspace) =
            execute_in(root.path(), &config(), "echo partial; echo boom >&2; exit 3").await;

        let output = result.unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, b"partial\n");
        assert_eq!(output.stderr, b"boom\n");
    }

    #[tokio::test]
    async fn init_failure_is_a_compile_error() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config();
        config.toolchain.init_command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo cannot create {module} >&2; exit 2".to_string(),
        ];

        let (result, _workspace) = execute_in(root.path(), &config, "printf hello").await;
        let err = result.unwrap_err();
        assert_eq!(err.status(), CompilationStatus::CompileError);
        assert_eq!(err.exit_code(), Some(2));
        assert!(err.to_string().contains("cannot create temp-module"));
    }

    #[tokio::test]
    async fn separate_build_step() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config();
        config.toolchain.build_command = Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            "cp {entry} {binary} && chmod +x {binary}".to_string(),
        ]);
        config.toolchain.run_command = vec!["./{binary}".to_string()];

        let (result, workspace) =
            execute_in(root.path(), &config, "#!/bin/sh\nprintf built").await;
        let output = result.unwrap();
        assert_eq!(output.stdout, b"built");
        assert!(workspace.path().join("main").is_file());
    }

    #[tokio::test]
    async fn build_failure_is_a_compile_error() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config();
        config.toolchain.build_command = Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo syntax error; exit 1".to_string(),
        ]);

        let (result, _workspace) = execute_in(root.path(), &config, "printf hello").await;
        match result {
            Err(ExecuteError::StepFailed { step, output, .. }) => {
                assert_eq!(step, Step::Build);
                assert_eq!(output, "syntax error");
            }
            other => panic!("expected build failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_tool_fails_before_any_step() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config();
        config.toolchain.run_command = vec!["quickrun-no-such-tool".to_string()];

        let (result, workspace) = execute_in(root.path(), &config, "printf hello").await;
        let err = result.unwrap_err();
        assert!(matches!(err, ExecuteError::CommandNotFound(_)));
        assert_eq!(err.status(), CompilationStatus::CompileError);
        assert!(!workspace.path().join("unit.txt").exists());
    }

    #[tokio::test]
    async fn environment_overlay_and_tags_reach_the_program() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config();
        config
            .environment
            .insert("GREETING".to_string(), "hi".to_string());
        config.build_tags = vec!["a".to_string(), "b".to_string()];

        let (result, _workspace) = execute_in(
            root.path(),
            &config,
            r#"printf '%s %s' "$GREETING" "$BUILD_TAGS""#,
        )
        .await;
        assert_eq!(result.unwrap().stdout, b"hi -tags=a,b");
    }

    #[tokio::test]
    async fn timeout_stops_the_cycle() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config();
        config.timeout = Duration::from_secs(1);

        let started = std::time::Instant::now();
        let (result, _workspace) = execute_in(root.path(), &config, "sleep 5").await;
        let err = result.unwrap_err();
        assert_eq!(err.status(), CompilationStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn status_classification() {
        let spawn = |step| ExecuteError::Spawn {
            step,
            program: "go".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert_eq!(spawn(Step::Init).status(), CompilationStatus::CompileError);
        assert_eq!(spawn(Step::Run).status(), CompilationStatus::RuntimeError);
        assert_eq!(
            ExecuteError::Cancelled.status(),
            CompilationStatus::RuntimeError
        );
        assert_eq!(
            ExecuteError::MemoryExceeded { used: 2, limit: 1 }.status(),
            CompilationStatus::RuntimeError
        );
        assert!(
            ExecuteError::MemoryExceeded { used: 2, limit: 1 }
                .to_string()
                .starts_with("memory limit exceeded")
        );
    }
}

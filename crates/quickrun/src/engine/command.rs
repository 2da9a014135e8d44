//! Command builder for toolchain steps

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::engine::ExecuteError;

/// Phase of a compile-and-run cycle a subprocess belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Create the build unit
    Init,
    /// Build the entry file into a binary
    Build,
    /// Run the program
    Run,
}

impl Step {
    /// Whether a failure in this step is a compile-time failure
    pub fn is_compile_phase(&self) -> bool {
        matches!(self, Step::Init | Step::Build)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Init => "init",
            Step::Build => "build",
            Step::Run => "run",
        })
    }
}

/// Builder for one toolchain subprocess
#[derive(Debug, Clone)]
pub(crate) struct StepCommand {
    step: Step,
    args: Vec<String>,
    working_dir: PathBuf,
    env: Vec<(String, String)>,
}

impl StepCommand {
    pub fn new(step: Step, args: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            step,
            args,
            working_dir: working_dir.into(),
            env: Vec::new(),
        }
    }

    /// Overlay environment variables on the inherited environment
    pub fn envs(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn step(&self) -> Step {
        self.step
    }

    /// The program, as resolved so far
    pub fn program(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Resolve the program to a path
    ///
    /// Bare names are looked up in `PATH` (the overlaid value if the
    /// environment sets one). Relative paths such as `./main` are anchored
    /// at the working directory and not checked, since build output may not
    /// exist yet.
    pub fn resolve(mut self) -> Result<Self, ExecuteError> {
        let program = self
            .args
            .first()
            .ok_or_else(|| ExecuteError::CommandNotFound(String::new()))?;

        if program.contains('/') {
            let path = Path::new(program);
            if path.is_relative() {
                self.args[0] = self.working_dir.join(path).to_string_lossy().into_owned();
            }
            return Ok(self);
        }

        let search_path = self
            .env
            .iter()
            .rev()
            .find(|(key, _)| key == "PATH")
            .map(|(_, value)| OsString::from(value))
            .or_else(|| std::env::var_os("PATH"))
            .unwrap_or_default();

        let resolved = std::env::split_paths(&search_path)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ExecuteError::CommandNotFound(program.clone()))?;

        self.args[0] = resolved.to_string_lossy().into_owned();
        Ok(self)
    }

    /// Build the tokio command
    ///
    /// stdin is closed, stdout and stderr are piped, and on Unix the child
    /// leads a new process group so the whole tree can be signalled at once.
    pub fn build(&self) -> Result<Command, ExecuteError> {
        let (program, args) = self
            .args
            .split_first()
            .ok_or_else(|| ExecuteError::CommandNotFound(String::new()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.working_dir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        Ok(command)
    }
}

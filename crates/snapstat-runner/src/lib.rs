//! snapstat-runner: Bounded command execution with output capture.
//!
//! This crate provides:
//! - Command execution with a wall-clock budget ([`run_with_timeout`])
//! - Process-group isolation (entire process tree killed on timeout)
//! - Signal escalation (SIGTERM → SIGKILL after a short delay)
//! - Output capture, optionally with stderr merged into stdout
//! - The [`CommandRunner`] seam that lets callers swap in canned output
//!
//! # Exit Status
//!
//! A non-zero exit is *not* a failure here. The reporting tools print useful
//! partial text on soft errors, so whatever was captured is returned. Only a
//! spawn failure or a timeout produces an error.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use snapstat_runner::{run_captured, CommandSpec, RunConfig};
//!
//! let spec = CommandSpec::new("sar").arg("-q").env("LC_ALL", "C");
//! let text = run_captured(&spec, Duration::from_secs(3), RunConfig::default());
//! match text {
//!     Ok(text) => println!("{text}"),
//!     Err(e) => eprintln!("sar unavailable: {e}"),
//! }
//! ```

use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use snapstat_core::{signals, SnapstatError, SnapstatResult};

#[cfg(unix)]
mod unix;

/// Configuration for bounded execution.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Initial signal to send on timeout.
    ///
    /// Default: `SIGTERM` (15)
    pub signal: i32,

    /// Delay before escalating to SIGKILL if the tree doesn't exit.
    ///
    /// Default: 1 second
    pub kill_after: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            signal: signals::SIGTERM,
            kill_after: Duration::from_secs(1),
        }
    }
}

/// A command to run: program, argument vector, environment, stdin.
///
/// Commands are executed directly, never through a shell, so arguments need
/// no escaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    stdin: Option<String>,
    merge_stderr: bool,
}

impl CommandSpec {
    /// Start building a command for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stdin: None,
            merge_stderr: false,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Feed `input` to the child's stdin, then close it.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Capture stderr into the same buffer as stdout.
    pub fn merge_stderr(mut self) -> Self {
        self.merge_stderr = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_envs(&self) -> &[(String, String)] {
        &self.envs
    }

    pub fn stdin_data(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    pub fn merges_stderr(&self) -> bool {
        self.merge_stderr
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Outcome of bounded execution.
#[derive(Debug)]
pub enum RunOutcome {
    /// Command exited within the budget.
    Completed {
        /// Captured output (stdout, plus stderr when merged), lossily decoded.
        output: String,

        /// Exit status of the child process.
        exit_status: ExitStatus,
    },

    /// Command ran past the budget and was killed. Output is discarded.
    TimedOut {
        /// Signal that was sent to terminate the process.
        signal_sent: i32,

        /// Whether escalation to SIGKILL occurred.
        escalated: bool,
    },
}

/// Run a command with a wall-clock budget.
///
/// Spawns the command, captures its output, and waits for it to exit or for
/// `timeout` to elapse. The child leads its own process group, so on timeout
/// the entire tree is killed.
///
/// # Returns
///
/// * `Ok(RunOutcome::Completed { .. })` - Command finished within budget
/// * `Ok(RunOutcome::TimedOut { .. })` - Command was killed due to timeout
/// * `Err(SnapstatError)` - Failed to spawn or fatal error
pub fn run_with_timeout(
    spec: &CommandSpec,
    timeout: Duration,
    config: RunConfig,
) -> SnapstatResult<RunOutcome> {
    if spec.program.trim().is_empty() {
        return Err(SnapstatError::invalid_argument("program must not be empty"));
    }

    #[cfg(unix)]
    return unix::run_with_timeout_impl(spec, timeout, &config);

    #[cfg(not(unix))]
    {
        let _ = (timeout, config);
        Err(SnapstatError::not_supported(
            "run_with_timeout",
            snapstat_core::get_platform(),
        ))
    }
}

/// Run a command and return its captured text.
///
/// A timeout becomes [`SnapstatError::Timeout`]; any exit status counts as
/// success.
pub fn run_captured(
    spec: &CommandSpec,
    timeout: Duration,
    config: RunConfig,
) -> SnapstatResult<String> {
    match run_with_timeout(spec, timeout, config)? {
        RunOutcome::Completed { output, .. } => Ok(output),
        RunOutcome::TimedOut { .. } => Err(SnapstatError::Timeout),
    }
}

/// Anything that can turn a [`CommandSpec`] into text within a budget.
///
/// The cache and report layers depend on this trait rather than on
/// subprocesses, so tests can substitute canned output.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec, timeout: Duration) -> SnapstatResult<String>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for Arc<T> {
    fn run(&self, spec: &CommandSpec, timeout: Duration) -> SnapstatResult<String> {
        (**self).run(spec, timeout)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, spec: &CommandSpec, timeout: Duration) -> SnapstatResult<String> {
        (**self).run(spec, timeout)
    }
}

/// [`CommandRunner`] backed by real subprocesses.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    config: RunConfig,
}

impl SystemRunner {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, timeout: Duration) -> SnapstatResult<String> {
        run_captured(spec, timeout, self.config.clone())
    }
}

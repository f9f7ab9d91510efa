//! External command execution.
//!
//! Commands are built as typed values and handed to a [`CommandRunner`],
//! which either executes them or, under a dry-run flag, suppresses
//! execution and returns a synthetic success record. Keeping the runner
//! behind a value boundary means reconciliation logic never constructs
//! command strings.

use reconcile::ReconcileError;
use std::fmt;
use std::process::Stdio;

/// A fully-specified external command invocation.
#[derive(Debug, Clone)]
pub struct Command {
    program: String,
    args: Vec<String>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of one command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Synthetic success for suppressed dry-run invocations.
    fn synthetic() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            code: 0,
        }
    }
}

/// Executes commands, honoring a global dry-run flag.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    dry_run: bool,
}

impl CommandRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run a command, capturing stdout/stderr/exit code. In dry-run mode
    /// the command is logged but not executed and a synthetic success is
    /// returned.
    pub fn run(&self, cmd: &Command) -> Result<CommandOutput, ReconcileError> {
        if self.dry_run {
            log::info!("(dry run) {cmd}");
            return Ok(CommandOutput::synthetic());
        }
        self.execute(cmd)
    }

    /// Run a read-only command. Current-state snapshots must be real even
    /// in dry-run mode - a dry run predicts from genuine state; only
    /// mutations are suppressed.
    pub fn read(&self, cmd: &Command) -> Result<CommandOutput, ReconcileError> {
        self.execute(cmd)
    }

    fn execute(&self, cmd: &Command) -> Result<CommandOutput, ReconcileError> {
        log::debug!("executing: {cmd}");
        let output = std::process::Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ReconcileError::external(format!("failed to execute {cmd}: {e}")))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code().unwrap_or(-1),
        })
    }

    /// Run a command, mapping a nonzero exit to an external failure
    /// carrying the trimmed stderr.
    pub fn run_checked(&self, cmd: &Command) -> Result<CommandOutput, ReconcileError> {
        Self::check(cmd, self.run(cmd)?)
    }

    /// [`Self::read`] with the nonzero-exit mapping of [`Self::run_checked`].
    pub fn read_checked(&self, cmd: &Command) -> Result<CommandOutput, ReconcileError> {
        Self::check(cmd, self.read(cmd)?)
    }

    fn check(cmd: &Command, output: CommandOutput) -> Result<CommandOutput, ReconcileError> {
        if output.success() {
            Ok(output)
        } else {
            let detail = if output.stderr.trim().is_empty() {
                format!("{} exited with code {}", cmd.program(), output.code)
            } else {
                output.stderr.trim().to_string()
            };
            Err(ReconcileError::external(detail))
        }
    }
}

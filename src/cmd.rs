use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::runtime::{Builder, Runtime};

use crate::error::{DeployError, DeployResult};

/// Timeout applied to commands that do not set their own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// A single external tool invocation: program, arguments,
/// working directory, extra environment, and timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command line as a single space-joined string.
    #[must_use]
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Exit code and captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn ok(stdout: &str) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[must_use]
    pub fn failed(code: i32, stderr: &str) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Last non-empty line of stderr, falling back to stdout.
    #[must_use]
    pub fn reason(&self) -> String {
        let last = |s: &str| {
            s.lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
        };
        last(&self.stderr)
            .or_else(|| last(&self.stdout))
            .unwrap_or_else(|| format!("exit code {:?}", self.code))
    }
}

/// Runs external commands. Every call to `apt`, `git`,
/// package managers, `nginx`, `certbot` and `systemctl` goes
/// through this seam.
pub trait CommandRunner {
    /// Run a command to completion. A non-zero exit is returned
    /// as output, not as an error; errors mean the command could
    /// not be started or did not finish in time.
    fn run(&self, spec: &CommandSpec) -> DeployResult<CommandOutput>;
}

/// Run a command and fail on a non-zero exit code. Returns the
/// trimmed stdout.
pub fn run_checked(runner: &dyn CommandRunner, spec: &CommandSpec) -> DeployResult<String> {
    let output = runner.run(spec)?;

    if output.success() {
        Ok(output.stdout.trim().to_string())
    } else {
        tracing::debug!(stderr = %output.stderr.trim(), "{} failed", spec.program);
        Err(DeployError::CommandFailed {
            command: spec.display(),
            code: output.code,
        })
    }
}

/// Runs commands as real child processes on this host.
///
/// Each call blocks on a private current-thread tokio runtime. A
/// command that outlives its timeout is killed, including one
/// whose own process exited while a background child still holds
/// its output pipes.
#[derive(Debug)]
pub struct SystemRunner {
    runtime: Runtime,
}

impl SystemRunner {
    pub fn new() -> DeployResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { runtime })
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> DeployResult<CommandOutput> {
        tracing::debug!(command = %spec.display(), "running");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        self.runtime.block_on(wait_with_deadline(&mut command, spec))
    }
}

async fn wait_with_deadline(
    command: &mut Command,
    spec: &CommandSpec,
) -> DeployResult<CommandOutput> {
    let child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DeployError::CommandNotFound(spec.program.clone())
        } else {
            DeployError::Io(e)
        }
    })?;

    // On expiry the future, and the child with it, is dropped;
    // kill_on_drop sends SIGKILL.
    let Ok(output) = tokio::time::timeout(spec.timeout, child.wait_with_output()).await else {
        tracing::error!(
            command = %spec.display(),
            timeout = ?spec.timeout,
            "command timed out; killed"
        );
        return Err(DeployError::CommandTimeout {
            command: spec.display(),
            secs: spec.timeout.as_secs(),
        });
    };
    let output = output?;

    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

type Handler = Box<dyn Fn(&CommandSpec) -> CommandOutput>;

/// Records every invocation instead of touching the host.
///
/// Commands succeed with empty output unless a handler was
/// registered for a prefix of their command line. Handlers may
/// also create files to stand in for the real tool (a fake
/// `git clone` writing a source tree, for example).
///
/// ```
/// use estaleiro::cmd::{CommandOutput, CommandRunner, CommandSpec, RecordingRunner};
///
/// let runner = RecordingRunner::new().fail("systemctl reload");
///
/// let out = runner
///     .run(&CommandSpec::new("systemctl").args(["reload", "nginx"]))
///     .unwrap();
///
/// assert!(!out.success());
/// assert_eq!(runner.commands(), vec!["systemctl reload nginx"]);
/// ```
#[derive(Default)]
pub struct RecordingRunner {
    calls: RefCell<Vec<CommandSpec>>,
    handlers: Vec<(String, Handler)>,
}

impl RecordingRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands whose line starts with `prefix` using
    /// `handler`. The first registered match wins.
    #[must_use]
    pub fn on(
        mut self,
        prefix: &str,
        handler: impl Fn(&CommandSpec) -> CommandOutput + 'static,
    ) -> Self {
        self.handlers.push((prefix.to_string(), Box::new(handler)));
        self
    }

    /// Make commands starting with `prefix` exit with code 1.
    #[must_use]
    pub fn fail(self, prefix: &str) -> Self {
        self.on(prefix, |_| CommandOutput::failed(1, "simulated failure"))
    }

    #[must_use]
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.borrow().clone()
    }

    /// Recorded command lines, in invocation order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.calls.borrow().iter().map(CommandSpec::display).collect()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> DeployResult<CommandOutput> {
        self.calls.borrow_mut().push(spec.clone());

        let line = spec.display();
        let output = self
            .handlers
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map_or_else(|| CommandOutput::ok(""), |(_, handler)| handler(spec));
        Ok(output)
    }
}

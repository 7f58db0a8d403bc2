use std::{
    ffi::{OsStr, OsString},
    io::{self, Read},
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::{ChildStderr, ChildStdout, Command as StdCommand, Output, Stdio},
    thread,
    time::{Duration, Instant},
};

use log::trace;
use strum_macros::IntoStaticStr;

/// A failure while resolving or running an external binary.
///
/// `ExecutionFailed` carries everything a caller needs to report the failure
/// without re-running the command: the rendered command line, exit code or
/// terminating signal, and the captured output streams.
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("Failed to find dependency '{binary}': {source}")]
    NotFound {
        binary: String,
        #[source]
        source: which::Error,
    },

    #[error("Failed to execute dependency '{binary}': {inner}")]
    CouldNotExecute {
        binary: String,
        #[source]
        inner: io::Error,
    },

    #[error("Dependency '{binary}' finished unsuccessfully: {explanation}\nCmdline: {rendered_command}\n{output}")]
    ExecutionFailed {
        binary: String,
        rendered_command: String,
        code: Option<i32>,
        signal: Option<i32>,
        stdout: String,
        stderr: String,
        explanation: String,
        output: String,
    },

    #[error("Dependency '{binary}' timed out after {timeout_secs}s and was killed\nCmdline: {rendered_command}")]
    TimedOut {
        binary: String,
        rendered_command: String,
        timeout_secs: u64,
    },
}

impl DependencyError {
    /// Exit code of the failed process, when it exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            DependencyError::ExecutionFailed { code, .. } => *code,
            _ => None,
        }
    }

    /// Last `max_lines` lines of stderr, for compact diagnostics.
    pub fn stderr_tail(&self, max_lines: usize) -> String {
        match self {
            DependencyError::ExecutionFailed { stderr, .. } => {
                let lines: Vec<&str> = stderr.lines().collect();
                let skip = lines.len().saturating_sub(max_lines);
                lines[skip..].join("\n")
            }
            other => other.to_string(),
        }
    }
}

/// Enum of the runtime and test binaries invoked by this code base. Every
/// subprocess is spawned through here so that resolution and reporting stay
/// uniform.
#[derive(Debug, Clone, Copy, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Dependency {
    Blkdiscard,
    Blockdev,
    Cryptsetup,
    Dmsetup,
    Losetup,
    Lsblk,
    Lvchange,
    Lvremove,
    Lvs,
    Mdadm,
    Pvremove,
    Pvs,
    Sgdisk,
    Shred,
    Swapoff,
    Swapon,
    Udevadm,
    Umount,
    Vgchange,
    Vgremove,
    Vgs,
    Wipefs,
    // Test dependencies
    #[cfg(test)]
    DoesNotExist,
    #[cfg(test)]
    Echo,
    #[cfg(test)]
    False,
    #[cfg(test)]
    Sleep,
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

impl Dependency {
    /// Gets the name of the dependency, e.g. Dependency::Mdadm => "mdadm".
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Checks if the dependency is present on the system.
    pub fn exists(&self) -> bool {
        which::which(self.name()).is_ok()
    }

    /// Wall-clock ceiling applied by default. Discovery probes get a short
    /// one; mutating commands (and anything long-running like shred) run
    /// unbounded.
    fn default_timeout(&self) -> Option<Duration> {
        match self {
            Self::Losetup | Self::Lsblk | Self::Lvs | Self::Pvs | Self::Swapon | Self::Vgs => {
                Some(Duration::from_secs(30))
            }
            _ => None,
        }
    }

    /// Converts the dependency to a new Command instance.
    /// (Note this does not create a std::process::Command instance.)
    pub fn cmd(&self) -> Command {
        let mut command = Command::external(self.name());
        command.timeout = self.default_timeout();
        command
    }
}

pub struct Command {
    binary: OsString,
    args: Vec<OsString>,
    timeout: Option<Duration>,
}

impl Command {
    /// Creates a command for a binary that is not part of the fixed
    /// [`Dependency`] set, such as the configured formatter or a post-apply
    /// command. No timeout applies unless one is set explicitly.
    pub fn external(binary: impl AsRef<OsStr>) -> Self {
        Command {
            binary: binary.as_ref().to_os_string(),
            args: vec![],
            timeout: None,
        }
    }

    /// Overrides the wall-clock ceiling for this invocation.
    pub fn timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.timeout = timeout;
        self
    }

    fn binary_name(&self) -> String {
        self.binary.to_string_lossy().into_owned()
    }

    fn resolve(&self) -> Result<PathBuf, Box<DependencyError>> {
        which::which(&self.binary).map_err(|source| {
            Box::new(DependencyError::NotFound {
                binary: self.binary_name(),
                source,
            })
        })
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn with_arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg.as_ref());
        }
        self
    }

    pub fn run_and_check(&self) -> Result<(), Box<DependencyError>> {
        self.output()?.check()
    }

    pub fn output_and_check(&self) -> Result<String, Box<DependencyError>> {
        self.output()?.check_output()
    }

    pub fn render_command(&self) -> String {
        if self.args.is_empty() {
            self.binary_name()
        } else {
            format!(
                "{} {}",
                self.binary_name(),
                self.args
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .map(|arg| if arg.contains(' ') {
                        format!("'{arg}'")
                    } else {
                        arg.into()
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        }
    }

    pub fn output(&self) -> Result<CommandOutput, Box<DependencyError>> {
        let mut cmd = StdCommand::new(self.resolve()?);
        cmd.args(&self.args);
        let rendered_command = self.render_command();
        trace!("Executing '{rendered_command}'");

        let output = match self.timeout {
            None => cmd.output().map_err(|inner| {
                Box::new(DependencyError::CouldNotExecute {
                    binary: self.binary_name(),
                    inner,
                })
            })?,
            Some(limit) => self.output_with_deadline(cmd, limit)?,
        };

        let output = CommandOutput {
            rendered_command: rendered_command.clone(),
            binary: self.binary_name(),
            inner: output,
        };
        trace!(
            "Executed '{rendered_command}': {}. Report:\n{}",
            output.explain_exit(),
            output.output_report(),
        );
        Ok(output)
    }

    /// Runs the command with a wall-clock ceiling. The child is polled while
    /// reader threads drain its pipes (so a chatty child never blocks on a
    /// full pipe) and killed once the deadline passes.
    fn output_with_deadline(
        &self,
        mut cmd: StdCommand,
        limit: Duration,
    ) -> Result<Output, Box<DependencyError>> {
        let could_not_execute = |inner| {
            Box::new(DependencyError::CouldNotExecute {
                binary: self.binary_name(),
                inner,
            })
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(could_not_execute)?;

        fn drain<R: Read + Send + 'static>(stream: Option<R>) -> thread::JoinHandle<Vec<u8>> {
            thread::spawn(move || {
                let mut buf = Vec::new();
                if let Some(mut stream) = stream {
                    let _ = stream.read_to_end(&mut buf);
                }
                buf
            })
        }
        let stdout: Option<ChildStdout> = child.stdout.take();
        let stderr: Option<ChildStderr> = child.stderr.take();
        let stdout_thread = drain(stdout);
        let stderr_thread = drain(stderr);

        let deadline = Instant::now() + limit;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Box::new(DependencyError::TimedOut {
                        binary: self.binary_name(),
                        rendered_command: self.render_command(),
                        timeout_secs: limit.as_secs(),
                    }));
                }
                Ok(None) => thread::sleep(Duration::from_millis(20)),
                Err(inner) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(could_not_execute(inner));
                }
            }
        };

        Ok(Output {
            status,
            stdout: stdout_thread.join().unwrap_or_default(),
            stderr: stderr_thread.join().unwrap_or_default(),
        })
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    rendered_command: String,
    binary: String,
    inner: Output,
}

impl CommandOutput {
    /// Checks if the process exited successfully.
    pub fn success(&self) -> bool {
        self.inner.status.success()
    }

    /// Gets the exit code of the process, if it exited normally.
    pub fn code(&self) -> Option<i32> {
        self.inner.status.code()
    }

    /// Gets the signal that terminated the process, if it was terminated by a
    /// signal.
    fn signal(&self) -> Option<i32> {
        self.inner.status.signal()
    }

    /// Gets stderr.
    pub fn error_output(&self) -> String {
        String::from_utf8_lossy(&self.inner.stderr).into()
    }

    /// Gets stdout.
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.inner.stdout).into()
    }

    /// Gets all available output, useful for reporting or debugging.
    pub fn output_report(&self) -> String {
        let stdout = self.output();
        let stderr = self.error_output();

        let mut res = String::with_capacity(stdout.len() + stderr.len() + 20);

        if !stdout.is_empty() {
            res += &format!("stdout:\n{stdout}\n");
        }

        if !stderr.is_empty() {
            if !res.is_empty() {
                res += "\n";
            }
            res += &format!("stderr:\n{stderr}\n");
        }

        res
    }

    /// Checks if the process exited successfully, otherwise produces an error.
    pub fn check(&self) -> Result<(), Box<DependencyError>> {
        if self.success() {
            return Ok(());
        }

        Err(Box::new(DependencyError::ExecutionFailed {
            binary: self.binary.clone(),
            rendered_command: self.rendered_command.clone(),
            code: self.code(),
            signal: self.signal(),
            stdout: self.output(),
            stderr: self.error_output(),
            explanation: self.explain_exit(),
            output: match self.output_report() {
                s if !s.is_empty() => s,
                _ => "(no output collected)".into(),
            },
        }))
    }

    /// Checks if the process exited successfully and returns the output,
    /// otherwise produces an error with the output.
    pub fn check_output(&self) -> Result<String, Box<DependencyError>> {
        self.check()?;
        Ok(self.output())
    }

    /// Produces a string explaining the exit status of the process.
    fn explain_exit(&self) -> String {
        if let Some(code) = self.code() {
            format!("exited with status: {code}")
        } else if let Some(signal) = self.signal() {
            format!("terminated by signal: {signal}")
        } else {
            "exited with unknown status".into()
        }
    }
}

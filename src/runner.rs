//! Sanctioned external command execution
//!
//! Every external tool the pipeline runs (unlock helper, `cryptsetup`,
//! `tar`, `dmsetup`, `parse-android-dynparts`) goes through [`PipedCommand`]:
//! structured argument vectors only, never a string handed to a shell, with
//! process-group isolation and PID registration for teardown.
//!
//! The result is a typed [`ExitDisposition`] so callers can distinguish a
//! meaningful exit code from death-by-signal; spawn and pipe failures come
//! back as errors, never as a fake success.

use crate::error::{RecoveryError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Process exited with a code.
    Exited(i32),
    /// Process was terminated by a signal.
    Signaled(i32),
}

impl ExitDisposition {
    /// True for a clean zero exit.
    pub fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }

    fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self::Exited(code),
            // On Unix a missing code means signal termination.
            None => Self::Signaled(status.signal().unwrap_or(-1)),
        }
    }
}

/// Captured output of a completed command.
#[derive(Debug)]
pub struct CommandOutput {
    pub disposition: ExitDisposition,
    pub stdout: String,
    pub stderr: String,
}

/// An external command described as an explicit argument vector.
#[derive(Debug, Clone)]
pub struct PipedCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl PipedCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
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

    /// Run the command with `input` written to its stdin over an anonymous
    /// pipe, then wait for it to exit.
    ///
    /// The pipe's write end is closed as soon as the bytes are delivered
    /// (by dropping the stdin handle), so a child that reads to EOF cannot
    /// deadlock against us. Stdout/stderr are discarded; callers that feed
    /// secrets through here do not want them echoed anywhere.
    pub fn run_with_stdin(&self, input: &[u8]) -> Result<ExitDisposition> {
        log::info!("running {} (stdin piped)", self.describe());

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .in_new_process_group()
            .spawn()
            .map_err(|e| {
                RecoveryError::command(format!("failed to spawn {}: {}", self.describe(), e))
            })?;

        let pid = child.id();
        register(pid);

        let write_result = match child.stdin.take() {
            Some(mut stdin) => {
                let r = stdin.write_all(input).and_then(|_| stdin.flush());
                drop(stdin); // close the write end, child sees EOF
                r
            }
            None => Err(std::io::Error::other("child stdin was not captured")),
        };

        let status = child.wait();
        unregister(pid);

        // A write failure fails closed even if the child exited zero.
        if let Err(e) = write_result {
            return Err(RecoveryError::command(format!(
                "failed to write stdin of {}: {}",
                self.describe(),
                e
            )));
        }

        let status = status.map_err(|e| {
            RecoveryError::command(format!("failed waiting for {}: {}", self.describe(), e))
        })?;

        let disposition = ExitDisposition::from_status(status);
        log::info!("{} finished: {:?}", self.describe(), disposition);
        Ok(disposition)
    }

    /// Run the command to completion with stdout/stderr captured.
    pub fn run_capture(&self) -> Result<CommandOutput> {
        log::info!("running {}", self.describe());

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group()
            .spawn()
            .map_err(|e| {
                RecoveryError::command(format!("failed to spawn {}: {}", self.describe(), e))
            })?;

        let pid = child.id();
        register(pid);
        let output = child.wait_with_output();
        unregister(pid);

        let output = output.map_err(|e| {
            RecoveryError::command(format!("failed waiting for {}: {}", self.describe(), e))
        })?;

        let disposition = ExitDisposition::from_status(output.status);
        log::info!("{} finished: {:?}", self.describe(), disposition);

        Ok(CommandOutput {
            disposition,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn describe(&self) -> String {
        format!("{} {}", self.program.display(), self.args.join(" "))
    }
}

fn register(pid: u32) {
    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.register(pid);
    }
}

fn unregister(pid: u32) {
    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.unregister(pid);
    }
}

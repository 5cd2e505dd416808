//! Thin typed wrapper around the git CLI.
//!
//! # Responsibility
//! - Run git with composed argument lists and capture the outcome.
//!
//! # Invariants
//! - Failures never panic or propagate; they come back as
//!   `GitResult { success: false, .. }` with stderr captured.
//! - A configured timeout is reported the same way as any other failure.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Outcome of one git invocation.
#[derive(Debug, Clone, Default)]
pub struct GitResult {
    pub success: bool,
    /// Captured stdout, trailing whitespace trimmed.
    pub output: String,
    /// Captured stderr, trailing whitespace trimmed.
    pub error: String,
}

impl GitResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
        }
    }
}

/// Git CLI adapter with an optional per-call timeout.
#[derive(Debug, Clone, Default)]
pub struct GitAdapter {
    timeout: Option<Duration>,
}

impl GitAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// Runs `git <args>` with `dir` as working directory.
    pub fn run(&self, dir: &Path, args: &[&str]) -> GitResult {
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match self.timeout {
            None => match command.output() {
                Ok(output) => GitResult {
                    success: output.status.success(),
                    output: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
                    error: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
                },
                Err(err) => GitResult::failure(format!("failed to run git: {err}")),
            },
            Some(timeout) => self.run_with_deadline(command, timeout),
        }
    }

    fn run_with_deadline(&self, mut command: Command, timeout: Duration) -> GitResult {
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => return GitResult::failure(format!("failed to run git: {err}")),
        };

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return GitResult::failure(format!(
                            "git timed out after {}ms",
                            timeout.as_millis()
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(err) => {
                    let _ = child.kill();
                    return GitResult::failure(format!("failed to wait for git: {err}"));
                }
            }
        }

        match child.wait_with_output() {
            Ok(output) => GitResult {
                success: output.status.success(),
                output: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
                error: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            },
            Err(err) => GitResult::failure(format!("failed to collect git output: {err}")),
        }
    }
}

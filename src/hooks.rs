//! Post-install notification and formula self-tests.
//!
//! The post-install message is advisory: it goes through a [`Notifier`] and a
//! notifier failure is logged, never returned. The test command runs with
//! `sh -c` in a throwaway working directory with the prefix's `bin` first on
//! `PATH`. A failing test does not undo the install.

use crate::colors;
use crate::error::{KegError, Result, Stage};
use crate::formula::Formula;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Lines of test output kept in a failure report
const OUTPUT_TAIL_LINES: usize = 20;

/// Receives post-install messages
pub trait Notifier: Send + Sync {
    fn notify(&self, formula: &str, message: &str) -> io::Result<()>;
}

/// Prints messages to stdout as `==> message`
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, _formula: &str, message: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", colors::ohai(message))?;
        stdout.flush()
    }
}

/// Discards messages
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _formula: &str, _message: &str) -> io::Result<()> {
        Ok(())
    }
}

/// Emit the formula's post-install message, if it has one
pub fn run_post_install(formula: &Formula, notifier: &dyn Notifier) {
    let Some(message) = formula.post_install_message() else {
        return;
    };
    if let Err(e) = notifier.notify(formula.name(), message) {
        tracing::warn!(
            formula = formula.name(),
            stage = %Stage::PostInstall,
            error = %e,
            "post-install message could not be delivered"
        );
    }
}

/// Result of a formula's self-test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    /// The formula defines no test command
    NotDefined,
    /// Not run (test skipped by request, or nothing was installed)
    Skipped,
    Failed(String),
}

impl TestOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TestOutcome::Failed(_))
    }
}

/// Where a test runs
#[derive(Debug, Clone)]
pub struct TestEnv {
    /// Prepended to `PATH`
    pub bin_dir: PathBuf,
    pub timeout: Duration,
}

/// Run the formula's test command against the installed artifact
///
/// # Errors
///
/// - [`KegError::TestFailure`] if the command cannot be started or exits non-zero
/// - [`KegError::Timeout`] if it runs longer than `env.timeout` (it is killed)
/// - [`KegError::Cancelled`] if `cancel` fires first (it is killed)
pub async fn run_test(
    formula: &Formula,
    env: &TestEnv,
    cancel: &CancellationToken,
) -> Result<TestOutcome> {
    let Some(command) = formula.test_command() else {
        tracing::debug!(formula = formula.name(), "no test command defined");
        return Ok(TestOutcome::NotDefined);
    };
    let name = formula.name();

    let workdir = scratch_dir(name, &std::env::temp_dir())?;
    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workdir.path())
        .env("PATH", search_path(&env.bin_dir))
        .env("HOME", workdir.path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| KegError::TestFailure {
            formula: name.to_string(),
            detail: format!("failed to start `{}`: {}", command, e),
        })?;

    tracing::debug!(formula = name, command, workdir = %workdir.path().display(), "running test");

    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(KegError::Cancelled { formula: name.to_string(), stage: Stage::Test });
        }
        result = tokio::time::timeout(env.timeout, child.wait_with_output()) => match result {
            Ok(output) => output.map_err(|e| KegError::TestFailure {
                formula: name.to_string(),
                detail: format!("failed to collect output of `{}`: {}", command, e),
            })?,
            Err(_) => {
                return Err(KegError::Timeout {
                    formula: name.to_string(),
                    stage: Stage::Test,
                    after: env.timeout,
                });
            }
        },
    };

    if output.status.success() {
        return Ok(TestOutcome::Passed);
    }

    let mut detail = format!("`{}` exited with {}", command, output.status);
    let tail = output_tail(&output.stderr).or_else(|| output_tail(&output.stdout));
    if let Some(tail) = tail {
        detail.push('\n');
        detail.push_str(&tail);
    }
    Err(KegError::TestFailure {
        formula: name.to_string(),
        detail,
    })
}

/// Empty working directory for one test run, removed when dropped
fn scratch_dir(formula: &str, parent: &Path) -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("keg-test-")
        .tempdir_in(parent)
        .map_err(|e| KegError::TestFailure {
            formula: formula.to_string(),
            detail: format!("failed to create working directory in {}: {}", parent.display(), e),
        })
}

/// `bin_dir` followed by the current `PATH`
fn search_path(bin_dir: &Path) -> OsString {
    let mut dirs = vec![bin_dir.to_path_buf()];
    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }
    std::env::join_paths(dirs).unwrap_or_else(|_| bin_dir.as_os_str().to_os_string())
}

fn output_tail(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return None;
    }
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    Some(lines[start..].join("\n"))
}

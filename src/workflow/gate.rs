//! Validation gates.
//!
//! A gate is an ordered list of named checks (format, lint, typecheck,
//! test, coverage...). Running a gate evaluates the checks in declared
//! order and stops at the first failure. How a check is evaluated is up to
//! the [`CheckRunner`]; [`ShellCheckRunner`] maps check names to shell
//! commands.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{EngineError, EngineResult};
use crate::core::{CheckConfig, Executor};

/// A named check, optionally with the command the workflow document gave it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl Check {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), command: None }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Pass,
    Fail(String),
}

impl CheckOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Something that can evaluate a check.
///
/// Implementations own any I/O and timeout handling; the engine treats
/// each call as an opaque synchronous predicate.
pub trait CheckRunner {
    fn run_check(&mut self, check: &Check) -> CheckOutcome;
}

impl<F> CheckRunner for F
where
    F: FnMut(&Check) -> CheckOutcome,
{
    fn run_check(&mut self, check: &Check) -> CheckOutcome {
        self(check)
    }
}

/// The failing check of a gate run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateFailure {
    pub check: String,
    pub reason: String,
}

/// Result of running a gate.
#[derive(Debug, Clone)]
pub struct GateResult {
    /// Checks that passed, in order
    pub passed: Vec<String>,

    /// First failing check, if any
    pub failure: Option<GateFailure>,

    /// Wall-clock time spent running checks
    pub duration: Duration,
}

impl GateResult {
    pub fn is_pass(&self) -> bool {
        self.failure.is_none()
    }

    /// Turn a failed run into `GateCheckFailed`.
    pub fn into_result(self) -> EngineResult<Self> {
        match self.failure {
            Some(GateFailure { check, reason }) => {
                Err(EngineError::GateCheckFailed { name: check, reason })
            }
            None => Ok(self),
        }
    }
}

/// Last known state of a phase's gate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum GateStatus {
    #[default]
    NotRun,
    Pass,
    Fail { check: String, reason: String },
}

impl GateStatus {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

impl From<&GateResult> for GateStatus {
    fn from(result: &GateResult) -> Self {
        match &result.failure {
            Some(f) => Self::Fail { check: f.check.clone(), reason: f.reason.clone() },
            None => Self::Pass,
        }
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRun => f.write_str("not run"),
            Self::Pass => f.write_str("pass"),
            Self::Fail { check, reason } => write!(f, "fail ({check}: {reason})"),
        }
    }
}

/// An ordered list of checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationGate {
    checks: Vec<Check>,
}

impl ValidationGate {
    pub fn new(checks: Vec<Check>) -> Self {
        Self { checks }
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Check names in declared order.
    pub fn names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name.as_str()).collect()
    }

    /// Run the checks in order, stopping at the first failure.
    pub fn run(&self, runner: &mut dyn CheckRunner) -> GateResult {
        let start = Instant::now();
        let mut passed = Vec::new();

        for check in &self.checks {
            match runner.run_check(check) {
                CheckOutcome::Pass => {
                    tracing::debug!(check = %check.name, "Check passed");
                    passed.push(check.name.clone());
                }
                CheckOutcome::Fail(reason) => {
                    tracing::info!(check = %check.name, reason = %reason, "Check failed");
                    return GateResult {
                        passed,
                        failure: Some(GateFailure { check: check.name.clone(), reason }),
                        duration: start.elapsed(),
                    };
                }
            }
        }

        GateResult { passed, failure: None, duration: start.elapsed() }
    }
}

static PERCENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").unwrap());

/// Runs checks as shell commands.
///
/// The command for a check comes from the workflow document when it gives
/// one inline, otherwise from the `[checks.<name>]` configuration table.
/// Exit code 0 is a pass; anything else fails with the captured stderr.
#[derive(Debug)]
pub struct ShellCheckRunner {
    executor: Executor,
    working_dir: PathBuf,
    checks: HashMap<String, CheckConfig>,
}

impl ShellCheckRunner {
    pub fn new(working_dir: impl Into<PathBuf>, checks: HashMap<String, CheckConfig>) -> Self {
        Self { executor: Executor::new().capture(true), working_dir: working_dir.into(), checks }
    }

    /// Set a per-check timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.executor = self.executor.timeout(timeout);
        self
    }

    /// Use a specific shell instead of the platform default.
    #[must_use]
    pub fn shell(mut self, shell: Option<String>) -> Self {
        self.executor = self.executor.shell(shell);
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn command_for(&self, check: &Check) -> Option<String> {
        check.command.clone().or_else(|| self.checks.get(&check.name).map(|c| c.command.clone()))
    }
}

impl CheckRunner for ShellCheckRunner {
    fn run_check(&mut self, check: &Check) -> CheckOutcome {
        let Some(command) = self.command_for(check) else {
            return CheckOutcome::Fail(format!("no command configured for check '{}'", check.name));
        };

        tracing::info!(check = %check.name, command = %command, "Running check");

        let result = match self.executor.execute_raw(&command, Some(&self.working_dir)) {
            Ok(result) => result,
            Err(e) => return CheckOutcome::Fail(format!("failed to run `{command}`: {e}")),
        };

        if result.timed_out {
            let limit = self.executor.timeout.unwrap_or_default();
            return CheckOutcome::Fail(format!("timeout after {limit:?}"));
        }

        if !result.success() {
            let stderr = result.stderr.as_deref().unwrap_or_default().trim();
            return CheckOutcome::Fail(if stderr.is_empty() {
                match result.code() {
                    Some(code) => format!("exit code {code}"),
                    None => "terminated by signal".to_string(),
                }
            } else {
                stderr.to_string()
            });
        }

        if let Some(min) = self.checks.get(&check.name).and_then(|c| c.min_percent) {
            let stdout = result.stdout.as_deref().unwrap_or_default();
            return check_threshold(stdout, min);
        }

        CheckOutcome::Pass
    }
}

/// Compare the last percentage printed in `output` against `min`.
fn check_threshold(output: &str, min: f64) -> CheckOutcome {
    let found =
        PERCENT.captures_iter(output).last().and_then(|cap| cap[1].parse::<f64>().ok());

    match found {
        Some(value) if value >= min => CheckOutcome::Pass,
        Some(value) => CheckOutcome::Fail(format!("{value:.1}% is below the {min:.1}% threshold")),
        None => CheckOutcome::Fail("no percentage found in output".to_string()),
    }
}

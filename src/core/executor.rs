//! Command execution module.
//!
//! Spawns shell processes for gate checks, capturing output and enforcing
//! an optional wall-clock timeout.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command as ProcessCommand, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How often a running child is polled when a timeout is set.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long output readers may lag behind a killed child.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Result of executing a command.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Exit status of the command
    pub status: ExitStatus,

    /// Standard output (if captured)
    pub stdout: Option<String>,

    /// Standard error (if captured)
    pub stderr: Option<String>,

    /// Time taken to execute
    pub duration: Duration,

    /// Whether the process was killed for exceeding the timeout
    pub timed_out: bool,
}

impl ExecutionResult {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Get the exit code.
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// Command executor.
#[derive(Debug, Default, Clone)]
pub struct Executor {
    /// Whether to capture output (vs pass through to terminal)
    pub capture_output: bool,

    /// Timeout for command execution
    pub timeout: Option<Duration>,

    /// Shell override; the platform shell is used when unset
    pub shell: Option<String>,
}

impl Executor {
    /// Create a new executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to capture output.
    #[must_use]
    pub fn capture(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Set execution timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the shell used to interpret commands.
    #[must_use]
    pub fn shell(mut self, shell: Option<String>) -> Self {
        self.shell = shell;
        self
    }

    /// Execute a raw command string through the shell.
    pub fn execute_raw(
        &self,
        cmd_str: &str,
        working_dir: Option<&Path>,
    ) -> anyhow::Result<ExecutionResult> {
        let start = Instant::now();

        let (shell, shell_arg) = match &self.shell {
            Some(shell) => (shell.as_str(), default_shell().1),
            None => default_shell(),
        };

        let mut cmd = ProcessCommand::new(shell);
        cmd.arg(shell_arg);
        cmd.arg(cmd_str);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        if self.capture_output {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
        }
        cmd.stdin(Stdio::null());

        // Own process group, so a timeout reaches everything the shell started.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn()?;

        // Drain pipes on their own threads so a chatty child cannot block
        // on a full pipe while we wait on it.
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let (status, timed_out) = self.wait(&mut child)?;

        // After a kill, a process that left the group may still hold the
        // pipes open. Give up on its output rather than wait for it.
        let grace = if timed_out { Some(READER_GRACE) } else { None };
        let stdout = stdout.map(|h| join_reader(h, grace));
        let stderr = stderr.map(|h| join_reader(h, grace));

        Ok(ExecutionResult { status, stdout, stderr, duration: start.elapsed(), timed_out })
    }

    fn wait(&self, child: &mut Child) -> std::io::Result<(ExitStatus, bool)> {
        let Some(timeout) = self.timeout else {
            return Ok((child.wait()?, false));
        };

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok((status, false));
            }
            if Instant::now() >= deadline {
                tracing::warn!(pid = child.id(), ?timeout, "Command timed out, killing");
                kill_process_group(child.id());
                // The child may exit between try_wait and kill.
                let _ = child.kill();
                return Ok((child.wait()?, true));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: JoinHandle<String>, grace: Option<Duration>) -> String {
    if let Some(grace) = grace {
        let deadline = Instant::now() + grace;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::debug!("Output pipe still open after kill, dropping reader");
                return String::new();
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
    handle.join().unwrap_or_default()
}

/// Kill the process group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let group = format!("-{pid}");
    let _ = ProcessCommand::new("kill").args(["-KILL", "--", &group]).output();
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Get the default shell and its "run this string" argument.
fn default_shell() -> (&'static str, &'static str) {
    if cfg!(windows) {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_capture_output() {
        let executor = Executor::new().capture(true);
        let result = executor.execute_raw("echo hello; echo oops >&2", None).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.as_deref().map(str::trim), Some("hello"));
        assert_eq!(result.stderr.as_deref().map(str::trim), Some("oops"));
        assert!(!result.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code() {
        let executor = Executor::new().capture(true);
        let result = executor.execute_raw("exit 7", None).unwrap();
        assert!(!result.success());
        assert_eq!(result.code(), Some(7));
    }

    #[cfg(unix)]
    #[test]
    fn test_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let executor = Executor::new().capture(true);
        let result = executor.execute_raw("test -f marker.txt", Some(dir.path())).unwrap();
        assert!(result.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_process() {
        let executor = Executor::new().capture(true).timeout(Duration::from_millis(100));
        let result = executor.execute_raw("sleep 5", None).unwrap();
        assert!(result.timed_out);
        assert!(!result.success());
        assert!(result.duration < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_whole_process_group() {
        // The shell forks `sleep` instead of exec'ing it, so killing the
        // shell alone would leave the sleep holding stdout open.
        let executor = Executor::new().capture(true).timeout(Duration::from_millis(200));
        let result = executor.execute_raw("sleep 3; true", None).unwrap();
        assert!(result.timed_out);
        assert!(!result.success());
        assert!(result.duration < Duration::from_secs(2), "took {:?}", result.duration);
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_keeps_output_written_before_kill() {
        let executor = Executor::new().capture(true).timeout(Duration::from_millis(300));
        let result = executor.execute_raw("echo started; sleep 3; echo finished", None).unwrap();
        assert!(result.timed_out);
        let stdout = result.stdout.unwrap_or_default();
        assert!(stdout.contains("started"));
        assert!(!stdout.contains("finished"));
    }
}

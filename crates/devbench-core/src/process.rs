//! Deadline-bounded subprocess execution.
//!
//! Every external tool the harness drives (agent CLIs, test runtimes, package
//! managers, builds) goes through [`run_with_deadline`], which resolves to a
//! single [`ProcessOutput`] or fails with [`ProcessError::Timeout`] after the
//! process tree has been signalled.
//!
//! Children are placed in their own process group so that wrappers like `npx`
//! and `sh -c` cannot leave grandchildren running after a timeout.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Grace period between SIGTERM and SIGKILL when a deadline expires.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// A command line plus its environment and working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// Runs `script` through `sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Human-readable command line for logs and error messages.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.envs(&self.env);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        #[cfg(unix)]
        command.process_group(0);
        command.kill_on_drop(true);
        command
    }
}

/// Captured result of a process that exited on its own.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Errors from spawning or supervising a subprocess.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} timed out after {}s", .after.as_secs_f64())]
    Timeout { command: String, after: Duration },

    #[error("I/O error while running {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Runs a command to completion, capturing both output streams.
///
/// stdin is closed. If `deadline` elapses first the process group receives
/// SIGTERM, then SIGKILL after [`DEFAULT_KILL_GRACE`], and the call fails with
/// [`ProcessError::Timeout`].
pub async fn run_with_deadline(
    spec: &CommandSpec,
    deadline: Duration,
) -> Result<ProcessOutput, ProcessError> {
    run_with_deadline_and_grace(spec, deadline, DEFAULT_KILL_GRACE).await
}

/// [`run_with_deadline`] with an explicit termination grace period.
pub async fn run_with_deadline_and_grace(
    spec: &CommandSpec,
    deadline: Duration,
    grace: Duration,
) -> Result<ProcessOutput, ProcessError> {
    let command_line = spec.display();
    debug!(
        command = %command_line,
        cwd = ?spec.cwd,
        timeout_secs = deadline.as_secs(),
        "Spawning process"
    );

    let mut child = spec
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
    let pgid = child.id();

    // Both pipes are drained concurrently; a full stderr buffer would
    // otherwise stall a child still writing to stdout.
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let completed = tokio::time::timeout(deadline, async {
        let (stdout, stderr, status) = tokio::try_join!(
            read_all(stdout_handle),
            read_all(stderr_handle),
            child.wait()
        )?;
        Ok::<_, std::io::Error>((stdout, stderr, status))
    })
    .await;

    match completed {
        Ok(Ok((stdout, stderr, status))) => {
            debug!(command = %command_line, exit_code = ?status.code(), "Process exited");
            Ok(ProcessOutput {
                stdout,
                stderr,
                exit_code: status.code(),
            })
        }
        Ok(Err(source)) => {
            terminate_group(&mut child, pgid, grace).await;
            Err(ProcessError::Io {
                command: command_line,
                source,
            })
        }
        Err(_) => {
            warn!(
                command = %command_line,
                timeout_secs = deadline.as_secs(),
                "Deadline reached, terminating process"
            );
            terminate_group(&mut child, pgid, grace).await;
            Err(ProcessError::Timeout {
                command: command_line,
                after: deadline,
            })
        }
    }
}

/// Spawns a long-running process whose output goes to `log_file`.
///
/// The caller owns the returned child and must pass it to [`terminate`].
pub fn spawn_background(spec: &CommandSpec, log_file: &Path) -> Result<Child, ProcessError> {
    let io_err = |source| ProcessError::Io {
        command: spec.display(),
        source,
    };
    let log = std::fs::File::create(log_file).map_err(io_err)?;
    let log_err = log.try_clone().map_err(io_err)?;

    debug!(command = %spec.display(), cwd = ?spec.cwd, "Starting background process");
    spec.to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })
}

/// Sends SIGTERM to the child's process group, waits up to `grace`, then kills.
///
/// Never fails: a process that already exited is not an error here.
pub async fn terminate(child: &mut Child, grace: Duration) {
    let pgid = child.id();
    terminate_group(child, pgid, grace).await;
}

/// [`terminate`] for a child whose pid was recorded at spawn time.
///
/// tokio forgets the pid once the child has been reaped, but the group
/// outlives its leader: a wrapper like `npx` can exit while a grandchild
/// still holds the pipes or the port.
pub async fn terminate_group(child: &mut Child, pgid: Option<u32>, grace: Duration) {
    signal_group(pgid, GroupSignal::Term);
    #[cfg(not(unix))]
    let _ = child.start_kill();
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        warn!(pid = ?pgid, "Process ignored SIGTERM, sending SIGKILL");
        signal_group(pgid, GroupSignal::Kill);
        if let Err(e) = child.kill().await {
            debug!(error = %e, "Kill after grace period failed");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(pgid: Option<u32>, which: GroupSignal) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Some(pid) = pgid {
        let signal = match which {
            GroupSignal::Term => Signal::SIGTERM,
            GroupSignal::Kill => Signal::SIGKILL,
        };
        let pgid = Pid::from_raw(pid as i32);
        debug!(%pgid, ?signal, "Signalling process group");
        let _ = killpg(pgid, signal);
    }
}

// Without process groups the direct child is killed by `terminate_group`.
#[cfg(not(unix))]
fn signal_group(_pgid: Option<u32>, _which: GroupSignal) {}

async fn read_all<R: AsyncRead + Unpin>(handle: Option<R>) -> std::io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut reader) = handle {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Truncates to at most `max_chars` characters on a char boundary.
pub fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_captures_stdout_stderr_and_exit_code() {
        let spec = CommandSpec::shell("echo out; echo err >&2; exit 3");
        let output = run_with_deadline(&spec, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_env_and_cwd_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::shell("echo \"$GREETING\"; pwd")
            .env("GREETING", "hello")
            .current_dir(dir.path());
        let output = run_with_deadline(&spec, Duration::from_secs(10))
            .await
            .unwrap();
        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("hello"));
        let pwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(
            pwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn test_deadline_kills_process_and_reports_timeout() {
        let spec = CommandSpec::new("sleep").arg("30");
        let started = Instant::now();
        let err = run_with_deadline_and_grace(
            &spec,
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("sleep 30"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_deadline_reaches_grandchildren() {
        // The shell's child holds the pipes open; only a group kill ends it.
        let spec = CommandSpec::shell("sleep 30 & wait");
        let started = Instant::now();
        let err = run_with_deadline_and_grace(
            &spec,
            Duration::from_millis(200),
            Duration::from_millis(500),
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    /// Running means present in `/proc` and not a zombie.
    #[cfg(target_os = "linux")]
    fn process_running(pid: &str) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat")).is_ok_and(|stat| {
            stat.rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                != Some("Z")
        })
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_deadline_reaches_grandchildren_after_leader_exits() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("orphan.pid");
        // The shell exits at once; its background child keeps stdout open.
        let spec = CommandSpec::shell(format!(
            "sleep 30 & echo $! > '{}'; exit 0",
            pid_file.display()
        ));
        let err = run_with_deadline_and_grace(
            &spec,
            Duration::from_millis(300),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        let give_up = Instant::now() + Duration::from_secs(3);
        while process_running(&pid) {
            assert!(Instant::now() < give_up, "sleep {pid} outlived the timeout");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let spec = CommandSpec::new("devbench-no-such-binary-xyz");
        let err = run_with_deadline(&spec, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_terminate_background_process() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("server.log");
        let mut child = spawn_background(&CommandSpec::shell("echo up; sleep 30"), &log).unwrap();
        terminate(&mut child, Duration::from_millis(500)).await;
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 2), "he");
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("", 0), "");
    }

    #[test]
    fn test_display() {
        assert_eq!(CommandSpec::new("npm").display(), "npm");
        assert_eq!(
            CommandSpec::new("npx").args(["jest", "--json"]).display(),
            "npx jest --json"
        );
    }
}

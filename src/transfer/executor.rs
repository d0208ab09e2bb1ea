use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use super::clock::CancelToken;
use super::request::CommandSpec;

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitState {
    Exited(i32),
    /// Terminated by a signal (no exit code).
    Signaled,
    /// Killed because the cancel token fired.
    Cancelled,
    TimedOut(Duration),
    SpawnFailed,
    WaitFailed,
}

/// Captured output of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitState,
}

impl ProcessResult {
    /// Start failure: no output, the error text in `stderr`.
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self { stdout: String::new(), stderr: message.into(), status: ExitState::SpawnFailed }
    }

    pub fn success(&self) -> bool {
        self.status == ExitState::Exited(0)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ExitState::Exited(c) => Some(c),
            _ => None,
        }
    }

    /// Concatenate a later invocation onto this one; the later exit state wins.
    pub fn chain(self, next: ProcessResult) -> ProcessResult {
        fn join(a: String, b: String) -> String {
            match (a.is_empty(), b.is_empty()) {
                (true, _) => b,
                (_, true) => a,
                _ if a.ends_with('\n') => a + &b,
                _ => a + "\n" + &b,
            }
        }
        ProcessResult {
            stdout: join(self.stdout, next.stdout),
            stderr: join(self.stderr, next.stderr),
            status: next.status,
        }
    }

    /// Last non-empty stderr line, handy for one-line error summaries.
    pub fn last_error_line(&self) -> &str {
        self.stderr.lines().rev().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
    }
}

/// Runs a command to completion. Implementations must call `on_stderr` for
/// every stderr line, in order, before it is buffered, and must report start
/// failures through the returned result instead of panicking.
pub trait Executor: Send + Sync {
    fn execute(
        &self,
        cmd: &CommandSpec,
        on_stderr: &(dyn Fn(&str) + Sync),
        cancel: &CancelToken,
    ) -> ProcessResult;
}

/// Executor backed by `std::process`.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    poll_interval: Duration,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self { poll_interval: Duration::from_millis(50) }
    }
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    fn wait_child(
        &self,
        child: &mut Child,
        started: Instant,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> ExitState {
        loop {
            if cancel.is_cancelled() {
                tracing::debug!("[exec] cancel requested, killing pid={}", child.id());
                kill_process_tree(child);
                return ExitState::Cancelled;
            }
            if let Some(limit) = timeout
                && started.elapsed() >= limit
            {
                tracing::debug!("[exec] timeout {:?} reached, killing pid={}", limit, child.id());
                kill_process_tree(child);
                return ExitState::TimedOut(limit);
            }
            match child.try_wait() {
                Ok(Some(status)) => {
                    return match status.code() {
                        Some(code) => ExitState::Exited(code),
                        None => ExitState::Signaled,
                    };
                }
                Ok(None) => std::thread::sleep(self.poll_interval),
                Err(e) => {
                    tracing::debug!("[exec] try_wait failed: {}", e);
                    kill_process_tree(child);
                    return ExitState::WaitFailed;
                }
            }
        }
    }
}

impl Executor for ProcessExecutor {
    fn execute(
        &self,
        cmd: &CommandSpec,
        on_stderr: &(dyn Fn(&str) + Sync),
        cancel: &CancelToken,
    ) -> ProcessResult {
        tracing::debug!("[exec] spawning: {}", cmd.display());
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = &cmd.working_dir {
            command.current_dir(dir);
        }
        // Own process group so cancellation reaches anything the tool forks.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!("[exec] spawn failed for {}: {}", cmd.program.display(), e);
                return ProcessResult::spawn_failed(format!("{}: {}", cmd.program.display(), e));
            }
        };
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        std::thread::scope(|scope| {
            let out_handle = scope.spawn(move || {
                let mut buf = String::new();
                if let Some(r) = stdout {
                    for_each_line(r, |line| {
                        buf.push_str(line);
                        buf.push('\n');
                    });
                }
                buf
            });
            let err_handle = scope.spawn(move || {
                let mut buf = String::new();
                if let Some(r) = stderr {
                    for_each_line(r, |line| {
                        on_stderr(line);
                        buf.push_str(line);
                        buf.push('\n');
                    });
                }
                buf
            });
            let started = Instant::now();
            let mut status = self.wait_child(&mut child, started, cmd.timeout, cancel);
            // 父进程已退出但子进程仍持有管道；keep honouring cancel and timeout
            // until the readers close.
            let pid = child.id();
            while !(out_handle.is_finished() && err_handle.is_finished()) {
                if matches!(status, ExitState::Exited(_) | ExitState::Signaled) {
                    if cancel.is_cancelled() {
                        tracing::debug!("[exec] cancel after exit, killing group of pid={}", pid);
                        kill_group(pid);
                        status = ExitState::Cancelled;
                    } else if let Some(limit) = cmd.timeout
                        && started.elapsed() >= limit
                    {
                        tracing::debug!("[exec] leftover children outlived {:?}, killing", limit);
                        kill_group(pid);
                        status = ExitState::TimedOut(limit);
                    }
                }
                std::thread::sleep(self.poll_interval);
            }
            let stdout = out_handle.join().unwrap_or_default();
            let stderr = err_handle.join().unwrap_or_default();
            tracing::debug!("[exec] finished {:?} ({} stderr bytes)", status, stderr.len());
            ProcessResult { stdout, stderr, status }
        })
    }
}

/// Feed `reader` to `f` one line at a time. Lines end at `\n` or `\r` (the
/// tool redraws status lines with carriage returns); empty lines are skipped
/// and invalid UTF-8 is replaced.
pub fn for_each_line<R: Read, F: FnMut(&str)>(mut reader: R, mut f: F) {
    let mut chunk = [0u8; 8 * 1024];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        for &b in &chunk[..n] {
            if b == b'\n' || b == b'\r' {
                if !pending.is_empty() {
                    f(&String::from_utf8_lossy(&pending));
                    pending.clear();
                }
            } else {
                pending.push(b);
            }
        }
    }
    if !pending.is_empty() {
        f(&String::from_utf8_lossy(&pending));
    }
}

/// Kill `child` and everything it spawned, then reap it.
pub fn kill_process_tree(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

/// Kill the process group led by `pid`. The group outlives its leader as long
/// as any member is alive, so this also works after the leader was reaped.
pub fn kill_group(pid: u32) {
    #[cfg(unix)]
    {
        let pgid = format!("-{}", pid);
        let _ = Command::new("kill")
            .args(["-KILL", "--", &pgid])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    #[cfg(windows)]
    {
        let pid = pid.to_string();
        let _ = Command::new("taskkill")
            .args(["/PID", &pid, "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

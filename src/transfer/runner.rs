use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::TransferError;
use crate::notify::Notifier;
use crate::remote::RemoteList;
use crate::util::PathSanitizer;

use super::clock::CancelToken;
use super::executor::{Executor, ExitState, ProcessResult};
use super::failover::MirrorFailoverPolicy;
use super::progress::{self, ProgressSample};
use super::request::LogicalRequest;

/// Per-transfer inputs supplied by the caller.
pub struct RunContext<'a> {
    /// Display name used in warnings and logs.
    pub label: &'a str,
    pub cancel: &'a CancelToken,
    /// Receives every parsed sample, in line order, on the stderr reader
    /// thread. Must not block.
    pub on_progress: &'a (dyn Fn(ProgressSample) + Sync),
}

/// Runs logical requests against the mirror pool.
pub struct TransferRunner {
    executor: Arc<dyn Executor>,
    program: PathBuf,
    remotes: RemoteList,
    notifier: Arc<dyn Notifier>,
    sanitizer: PathSanitizer,
    short_timeout: Option<Duration>,
}

impl TransferRunner {
    pub fn new(
        executor: Arc<dyn Executor>,
        program: impl Into<PathBuf>,
        remotes: RemoteList,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            executor,
            program: program.into(),
            remotes,
            notifier,
            sanitizer: PathSanitizer::default(),
            short_timeout: None,
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: PathSanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Time limit applied to one-shot `run` calls.
    pub fn with_short_timeout(mut self, timeout: Duration) -> Self {
        self.short_timeout = Some(timeout);
        self
    }

    pub fn remotes(&self) -> &RemoteList {
        &self.remotes
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    pub fn sanitizer(&self) -> &PathSanitizer {
        &self.sanitizer
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// One-shot invocation without failover, retry or progress. The short
    /// timeout applies to query verbs only.
    pub fn run(&self, request: &LogicalRequest) -> ProcessResult {
        let mut cmd = request.to_command(&self.program);
        if request.operation.is_short_lived() {
            cmd.timeout = self.short_timeout;
        }
        self.executor.execute(&cmd, &|_line: &str| {}, &CancelToken::new())
    }

    /// Query the tool for its configured remotes. Used once at startup, before
    /// a runner exists.
    pub fn discover_remotes(
        executor: &dyn Executor,
        program: &Path,
        filter: Option<&str>,
        timeout: Duration,
    ) -> Result<RemoteList, TransferError> {
        let mut cmd = LogicalRequest::list_remotes().to_command(program);
        cmd.timeout = Some(timeout);
        let result = executor.execute(&cmd, &|_line: &str| {}, &CancelToken::new());
        if !result.success() {
            return Err(failure_from(&result));
        }
        let list = RemoteList::from_listing(&result.stdout, filter);
        tracing::debug!("[runner] discovered {} remotes", list.len());
        Ok(list)
    }

    /// Run `request` to completion or terminal failure. An unbound request
    /// starts on the first remote.
    pub fn transfer(
        &self,
        request: &LogicalRequest,
        ctx: &RunContext<'_>,
    ) -> Result<ProcessResult, TransferError> {
        let request = match (request.remote(), self.remotes.first()) {
            (None, Some(first)) => request.rebind(first),
            _ => request.clone(),
        };
        let on_line = |line: &str| {
            if let Some(sample) = progress::parse(line) {
                (ctx.on_progress)(sample);
            }
        };
        let policy = MirrorFailoverPolicy::new(&self.remotes, self.notifier.as_ref(), &self.sanitizer);
        let result = policy.execute(&request, ctx.label, |req| {
            if ctx.cancel.is_cancelled() {
                return ProcessResult {
                    stdout: String::new(),
                    stderr: String::new(),
                    status: ExitState::Cancelled,
                };
            }
            let cmd = req.to_command(&self.program);
            tracing::debug!("[runner] {}: {}", ctx.label, self.sanitizer.sanitize(&cmd.display()));
            self.executor.execute(&cmd, &on_line, ctx.cancel)
        })?;
        if result.success() {
            Ok(result)
        } else {
            Err(failure_from(&result).sanitized(&self.sanitizer))
        }
    }
}

/// Map an unsuccessful result onto the error taxonomy.
pub fn failure_from(result: &ProcessResult) -> TransferError {
    let detail = result.last_error_line().to_string();
    match &result.status {
        ExitState::SpawnFailed => TransferError::SpawnFailed(result.stderr.trim().to_string()),
        ExitState::Cancelled => TransferError::Cancelled,
        ExitState::TimedOut(d) => TransferError::TimedOut(format!("no exit after {:?}", d)),
        ExitState::Exited(code) => TransferError::ProcessFailed { code: Some(*code), detail },
        ExitState::Signaled | ExitState::WaitFailed => {
            TransferError::ProcessFailed { code: None, detail }
        }
    }
}

impl TransferError {
    fn sanitized(self, sanitizer: &PathSanitizer) -> Self {
        match self {
            TransferError::SpawnFailed(m) => TransferError::SpawnFailed(sanitizer.sanitize(&m)),
            TransferError::ProcessFailed { code, detail } => {
                TransferError::ProcessFailed { code, detail: sanitizer.sanitize(&detail) }
            }
            other => other,
        }
    }
}

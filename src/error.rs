/// Broad failure categories a job can end in. Used for user-facing messages
/// and for deciding between failover, backoff and immediate termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCategory {
    /// A mirror rejected or failed the request; resolved by failover.
    TransientMirror,
    /// Local disk is full.
    Capacity,
    /// Another process holds a resource the tool needs (e.g. its rc port).
    ResourceContention,
    /// The tool could not be started, crashed, or exited non-zero.
    ProcessFailure,
    /// User asked to stop the job.
    Cancellation,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureCategory::TransientMirror => "mirror error",
            FailureCategory::Capacity => "insufficient disk space",
            FailureCategory::ResourceContention => "resource in use",
            FailureCategory::ProcessFailure => "process failure",
            FailureCategory::Cancellation => "cancelled",
        };
        f.write_str(s)
    }
}

/// Errors produced while running a logical transfer. Carried as values so the
/// queue can decide programmatically whether to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The disk ran out of space during the transfer.
    InsufficientSpace(String),
    /// The tool reported that its socket address is already in use.
    SocketConflict(String),
    /// Every mirror in the list reported a transient error.
    MirrorsExhausted { tried: Vec<String>, last_error: String },
    /// The tool binary could not be started.
    SpawnFailed(String),
    /// The tool exited unsuccessfully without a recognised error marker.
    ProcessFailed { code: Option<i32>, detail: String },
    /// A short-lived invocation exceeded its time limit.
    TimedOut(String),
    /// The job was cancelled or skipped by the user.
    Cancelled,
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use TransferError::*;
        match self {
            InsufficientSpace(msg) => write!(f, "not enough disk space: {}", msg),
            SocketConflict(msg) => {
                write!(f, "another instance of the transfer tool is running: {}", msg)
            }
            MirrorsExhausted { tried, last_error } => {
                write!(f, "all mirrors exhausted (tried {})", tried.join(", "))?;
                if !last_error.is_empty() {
                    write!(f, ": {}", last_error)?;
                }
                Ok(())
            }
            SpawnFailed(msg) => write!(f, "failed to start transfer tool: {}", msg),
            ProcessFailed { code: Some(c), detail } => {
                write!(f, "transfer tool exited with code {}: {}", c, detail)
            }
            ProcessFailed { code: None, detail } => {
                write!(f, "transfer tool terminated abnormally: {}", detail)
            }
            TimedOut(what) => write!(f, "timed out: {}", what),
            Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for TransferError {}

impl TransferError {
    pub fn category(&self) -> FailureCategory {
        use TransferError::*;
        match self {
            InsufficientSpace(_) => FailureCategory::Capacity,
            SocketConflict(_) => FailureCategory::ResourceContention,
            MirrorsExhausted { .. } => FailureCategory::TransientMirror,
            SpawnFailed(_) | ProcessFailed { .. } | TimedOut(_) => {
                FailureCategory::ProcessFailure
            }
            Cancelled => FailureCategory::Cancellation,
        }
    }

    /// Whether the queue should schedule a backoff retry for this error.
    /// Local conditions (disk, port) and user cancellation are never retried;
    /// process failures and exhausted mirrors are.
    pub fn is_retriable(&self) -> bool {
        use TransferError::*;
        match self {
            MirrorsExhausted { .. } | SpawnFailed(_) | ProcessFailed { .. } | TimedOut(_) => true,
            InsufficientSpace(_) | SocketConflict(_) | Cancelled => false,
        }
    }

    /// Errors the failover policy has already reported through the warning
    /// sink. The queue must not report them a second time.
    pub fn is_already_reported(&self) -> bool {
        matches!(self, TransferError::InsufficientSpace(_) | TransferError::SocketConflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_conditions_are_not_retriable() {
        assert!(!TransferError::InsufficientSpace("x".into()).is_retriable());
        assert!(!TransferError::SocketConflict("x".into()).is_retriable());
        assert!(!TransferError::Cancelled.is_retriable());
    }

    #[test]
    fn remote_and_process_failures_are_retriable() {
        let exhausted =
            TransferError::MirrorsExhausted { tried: vec!["a".into()], last_error: String::new() };
        assert!(exhausted.is_retriable());
        assert!(TransferError::SpawnFailed("no such file".into()).is_retriable());
        assert!(
            TransferError::ProcessFailed { code: Some(1), detail: String::new() }.is_retriable()
        );
    }

    #[test]
    fn exhausted_message_names_mirrors() {
        let e = TransferError::MirrorsExhausted {
            tried: vec!["m1".into(), "m2".into()],
            last_error: "400 Bad Request".into(),
        };
        let s = e.to_string();
        assert!(s.contains("all mirrors exhausted"));
        assert!(s.contains("m1, m2"));
        assert!(s.contains("400 Bad Request"));
        assert_eq!(e.category(), FailureCategory::TransientMirror);
    }
}

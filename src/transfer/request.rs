use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::remote::Remote;

/// Verb passed to the transfer tool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Copy,
    Sync,
    Size,
    ListRemotes,
    /// Any other verb the tool understands; passed through as-is.
    Other(String),
}

impl Operation {
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Copy => "copy",
            Operation::Sync => "sync",
            Operation::Size => "size",
            Operation::ListRemotes => "listremotes",
            Operation::Other(s) => s.as_str(),
        }
    }

    /// Query verbs that finish quickly regardless of archive size. Only these
    /// get the one-shot timeout; copies and syncs run as long as they need.
    pub fn is_short_lived(&self) -> bool {
        match self {
            Operation::Size | Operation::ListRemotes => true,
            Operation::Other(v) => {
                matches!(v.as_str(), "lsd" | "ls" | "lsf" | "lsjson" | "about" | "version" | "config")
            }
            Operation::Copy | Operation::Sync => false,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "copy" => Operation::Copy,
            "sync" => Operation::Sync,
            "size" => Operation::Size,
            "listremotes" => Operation::ListRemotes,
            other => Operation::Other(other.to_string()),
        }
    }
}

/// Flags that stay the same no matter which mirror serves the request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransferFlags {
    pub bandwidth_limit: Option<String>,
    /// Number of `-v` flags.
    pub verbosity: u8,
    /// Low-level retries performed by the tool itself.
    pub retries: u32,
    pub inplace: bool,
    /// Interval of the tool's periodic stats block, e.g. `1s`.
    pub stats_interval: Option<String>,
    pub extra: Vec<String>,
}

impl Default for TransferFlags {
    fn default() -> Self {
        Self {
            bandwidth_limit: None,
            verbosity: 1,
            retries: 1,
            inplace: false,
            stats_interval: Some("1s".to_string()),
            extra: Vec::new(),
        }
    }
}

impl TransferFlags {
    fn push_args(&self, args: &mut Vec<String>) {
        if let Some(bw) = &self.bandwidth_limit
            && !bw.is_empty()
        {
            args.push("--bwlimit".to_string());
            args.push(bw.clone());
        }
        if self.verbosity > 0 {
            args.push(format!("-{}", "v".repeat(self.verbosity as usize)));
        }
        args.push("--retries".to_string());
        args.push(self.retries.to_string());
        if self.inplace {
            args.push("--inplace".to_string());
        }
        if let Some(interval) = &self.stats_interval {
            args.push("--stats".to_string());
            args.push(interval.clone());
        }
        args.extend(self.extra.iter().cloned());
    }
}

/// A transfer template. The source path is relative to whichever remote the
/// request is bound to; failover produces a rebound copy and never edits the
/// assembled command line.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogicalRequest {
    pub operation: Operation,
    pub source: Option<String>,
    pub destination: Option<PathBuf>,
    pub flags: TransferFlags,
    remote: Option<Remote>,
}

impl LogicalRequest {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            source: None,
            destination: None,
            flags: TransferFlags::default(),
            remote: None,
        }
    }

    /// `copy <remote>:<source> <destination>`
    pub fn copy(source: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self::new(Operation::Copy).with_source(source).with_destination(destination)
    }

    pub fn list_remotes() -> Self {
        let mut req = Self::new(Operation::ListRemotes);
        req.flags = TransferFlags {
            verbosity: 0,
            retries: 1,
            stats_interval: None,
            ..TransferFlags::default()
        };
        req
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_flags(mut self, flags: TransferFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn bound_to(mut self, remote: Remote) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn remote(&self) -> Option<&Remote> {
        self.remote.as_ref()
    }

    /// Same request, served by `remote`.
    pub fn rebind(&self, remote: &Remote) -> Self {
        let mut next = self.clone();
        next.remote = Some(remote.clone());
        next
    }

    /// `remote:path` when bound, the bare path otherwise.
    pub fn source_spec(&self) -> Option<String> {
        let path = self.source.as_deref()?;
        Some(match &self.remote {
            Some(r) => format!("{}:{}", r.name, path.trim_start_matches('/')),
            None => path.to_string(),
        })
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![self.operation.as_str().to_string()];
        if let Some(src) = self.source_spec() {
            args.push(src);
        }
        if let Some(dst) = &self.destination {
            args.push(dst.to_string_lossy().to_string());
        }
        self.flags.push_args(&mut args);
        args
    }

    /// Assemble the concrete command for `program`.
    pub fn to_command(&self, program: &Path) -> CommandSpec {
        CommandSpec {
            program: program.to_path_buf(),
            args: self.to_args(),
            working_dir: None,
            timeout: None,
        }
    }
}

/// Fully assembled invocation handed to an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Only set for short-lived operations such as listing remotes.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), args: Vec::new(), working_dir: None, timeout: None }
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Argument string as it would be typed, for logs.
    pub fn display(&self) -> String {
        let mut out = self.program.display().to_string();
        for a in &self.args {
            out.push(' ');
            if a.is_empty() || a.contains(char::is_whitespace) {
                out.push('"');
                out.push_str(a);
                out.push('"');
            } else {
                out.push_str(a);
            }
        }
        out
    }
}

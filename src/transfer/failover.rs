use crate::error::{FailureCategory, TransferError};
use crate::notify::Notifier;
use crate::remote::RemoteList;
use crate::util::PathSanitizer;

use super::classify::{ErrorClass, classify};
use super::executor::{ExitState, ProcessResult};
use super::request::LogicalRequest;

/// Walks the remote list forward on mirror errors. Capacity and socket
/// conflicts are reported once and end the transfer; they are local problems
/// another mirror cannot fix.
pub struct MirrorFailoverPolicy<'a> {
    remotes: &'a RemoteList,
    notifier: &'a dyn Notifier,
    sanitizer: &'a PathSanitizer,
}

impl<'a> MirrorFailoverPolicy<'a> {
    pub fn new(
        remotes: &'a RemoteList,
        notifier: &'a dyn Notifier,
        sanitizer: &'a PathSanitizer,
    ) -> Self {
        Self { remotes, notifier, sanitizer }
    }

    /// Run `request` through `invoke`, rebinding it to the next remote after
    /// every transient mirror error. At most one invocation per remote.
    ///
    /// A successful exit is returned as that invocation's own result, even if
    /// the tool logged recovered errors along the way. A failed exit without a
    /// known marker is returned for the caller to judge, chained onto the
    /// output of the mirrors tried before it. Each step is classified on its
    /// own output only.
    pub fn execute<F>(
        &self,
        request: &LogicalRequest,
        label: &str,
        mut invoke: F,
    ) -> Result<ProcessResult, TransferError>
    where
        F: FnMut(&LogicalRequest) -> ProcessResult,
    {
        let mut current = request.clone();
        let mut tried: Vec<String> = Vec::new();
        let mut transcript: Option<ProcessResult> = None;
        loop {
            let result = invoke(&current);
            if let Some(r) = current.remote() {
                tried.push(r.name.clone());
            }
            if result.status == ExitState::Cancelled {
                return Err(TransferError::Cancelled);
            }
            if result.success() {
                return Ok(result);
            }
            // 只看本次调用的输出；earlier mirrors' errors must not leak into this verdict
            let class = classify(&result.stderr);
            let detail = self.sanitizer.sanitize(result.last_error_line());
            let combined = match transcript.take() {
                Some(prev) => prev.chain(result),
                None => result,
            };
            match class {
                ErrorClass::None => return Ok(combined),
                ErrorClass::InsufficientSpace => {
                    self.notifier.notify(FailureCategory::Capacity, &format!("{}: {}", label, detail));
                    return Err(TransferError::InsufficientSpace(detail));
                }
                ErrorClass::SocketConflict => {
                    self.notifier
                        .notify(FailureCategory::ResourceContention, &format!("{}: {}", label, detail));
                    return Err(TransferError::SocketConflict(detail));
                }
                ErrorClass::TransientMirror => {
                    let next = current.remote().and_then(|r| self.remotes.next_after(r));
                    match next {
                        Some(remote) => {
                            tracing::warn!(
                                "[failover] {}: mirror {} failed ({}), switching to {}",
                                label,
                                tried.last().map(String::as_str).unwrap_or("<unbound>"),
                                detail,
                                remote
                            );
                            current = current.rebind(remote);
                            transcript = Some(combined);
                        }
                        None => {
                            tracing::warn!("[failover] {}: no mirrors left after {:?}", label, tried);
                            return Err(TransferError::MirrorsExhausted { tried, last_error: detail });
                        }
                    }
                }
            }
        }
    }
}

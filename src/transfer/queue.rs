use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use serde::Serialize;

use crate::error::{FailureCategory, TransferError};

use super::clock::{CancelToken, Clock, RealClock, WaitOutcome};
use super::progress::ProgressSample;
use super::request::LogicalRequest;
use super::runner::{RunContext, TransferRunner};

/// Retries after the first attempt before a job is given up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    /// Failed, waiting out the backoff delay before running again.
    Retrying,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancel,
    Skip,
}

struct TransferJob {
    name: String,
    request: LogicalRequest,
    retries: u32,
    state: JobState,
    cancel: CancelToken,
    stop: Option<StopReason>,
}

/// Read-only view of one queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub name: String,
    pub state: JobState,
    pub retries: u32,
}

/// Lifecycle notifications, delivered in order on an unbounded channel.
/// Terminal events carry the job's last progress sample.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Started { name: String, attempt: u32 },
    Retrying { name: String, retries: u32, delay_secs: u64, error: String },
    Succeeded { name: String, last_sample: Option<ProgressSample> },
    Failed {
        name: String,
        category: FailureCategory,
        error: String,
        last_sample: Option<ProgressSample>,
    },
    Cancelled { name: String, skipped: bool, last_sample: Option<ProgressSample> },
    /// The queue ran dry.
    Idle,
}

/// Intermediate progress; may be dropped when the consumer lags.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub name: String,
    pub sample: ProgressSample,
}

#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub max_retries: u32,
    /// Delay before retry `n` is `backoff_base * 2^n`.
    pub backoff_base: Duration,
    pub progress_capacity: usize,
    pub failure_log: Option<PathBuf>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: Duration::from_secs(1),
            progress_capacity: 64,
            failure_log: None,
        }
    }
}

impl QueueOptions {
    pub fn backoff_delay(&self, retries: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(retries))
    }
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<TransferJob>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sequential download queue. One worker thread runs the head job; every
/// other method is safe to call from the coordinating thread at any time.
pub struct DownloadQueue {
    shared: Arc<Shared>,
    events_rx: Receiver<QueueEvent>,
    progress_rx: Receiver<ProgressEvent>,
    worker: Option<JoinHandle<()>>,
}

impl DownloadQueue {
    pub fn start(runner: Arc<TransferRunner>, options: QueueOptions) -> Self {
        Self::with_clock(runner, options, Arc::new(RealClock::default()))
    }

    pub fn with_clock(
        runner: Arc<TransferRunner>,
        options: QueueOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shared =
            Arc::new(Shared { state: Mutex::new(QueueState::default()), changed: Condvar::new() });
        let (events_tx, events_rx) = unbounded::<QueueEvent>();
        let (progress_tx, progress_rx) = bounded::<ProgressEvent>(options.progress_capacity.max(1));
        let worker = Worker { shared: shared.clone(), runner, clock, options, events_tx, progress_tx };
        let handle = std::thread::spawn(move || worker.run());
        Self { shared, events_rx, progress_rx, worker: Some(handle) }
    }

    /// Append a job. Returns false when a job with the same name is already
    /// queued; enqueueing never starts a second transfer.
    pub fn enqueue(&self, name: impl Into<String>, request: LogicalRequest) -> bool {
        let name = name.into();
        let mut st = self.shared.lock();
        if st.shutdown || st.jobs.iter().any(|j| j.name == name) {
            tracing::debug!("[queue] enqueue ignored for {}", name);
            return false;
        }
        tracing::info!("[queue] enqueued {}", name);
        st.jobs.push_back(TransferJob {
            name,
            request,
            retries: 0,
            state: JobState::Pending,
            cancel: CancelToken::new(),
            stop: None,
        });
        drop(st);
        self.shared.changed.notify_all();
        true
    }

    /// Kill the active transfer and drop the head job without retrying.
    pub fn cancel_current(&self) -> Option<String> {
        self.stop_head(StopReason::Cancel)
    }

    /// Same as `cancel_current`, reported as a skip.
    pub fn skip_current(&self) -> Option<String> {
        self.stop_head(StopReason::Skip)
    }

    fn stop_head(&self, reason: StopReason) -> Option<String> {
        let mut st = self.shared.lock();
        let head = st.jobs.front_mut()?;
        tracing::info!("[queue] {:?} requested for {}", reason, head.name);
        if head.stop.is_none() {
            head.stop = Some(reason);
        }
        head.cancel.cancel();
        Some(head.name.clone())
    }

    /// Remove a queued job that is not at the head. The head is the running
    /// job and must be stopped with `cancel_current`/`skip_current`.
    pub fn remove(&self, name: &str) -> bool {
        let mut st = self.shared.lock();
        let Some(pos) = st.jobs.iter().position(|j| j.name == name) else {
            return false;
        };
        if pos == 0 {
            return false;
        }
        st.jobs.remove(pos);
        tracing::info!("[queue] removed {}", name);
        true
    }

    /// Display names in queue order; the first one is the running job.
    pub fn snapshot(&self) -> Vec<String> {
        self.shared.lock().jobs.iter().map(|j| j.name.clone()).collect()
    }

    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.shared
            .lock()
            .jobs
            .iter()
            .map(|j| JobSnapshot { name: j.name.clone(), state: j.state, retries: j.retries })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock().jobs.is_empty()
    }

    pub fn events(&self) -> Receiver<QueueEvent> {
        self.events_rx.clone()
    }

    pub fn progress(&self) -> Receiver<ProgressEvent> {
        self.progress_rx.clone()
    }

    /// Block until every queued job reached a terminal state.
    pub fn wait_idle(&self) {
        let mut st = self.shared.lock();
        while !st.jobs.is_empty() && !st.shutdown {
            st = self.shared.changed.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// `wait_idle` with an upper bound; returns whether the queue drained.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.shared.lock();
        while !st.jobs.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            st = self
                .shared
                .changed
                .wait_timeout(st, deadline - now)
                .map(|(g, _)| g)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        true
    }

    /// Stop the worker, killing the active transfer. Pending jobs are dropped.
    pub fn shutdown(&mut self) {
        {
            let mut st = self.shared.lock();
            st.shutdown = true;
            if let Some(head) = st.jobs.front() {
                head.cancel.cancel();
            }
        }
        self.shared.changed.notify_all();
        if let Some(h) = self.worker.take() {
            let _ = h.join();
        }
    }
}

impl Drop for DownloadQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    shared: Arc<Shared>,
    runner: Arc<TransferRunner>,
    clock: Arc<dyn Clock>,
    options: QueueOptions,
    events_tx: Sender<QueueEvent>,
    progress_tx: Sender<ProgressEvent>,
}

struct ActiveJob {
    name: String,
    request: LogicalRequest,
    cancel: CancelToken,
    retries: u32,
}

impl Worker {
    fn run(self) {
        while let Some(job) = self.next_job() {
            self.emit(QueueEvent::Started { name: job.name.clone(), attempt: job.retries + 1 });
            tracing::info!("[queue] running {} (attempt {})", job.name, job.retries + 1);
            let last: Mutex<Option<ProgressSample>> = Mutex::new(None);
            let on_progress = |sample: ProgressSample| {
                *last.lock().unwrap_or_else(PoisonError::into_inner) = Some(sample.clone());
                // 满了就丢 (drop when the consumer lags)
                let _ = self.progress_tx.try_send(ProgressEvent { name: job.name.clone(), sample });
            };
            let ctx = RunContext { label: &job.name, cancel: &job.cancel, on_progress: &on_progress };
            let outcome = self.runner.transfer(&job.request, &ctx);
            let last_sample = last.into_inner().unwrap_or_else(PoisonError::into_inner);
            self.settle(&job, outcome, last_sample);
        }
        tracing::debug!("[queue] worker exiting");
    }

    /// Wait for a head job and mark it running.
    fn next_job(&self) -> Option<ActiveJob> {
        let mut st = self.shared.lock();
        loop {
            if st.shutdown {
                return None;
            }
            if let Some(head) = st.jobs.front_mut() {
                head.state = JobState::Running;
                let job = ActiveJob {
                    name: head.name.clone(),
                    request: head.request.clone(),
                    cancel: head.cancel.clone(),
                    retries: head.retries,
                };
                drop(st);
                self.shared.changed.notify_all();
                return Some(job);
            }
            st = self.shared.changed.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn settle(
        &self,
        job: &ActiveJob,
        outcome: Result<super::executor::ProcessResult, TransferError>,
        last_sample: Option<ProgressSample>,
    ) {
        let err = match outcome {
            Ok(_) => {
                tracing::info!("[queue] {} succeeded", job.name);
                self.finish(
                    job,
                    JobState::Succeeded,
                    QueueEvent::Succeeded { name: job.name.clone(), last_sample },
                );
                return;
            }
            Err(e) => e,
        };

        if job.cancel.is_cancelled() || err == TransferError::Cancelled {
            self.finish_cancelled(job, last_sample);
            return;
        }

        if err.is_retriable() && job.retries < self.options.max_retries {
            let retries = job.retries + 1;
            {
                let mut st = self.shared.lock();
                if let Some(head) = st.jobs.front_mut()
                    && head.name == job.name
                {
                    head.retries = retries;
                    head.state = JobState::Retrying;
                }
            }
            let delay = self.options.backoff_delay(retries);
            tracing::warn!(
                "[queue] {} failed ({}), retry {}/{} in {:?}",
                job.name,
                err,
                retries,
                self.options.max_retries,
                delay
            );
            self.emit(QueueEvent::Retrying {
                name: job.name.clone(),
                retries,
                delay_secs: delay.as_secs(),
                error: err.to_string(),
            });
            if self.clock.wait(delay, &job.cancel) == WaitOutcome::Interrupted {
                self.finish_cancelled(job, last_sample);
            }
            return;
        }

        tracing::warn!("[queue] {} failed permanently: {}", job.name, err);
        if !err.is_already_reported() {
            let message = self.runner.sanitizer().sanitize(&format!("{}: {}", job.name, err));
            self.runner.notifier().notify(err.category(), &message);
        }
        if let Some(path) = &self.options.failure_log {
            crate::util::append_failure_record(path, &job.name, &err);
        }
        self.finish(
            job,
            JobState::Failed,
            QueueEvent::Failed {
                name: job.name.clone(),
                category: err.category(),
                error: err.to_string(),
                last_sample,
            },
        );
    }

    fn finish_cancelled(&self, job: &ActiveJob, last_sample: Option<ProgressSample>) {
        let skipped = {
            let st = self.shared.lock();
            st.jobs
                .front()
                .filter(|h| h.name == job.name)
                .and_then(|h| h.stop)
                .map(|r| r == StopReason::Skip)
                .unwrap_or(false)
        };
        tracing::info!("[queue] {} {}", job.name, if skipped { "skipped" } else { "cancelled" });
        self.finish(
            job,
            JobState::Cancelled,
            QueueEvent::Cancelled { name: job.name.clone(), skipped, last_sample },
        );
    }

    /// Drop the head job and publish its terminal event while holding the
    /// lock, so observers never see the event before the queue changed.
    fn finish(&self, job: &ActiveJob, state: JobState, event: QueueEvent) {
        let mut st = self.shared.lock();
        if st.jobs.front().map(|h| h.name == job.name).unwrap_or(false)
            && let Some(mut head) = st.jobs.pop_front()
        {
            head.state = state;
        }
        self.emit(event);
        if st.jobs.is_empty() {
            self.emit(QueueEvent::Idle);
        }
        drop(st);
        self.shared.changed.notify_all();
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let opts = QueueOptions::default();
        assert_eq!(opts.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(opts.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(opts.backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_saturates() {
        let opts = QueueOptions { backoff_base: Duration::from_secs(1), ..QueueOptions::default() };
        assert!(opts.backoff_delay(200) >= Duration::from_secs(u32::MAX as u64));
    }
}

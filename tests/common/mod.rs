#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use mirrorpilot::FailureCategory;
use mirrorpilot::notify::Notifier;
use mirrorpilot::transfer::{CancelToken, Clock, CommandSpec, Executor, ExitState, ProcessResult, WaitOutcome};

/// One scripted invocation.
#[derive(Clone)]
pub struct Step {
    pub stderr: Vec<String>,
    pub status: ExitState,
    pub hold: Option<Duration>,
    pub until_cancelled: bool,
}

impl Step {
    pub fn ok() -> Self {
        Self { stderr: Vec::new(), status: ExitState::Exited(0), hold: None, until_cancelled: false }
    }

    pub fn fail(stderr: &str) -> Self {
        Self {
            stderr: stderr.lines().map(str::to_string).collect(),
            status: ExitState::Exited(1),
            hold: None,
            until_cancelled: false,
        }
    }

    pub fn with_stderr(mut self, line: &str) -> Self {
        self.stderr.push(line.to_string());
        self
    }

    pub fn hold(mut self, d: Duration) -> Self {
        self.hold = Some(d);
        self
    }

    /// Runs until the cancel token fires.
    pub fn blocking() -> Self {
        Self { until_cancelled: true, ..Self::ok() }
    }
}

/// Fake executor replaying `Step`s in order; succeeds once the script runs out.
#[derive(Default)]
pub struct ScriptedExecutor {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Vec<String>>>,
    timeouts: Mutex<Vec<Option<Duration>>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps: Mutex::new(steps.into()), ..Default::default() }
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn timeouts(&self) -> Vec<Option<Duration>> {
        self.timeouts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Remote of every call, read from the `remote:path` source argument.
    pub fn remotes_called(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|args| args.get(1))
            .map(|src| src.split(':').next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl Executor for ScriptedExecutor {
    fn execute(
        &self,
        cmd: &CommandSpec,
        on_stderr: &(dyn Fn(&str) + Sync),
        cancel: &CancelToken,
    ) -> ProcessResult {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(cmd.args.clone());
        self.timeouts.lock().unwrap().push(cmd.timeout);
        let step = self.steps.lock().unwrap().pop_front().unwrap_or_else(Step::ok);

        for line in &step.stderr {
            on_stderr(line);
        }
        let mut status = step.status.clone();
        if let Some(d) = step.hold {
            std::thread::sleep(d);
        }
        if step.until_cancelled {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        if cancel.is_cancelled() {
            status = ExitState::Cancelled;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        ProcessResult { stdout: String::new(), stderr: step.stderr.join("\n"), status }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub seen: Mutex<Vec<(FailureCategory, String)>>,
}

impl RecordingNotifier {
    pub fn categories(&self) -> Vec<FailureCategory> {
        self.seen.lock().unwrap().iter().map(|(c, _)| *c).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: FailureCategory, message: &str) {
        self.seen.lock().unwrap().push((kind, message.to_string()));
    }
}

/// Clock that returns immediately and remembers every requested delay.
#[derive(Default)]
pub struct RecordingClock {
    pub delays: Mutex<Vec<Duration>>,
}

impl Clock for RecordingClock {
    fn wait(&self, delay: Duration, cancel: &CancelToken) -> WaitOutcome {
        self.delays.lock().unwrap().push(delay);
        if cancel.is_cancelled() { WaitOutcome::Interrupted } else { WaitOutcome::Elapsed }
    }
}

pub fn temp_path(tag: &str) -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("mp_it_{}_{}_{}", tag, std::process::id(), nanos))
}

/// Clock whose backoff only ends through cancellation.
#[derive(Default)]
pub struct StuckClock {
    pub waits: AtomicUsize,
}

impl Clock for StuckClock {
    fn wait(&self, _delay: Duration, cancel: &CancelToken) -> WaitOutcome {
        self.waits.fetch_add(1, Ordering::SeqCst);
        while !cancel.is_cancelled() {
            std::thread::sleep(Duration::from_millis(5));
        }
        WaitOutcome::Interrupted
    }
}

// transfer module: subprocess execution, progress parsing, mirror failover and
// the sequential download queue
pub mod classify;
pub mod clock;
pub mod executor;
pub mod failover;
pub mod progress;
pub mod queue;
pub mod request;
pub mod runner;

pub use classify::{ErrorClass, classify};
pub use clock::{CancelToken, Clock, RealClock, WaitOutcome};
pub use executor::{Executor, ExitState, ProcessExecutor, ProcessResult};
pub use failover::MirrorFailoverPolicy;
pub use progress::{ProgressSample, parse as parse_progress};
pub use queue::{DownloadQueue, JobSnapshot, JobState, ProgressEvent, QueueEvent, QueueOptions};
pub use request::{CommandSpec, LogicalRequest, Operation, TransferFlags};
pub use runner::{RunContext, TransferRunner};

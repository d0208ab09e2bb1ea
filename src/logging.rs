use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// With `verbose` everything from this crate goes to a daily log file under
/// `log_dir` (filter overridable through `RUST_LOG`); the returned guard must
/// be kept alive until exit so buffered lines are flushed. Without it no
/// subscriber is installed; user-facing problems go through the notifier.
pub fn init(verbose: bool, log_dir: &Path) -> Option<WorkerGuard> {
    if !verbose {
        return None;
    }
    if std::fs::create_dir_all(log_dir).is_err() {
        eprintln!("⚠️ cannot create log directory {}", log_dir.display());
        return None;
    }
    let appender = tracing_appender::rolling::daily(log_dir, "mirrorpilot.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mirrorpilot=debug"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(false))
        .try_init()
        .ok()?;
    tracing::info!("logging to {}", log_dir.display());
    Some(guard)
}

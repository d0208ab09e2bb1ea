use chrono::Utc;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::TransferError;

/// Try to enable ANSI escape sequence support on Windows consoles.
/// Returns true if enabling succeeded, false otherwise.
#[cfg(windows)]
pub fn try_enable_ansi_on_windows() -> bool {
    enable_ansi_support::enable_ansi_support().is_ok()
}

// Terminals elsewhere support ANSI already; keep the call sites uniform.
#[cfg(not(windows))]
pub fn try_enable_ansi_on_windows() -> bool {
    false
}

/// Convert a byte count into a human readable string using IEC units (KiB/MiB/GiB).
pub fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.2} KiB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Rewrites absolute local paths in text shown to the user, e.g. the home
/// directory becomes `~`. Purely cosmetic.
#[derive(Debug, Clone, Default)]
pub struct PathSanitizer {
    // longest prefix first so nested roots win over their parents
    replacements: Vec<(String, String)>,
}

impl PathSanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sanitizer that shortens the current user's home directory to `~`.
    pub fn for_home() -> Self {
        let mut s = Self::new();
        if let Some(home) = dirs::home_dir() {
            s = s.with_root(home, "~");
        }
        s
    }

    pub fn with_root(mut self, root: impl AsRef<Path>, label: impl Into<String>) -> Self {
        let root = root.as_ref().to_string_lossy().trim_end_matches(['/', '\\']).to_string();
        if !root.is_empty() {
            self.replacements.push((root, label.into()));
            self.replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        }
        self
    }

    pub fn sanitize(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (root, label) in &self.replacements {
            if out.contains(root.as_str()) {
                out = out.replace(root.as_str(), label);
            }
        }
        out
    }
}

/// Progress bar for the job currently downloading. Uses a percent scale since
/// the tool reports sizes only once the listing completes.
pub fn init_job_progress(verbose: bool) -> (MultiProgress, ProgressStyle) {
    let mp = if verbose {
        MultiProgress::with_draw_target(ProgressDrawTarget::stdout())
    } else {
        MultiProgress::new()
    };
    let style = ProgressStyle::with_template(
        "{spinner:.green} {prefix:<24} [{bar:40.cyan/blue}] {pos:>3}% {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    let _ = try_enable_ansi_on_windows();
    (mp, style)
}

pub fn new_job_bar(mp: &MultiProgress, style: &ProgressStyle, name: &str) -> ProgressBar {
    let pb = mp.add(ProgressBar::new(100));
    pb.set_style(style.clone());
    pb.set_prefix(name.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    pb
}

/// Print a concise summary line once the queue drains.
pub fn print_summary(succeeded: usize, failed: usize, cancelled: usize, elapsed_secs: f64) {
    let line = format!(
        "Finished in {:.1}s | succeeded: {} | failed: {} | cancelled: {}",
        elapsed_secs, succeeded, failed, cancelled
    );
    if failed > 0 && (try_enable_ansi_on_windows() || cfg!(not(windows))) {
        println!("{}", line.red());
    } else {
        println!("{}", line);
    }
}

/// Append one terminal failure as a JSON line with a UTC timestamp. Errors
/// writing the log are swallowed; the failure was already shown to the user.
pub fn append_failure_record(path: &Path, job: &str, err: &TransferError) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let detail = match err {
        TransferError::MirrorsExhausted { tried, last_error } => {
            serde_json::json!({"tried": tried, "last_error": last_error})
        }
        TransferError::ProcessFailed { code, detail } => {
            serde_json::json!({"code": code, "detail": detail})
        }
        TransferError::InsufficientSpace(m)
        | TransferError::SocketConflict(m)
        | TransferError::SpawnFailed(m)
        | TransferError::TimedOut(m) => serde_json::json!({"detail": m}),
        TransferError::Cancelled => serde_json::Value::Null,
    };
    let obj = serde_json::json!({
        "time": Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
        "job": job,
        "category": err.category(),
        "message": err.to_string(),
        "detail": detail,
    });
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path)
        && let Ok(line) = serde_json::to_string(&obj)
    {
        let _ = writeln!(f, "{}", line);
    }
}

/// Default location of the failure log inside the config directory.
pub fn failure_log_path(config_dir: &Path) -> PathBuf {
    config_dir.join("logs").join("failures.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.00 KiB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.00 MiB");
        assert_eq!(human_bytes(5 * 1024 * 1024 * 1024), "5.00 GiB");
    }

    #[test]
    fn sanitizer_prefers_longest_root() {
        let s = PathSanitizer::new()
            .with_root("/home/u", "~")
            .with_root("/home/u/Downloads/games/", "<downloads>");
        assert_eq!(
            s.sanitize("write /home/u/Downloads/games/Foo/a.7z: failed; see /home/u/log"),
            "write <downloads>/Foo/a.7z: failed; see ~/log"
        );
    }

    #[test]
    fn sanitizer_without_roots_is_identity() {
        assert_eq!(PathSanitizer::new().sanitize("/tmp/x"), "/tmp/x");
    }

    #[test]
    fn failure_record_is_json_line() {
        let mut path = std::env::temp_dir();
        let nanos =
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        path.push(format!("mp_test_failures_{}", nanos));
        path.push("failures.jsonl");
        let err = TransferError::MirrorsExhausted {
            tried: vec!["a".into(), "b".into()],
            last_error: "quota exceeded".into(),
        };
        append_failure_record(&path, "Some Game", &err);
        append_failure_record(&path, "Other Game", &TransferError::SpawnFailed("nope".into()));
        let content = std::fs::read_to_string(&path).expect("read failure log");
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let v: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(v["job"], "Some Game");
        assert_eq!(v["category"], "transient-mirror");
        assert_eq!(v["detail"]["tried"][1], "b");
        let _ = std::fs::remove_file(&path);
        let _ = path.parent().map(std::fs::remove_dir);
    }
}

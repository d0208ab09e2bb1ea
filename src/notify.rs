use owo_colors::OwoColorize;

use crate::error::FailureCategory;

/// Fire-and-forget sink for conditions the user has to act on.
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: FailureCategory, message: &str);
}

/// Prints to stderr (and logs through tracing). On Windows it can also raise
/// a toast, since downloads usually run in the background.
#[derive(Debug, Clone, Default)]
pub struct ConsoleNotifier {
    pub toast: bool,
}

impl ConsoleNotifier {
    pub fn new(toast: bool) -> Self {
        Self { toast }
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, kind: FailureCategory, message: &str) {
        tracing::warn!("[notify] {}: {}", kind, message);
        if crate::util::try_enable_ansi_on_windows() || cfg!(not(windows)) {
            eprintln!("{} {}", format!("⚠️ {}:", kind).yellow(), message);
        } else {
            eprintln!("⚠️ {}: {}", kind, message);
        }
        if self.toast {
            show_toast(&kind.to_string(), message);
        }
    }
}

#[cfg(windows)]
fn show_toast(title: &str, body: &str) {
    use winrt_notification::{Duration, Sound, Toast};
    let _ = Toast::new(Toast::POWERSHELL_APP_ID)
        .title(title)
        .text1(body)
        .sound(Some(Sound::Default))
        .duration(Duration::Short)
        .show();
}

#[cfg(not(windows))]
fn show_toast(_title: &str, _body: &str) {}

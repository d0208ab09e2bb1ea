use serde::Serialize;

/// What the tool's stderr says went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    None,
    TransientMirror,
    InsufficientSpace,
    SocketConflict,
}

const SPACE_MARKERS: &[&str] = &["not enough space on the disk", "no space left on device"];

const SOCKET_MARKERS: &[&str] = &["Only one usage of each socket address"];

const MIRROR_MARKERS: &[&str] = &[
    "400 Bad Request",
    "couldn't fetch token",
    "failed to get token",
    "AuthenticationFailed",
    "authError",
    "quota",
    "exceeded",
    "directory not found",
    "Failed to",
];

/// Classify accumulated stderr. Matching is case-sensitive substring search;
/// disk space wins over socket conflicts, which win over mirror errors, so a
/// generic `Failed to` next to a disk-full message is still a capacity error.
pub fn classify(stderr: &str) -> ErrorClass {
    let has = |markers: &[&str]| markers.iter().any(|m| stderr.contains(m));
    if has(SPACE_MARKERS) {
        ErrorClass::InsufficientSpace
    } else if has(SOCKET_MARKERS) {
        ErrorClass::SocketConflict
    } else if has(MIRROR_MARKERS) {
        ErrorClass::TransientMirror
    } else {
        ErrorClass::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_output_is_none() {
        assert_eq!(classify(""), ErrorClass::None);
        assert_eq!(classify("INFO  : Transferred: 1 GiB / 1 GiB, 100%"), ErrorClass::None);
    }

    #[test]
    fn mirror_markers() {
        for line in [
            "ERROR : Games/x: Failed to copy: googleapi: Error 403",
            "couldn't fetch token - maybe it has expired?",
            "Error 403: The download quota for this file has been exceeded",
            "error reading source directory: directory not found",
            "HTTP error 400 (400 Bad Request)",
        ] {
            assert_eq!(classify(line), ErrorClass::TransientMirror, "{}", line);
        }
    }

    #[test]
    fn case_sensitive() {
        assert_eq!(classify("failed to copy"), ErrorClass::None);
        assert_eq!(classify("DIRECTORY NOT FOUND"), ErrorClass::None);
    }

    #[test]
    fn space_wins_over_failed_to() {
        let text = "ERROR : Failed to copy: write /dl/x.7z: no space left on device";
        assert_eq!(classify(text), ErrorClass::InsufficientSpace);
        let text = "Failed to copy: There is not enough space on the disk.";
        assert_eq!(classify(text), ErrorClass::InsufficientSpace);
    }

    #[test]
    fn socket_wins_over_failed_to() {
        let text = "Failed to start remote control: listen tcp 127.0.0.1:5572: bind: Only one usage of each socket address (protocol/network address/port) is normally permitted.";
        assert_eq!(classify(text), ErrorClass::SocketConflict);
        let both = format!("{}\nno space left on device", text);
        assert_eq!(classify(&both), ErrorClass::InsufficientSpace);
    }
}

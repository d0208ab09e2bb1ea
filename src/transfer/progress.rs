use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Marker that every stats line of the tool carries.
pub const PROGRESS_MARKER: &str = "Transferred:";

const CALCULATING: &str = "calculating";

/// One structured snapshot of transfer progress taken from a single line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSample {
    pub percent: Option<u8>,
    pub transferred_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    /// Speed in MB/s (1 MB = 2^20 bytes).
    pub speed_mbps: Option<f64>,
    /// Speed exactly as the tool printed it, e.g. `12.5 MiB/s`.
    pub speed_text: Option<String>,
    pub eta_secs: Option<u64>,
    pub eta_text: String,
    pub status: String,
    pub current_file: Option<u32>,
    pub total_files: Option<u32>,
}

static TIMESTAMP_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\d{4}/\d{2}/\d{2}\s+\d{2}:\d{2}:\d{2}(?:\.\d+)?\s+(?:[A-Z]+\s*:\s*)?")
        .expect("valid timestamp regex")
});
static FILE_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Transferred:\s*\d+\s*/\s*\d+\s*,\s*\d+%").expect("valid file-count regex")
});
static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[\s,])(\d{1,3})%").expect("valid percent regex"));
static BYTES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*([KkMGT]i?B|B)\s*/\s*(\d+(?:\.\d+)?)\s*([KkMGT]i?B|B)\b")
        .expect("valid bytes regex")
});
static SPEED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*([KkMGT]i?B|B)/s").expect("valid speed regex")
});
static ETA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ETA\s+(?:(\d+)d)?(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)(?:\.\d+)?s)?")
        .expect("valid eta regex")
});
static XFR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"xfr#(\d+)/(\d+)").expect("valid xfr regex"));

/// Bytes per unit, 1024-based. `None` for units the tool never prints.
pub fn unit_multiplier(unit: &str) -> Option<u64> {
    match unit {
        "B" => Some(1),
        "KB" | "KiB" | "kB" | "kiB" => Some(1 << 10),
        "MB" | "MiB" => Some(1 << 20),
        "GB" | "GiB" => Some(1 << 30),
        "TB" | "TiB" => Some(1 << 40),
        _ => None,
    }
}

fn to_bytes(value: &str, unit: &str) -> Option<u64> {
    let v: f64 = value.parse().ok()?;
    let m = unit_multiplier(unit)?;
    Some((v * m as f64).round() as u64)
}

/// `HH:MM:SS` from one hour up, `MM:SS` below; zero means still calculating.
pub fn format_eta(secs: u64) -> String {
    if secs == 0 {
        return CALCULATING.to_string();
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 { format!("{:02}:{:02}:{:02}", h, m, s) } else { format!("{:02}:{:02}", m, s) }
}

fn parse_eta(line: &str) -> Option<u64> {
    let caps = ETA.captures(line)?;
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
    let (d, h, m, s) = (part(1), part(2), part(3), part(4));
    if d.is_none() && h.is_none() && m.is_none() && s.is_none() {
        return None;
    }
    // 溢出视为无法解析 (absurd day counts must not panic the reader thread)
    d.unwrap_or(0)
        .checked_mul(86_400)?
        .checked_add(h.unwrap_or(0).checked_mul(3600)?)?
        .checked_add(m.unwrap_or(0).checked_mul(60)?)?
        .checked_add(s.unwrap_or(0))
}

/// Turn one line of tool output into a progress sample.
///
/// Returns `None` for lines without the stats marker and for the
/// `Transferred: N / M, P%` file-count line, which would otherwise contradict
/// the byte-based progress. The remaining fields are extracted independently,
/// so any of them may be missing.
pub fn parse(line: &str) -> Option<ProgressSample> {
    if !line.contains(PROGRESS_MARKER) {
        return None;
    }
    let line = TIMESTAMP_PREFIX.replace(line, "");
    let line = line.trim();
    if FILE_COUNT.is_match(line) {
        return None;
    }

    let percent = PERCENT
        .captures(line)
        .and_then(|c| c[1].parse::<u8>().ok())
        .map(|p| p.min(100));

    let (transferred_bytes, total_bytes) = match BYTES.captures(line) {
        Some(c) => (to_bytes(&c[1], &c[2]), to_bytes(&c[3], &c[4])),
        None => (None, None),
    };

    let (speed_mbps, speed_text) = match SPEED.captures(line) {
        Some(c) => {
            let mbps = to_bytes(&c[1], &c[2]).map(|b| b as f64 / (1u64 << 20) as f64);
            (mbps, Some(c[0].to_string()))
        }
        None => (None, None),
    };

    let eta_secs = parse_eta(line);
    let eta_text = eta_secs.map(format_eta).unwrap_or_else(|| CALCULATING.to_string());

    let (current_file, total_files) = match XFR.captures(line) {
        Some(c) => (c[1].parse().ok(), c[2].parse().ok()),
        None => (None, None),
    };

    Some(ProgressSample {
        percent,
        transferred_bytes,
        total_bytes,
        speed_mbps,
        speed_text,
        eta_secs,
        eta_text,
        status: line.to_string(),
        current_file,
        total_files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &str = "Transferred: 1.234 GiB / 2.468 GiB, 50%, 12.5 MiB/s, ETA 1m34s";

    #[test]
    fn reference_line() {
        let s = parse(REFERENCE).expect("progress sample");
        assert_eq!(s.percent, Some(50));
        assert_eq!(s.transferred_bytes, Some((1.234f64 * 1073741824.0).round() as u64));
        assert_eq!(s.total_bytes, Some((2.468f64 * 1073741824.0).round() as u64));
        let speed = s.speed_mbps.expect("speed");
        assert!((speed - 12.5).abs() < 1e-9, "speed = {}", speed);
        assert_eq!(s.speed_text.as_deref(), Some("12.5 MiB/s"));
        assert_eq!(s.eta_secs, Some(94));
        assert_eq!(s.eta_text, "01:34");
    }

    #[test]
    fn file_count_line_is_suppressed() {
        assert_eq!(parse("Transferred: 0 / 7, 0%"), None);
        assert_eq!(parse("Transferred:            3 / 7, 43%"), None);
    }

    #[test]
    fn lines_without_marker_are_ignored() {
        assert_eq!(parse("1.234 GiB / 2.468 GiB, 50%, 12.5 MiB/s, ETA 1m34s"), None);
        assert_eq!(parse("Checks: 0 / 0, -"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn parse_is_pure() {
        assert_eq!(parse(REFERENCE), parse(REFERENCE));
    }

    #[test]
    fn unit_multipliers_are_binary() {
        assert_eq!(unit_multiplier("B"), Some(1));
        for u in ["KB", "KiB"] {
            assert_eq!(unit_multiplier(u), Some(1024));
        }
        for u in ["MB", "MiB"] {
            assert_eq!(unit_multiplier(u), Some(1024 * 1024));
        }
        for u in ["GB", "GiB"] {
            assert_eq!(unit_multiplier(u), Some(1024 * 1024 * 1024));
        }
        assert_eq!(unit_multiplier("XB"), None);
    }

    #[test]
    fn timestamp_prefix_is_stripped() {
        let s = parse("2024/03/01 10:11:12 INFO  : Transferred: 512 B / 1 KiB, 50%, 256 B/s, ETA 2s")
            .expect("sample");
        assert!(s.status.starts_with("Transferred:"));
        assert_eq!(s.transferred_bytes, Some(512));
        assert_eq!(s.total_bytes, Some(1024));
        assert_eq!(s.eta_text, "00:02");
    }

    #[test]
    fn missing_fields_are_tolerated() {
        let s = parse("Transferred:   0 B / 0 B, -, 0 B/s, ETA -").expect("sample");
        assert_eq!(s.percent, None);
        assert_eq!(s.transferred_bytes, Some(0));
        assert_eq!(s.speed_mbps, Some(0.0));
        assert_eq!(s.eta_secs, None);
        assert_eq!(s.eta_text, "calculating");

        let s = parse("Transferred: 80%").expect("sample");
        assert_eq!(s.percent, Some(80));
        assert_eq!(s.total_bytes, None);
        assert_eq!(s.speed_text, None);
    }

    #[test]
    fn eta_formats() {
        assert_eq!(format_eta(0), "calculating");
        assert_eq!(format_eta(34), "00:34");
        assert_eq!(format_eta(3600), "01:00:00");
        assert_eq!(format_eta(3723), "01:02:03");
        let s = parse("Transferred: 1 GiB / 9 GiB, 11%, 1 MiB/s, ETA 2h5m").expect("sample");
        assert_eq!(s.eta_secs, Some(2 * 3600 + 5 * 60));
        assert_eq!(s.eta_text, "02:05:00");
        let s = parse("Transferred: 1 GiB / 9 GiB, 11%, 1 MiB/s, ETA 45s").expect("sample");
        assert_eq!(s.eta_text, "00:45");
        let s = parse("Transferred: 9 GiB / 9 GiB, 100%, 1 MiB/s, ETA 0s").expect("sample");
        assert_eq!(s.eta_text, "calculating");
    }

    #[test]
    fn xfr_token_fills_file_counts() {
        let s = parse("Transferred: 1 GiB / 2 GiB, 50%, 3 MiB/s, ETA 5m0s (xfr#3/7)").expect("sample");
        assert_eq!(s.current_file, Some(3));
        assert_eq!(s.total_files, Some(7));
    }

    #[test]
    fn speed_in_kib_converted_to_mb() {
        let s = parse("Transferred: 1 MiB / 2 MiB, 50%, 512 KiB/s, ETA 2s").expect("sample");
        assert_eq!(s.speed_mbps, Some(0.5));
        assert_eq!(s.speed_text.as_deref(), Some("512 KiB/s"));
    }

    #[test]
    fn overflowing_eta_is_unknown() {
        let s = parse("Transferred: 1 GiB / 2 GiB, 50%, 1 MiB/s, ETA 999999999999999999d")
            .expect("sample");
        assert_eq!(s.percent, Some(50));
        assert_eq!(s.eta_secs, None);
        assert_eq!(s.eta_text, "calculating");
        assert!(parse("Transferred: 1 GiB / 2 GiB, 50%, ETA 99999999999999999999h").is_some());
    }
}

//! Size parsing, throughput arithmetic and display helpers

use crate::error::{Error, Result};
use std::time::Duration;

/// One mebibyte. Reported speeds are MiB per second.
pub const MIB: u64 = 1024 * 1024;

/// Elapsed time below this is clamped so a speed is always finite
pub const MIN_ELAPSED: Duration = Duration::from_millis(1);

/// Parse a human-readable size such as `100M`, `4K`, `1G` or `4096`.
///
/// Suffixes are binary (`K` = 1024) and case-insensitive; a trailing `B`
/// or `iB` is accepted.
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidRequest("empty size".to_string()));
    }

    let split_pos = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let (num_str, suffix) = s.split_at(split_pos);

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| Error::InvalidRequest(format!("invalid size '{}'", s)))?;

    let multiplier: u64 = match suffix.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => MIB,
        "G" | "GB" | "GIB" => 1024 * MIB,
        _ => return Err(Error::InvalidRequest(format!("unknown size suffix in '{}'", s))),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| Error::InvalidRequest(format!("{} is too large", s)))
}

/// Throughput in MiB/s, with the elapsed time clamped to [`MIN_ELAPSED`]
pub fn mib_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.max(MIN_ELAPSED).as_secs_f64();
    bytes as f64 / MIB as f64 / secs
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const GB: u64 = MIB * 1024;

    if bytes >= GB && bytes % GB == 0 {
        format!("{} GB", bytes / GB)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MIB {
        format!("{} MB", bytes / MIB)
    } else if bytes >= KB {
        format!("{} KB", bytes / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a MiB/s figure for display
pub fn format_speed(mib_per_sec: f64) -> String {
    if mib_per_sec >= 1024.0 {
        format!("{:.2} GB/s", mib_per_sec / 1024.0)
    } else {
        format!("{:.2} MB/s", mib_per_sec)
    }
}

/// Format duration as human-readable string
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

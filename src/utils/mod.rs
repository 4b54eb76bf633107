//! Configuration, error taxonomy and small system helpers.

pub mod configuration;
pub mod errors;

use std::fs;

/// Free memory on this node in bytes, used to size aggregation buffers.
/// Falls back to a conservative figure when `/proc/meminfo` is unavailable.
pub fn free_mem_bytes() -> u64 {
    const FALLBACK: u64 = 4 * 1024 * 1024 * 1024;
    let Ok(meminfo) = fs::read_to_string("/proc/meminfo") else {
        return FALLBACK;
    };
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            if let Some(kb) = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok()) {
                return kb * 1024;
            }
        }
    }
    FALLBACK
}

/// Human-readable byte size for log lines.
pub fn size_str(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

/// `n (pct% of total)` for stage summaries.
pub fn perc_str(n: u64, total: u64) -> String {
    if total == 0 {
        return format!("{} (0.00%)", n);
    }
    format!("{} ({:.2}%)", n, 100.0 * n as f64 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_str() {
        assert_eq!(size_str(512), "512 B");
        assert_eq!(size_str(2048), "2.00 KB");
        assert_eq!(size_str(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_perc_str() {
        assert_eq!(perc_str(5, 10), "5 (50.00%)");
        assert_eq!(perc_str(1, 0), "1 (0.00%)");
    }
}

use std::time::{Duration, Instant};

/// Format a `Duration` as a human-readable string with automatic unit scaling.
///
/// Produces output like `1.94ms`, `2.34s`, `150.00us` using Rust's Debug format.
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}

/// Log a warning if the elapsed time since `start` exceeds `threshold`.
pub fn log_if_slow(start: Instant, threshold: Duration, label: &str) {
    let elapsed = start.elapsed();
    if elapsed > threshold {
        tracing::warn!(duration = fmt_duration(elapsed), "slow operation: {label}");
    }
}

/// Zero-pad a USN suffix to 3 digits. Per design note (b), padding is always 3
/// digits regardless of the source system's inconsistent behavior below 100.
pub fn zero_pad_suffix(n: u32) -> String {
    format!("{n:03}")
}

/// Assemble a full USN from a 7-character prefix and a numeric suffix.
pub fn assemble_usn(prefix: &str, n: u32) -> String {
    format!("{prefix}{}", zero_pad_suffix(n))
}

/// Parse the trailing 3-digit numeric suffix off a fixed-width USN.
pub fn usn_suffix(usn: &str) -> Option<u32> {
    if usn.len() < 3 {
        return None;
    }
    usn[usn.len() - 3..].parse().ok()
}

/// Split a USN into its 7-character prefix and numeric suffix.
pub fn split_usn(usn: &str) -> Option<(&str, u32)> {
    if usn.len() != 10 {
        return None;
    }
    let (prefix, suffix) = usn.split_at(7);
    suffix.parse().ok().map(|n| (prefix, n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_below_hundred() {
        assert_eq!(zero_pad_suffix(1), "001");
        assert_eq!(zero_pad_suffix(42), "042");
        assert_eq!(zero_pad_suffix(999), "999");
    }

    #[test]
    fn assembles_full_usn() {
        assert_eq!(assemble_usn("1OX21CS", 1), "1OX21CS001");
    }

    #[test]
    fn splits_usn() {
        assert_eq!(split_usn("1OX21CS001"), Some(("1OX21CS", 1)));
        assert_eq!(split_usn("short"), None);
    }
}

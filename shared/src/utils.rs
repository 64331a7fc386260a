//! Utility functions and helpers

use anyhow::{Context, Result};
use std::time::Duration;

/// Parse a duration string (e.g., "500ms", "30s", "5m", "1h"); bare numbers are seconds
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    let (num_str, unit_ms) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (s, 1_000)
    };

    let value: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration: {:?}", s))?;
    let millis = value
        .checked_mul(unit_ms)
        .with_context(|| format!("Duration out of range: {:?}", s))?;

    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap().as_secs(), 30);
        assert_eq!(parse_duration("5m").unwrap().as_secs(), 300);
        assert_eq!(parse_duration("1h").unwrap().as_secs(), 3600);
        assert_eq!(parse_duration("60").unwrap().as_secs(), 60);
        assert_eq!(parse_duration("250ms").unwrap().as_millis(), 250);
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("99999999999999999h").is_err());
    }
}

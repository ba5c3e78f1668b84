//! Minimal duration parsing shared by both binaries' configuration.

use std::time::Duration;

/// Parses durations of the form `"<number>ms"` or `"<number>s"`.
///
/// The Go original leaned on the standard library's `time.ParseDuration`;
/// this is its minimal equivalent for the handful of units this system's
/// env vars actually use.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if let Some(digits) = raw.strip_suffix("ms") {
        let millis: u64 = digits
            .parse()
            .map_err(|_| format!("not a valid duration: {raw:?}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(digits) = raw.strip_suffix('s') {
        let secs: f64 = digits
            .parse()
            .map_err(|_| format!("not a valid duration: {raw:?}"))?;
        if secs < 0.0 {
            return Err(format!("duration must be non-negative: {raw:?}"));
        }
        return Ok(Duration::from_secs_f64(secs));
    }
    Err(format!("duration must end in \"ms\" or \"s\": {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_parses_milliseconds() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_duration_parses_seconds() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_duration_parses_fractional_seconds() {
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_duration_rejects_missing_unit() {
        assert!(parse_duration("5").is_err());
    }

    #[test]
    fn test_duration_rejects_garbage() {
        assert!(parse_duration("banana").is_err());
    }

    #[test]
    fn test_duration_rejects_negative_seconds() {
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn test_duration_accepts_zero() {
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
    }
}

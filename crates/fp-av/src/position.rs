//! Playback position formatting and parsing.

use std::time::Duration;

use fp_core::{Error, Result};

/// Format `d` as `H:MM:SS`, truncating fractional seconds.
pub fn duration_to_position(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Parse `[[hh:]mm:]ss` into seconds. Seconds may be fractional and the
/// whole position may carry a leading `-`.
pub fn parse_position(s: &str) -> Result<f64> {
    let s = s.trim();
    let (sign, body) = match s.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, s),
    };
    let parts: Vec<&str> = body.split(':').collect();
    if parts.len() > 3 || body.is_empty() {
        return Err(Error::Config(format!("invalid position {s:?}")));
    }

    let mut total = 0.0;
    for part in &parts {
        let value: f64 = part
            .parse()
            .map_err(|_| Error::Config(format!("invalid position {s:?}")))?;
        if !value.is_finite() || value < 0.0 {
            return Err(Error::Config(format!("invalid position {s:?}")));
        }
        total = total * 60.0 + value;
    }
    Ok(sign * total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn formats_positions() {
        assert_eq!(duration_to_position(Duration::ZERO), "0:00:00");
        assert_eq!(duration_to_position(Duration::from_secs(61)), "0:01:01");
        assert_eq!(duration_to_position(Duration::from_millis(3_723_900)), "1:02:03");
        assert_eq!(duration_to_position(Duration::from_secs(36_000)), "10:00:00");
    }

    #[test]
    fn parses_positions() {
        assert_eq!(parse_position("5").unwrap(), 5.0);
        assert_eq!(parse_position("1.5").unwrap(), 1.5);
        assert_eq!(parse_position("1:30").unwrap(), 90.0);
        assert_eq!(parse_position("1:02:03").unwrap(), 3723.0);
        assert_eq!(parse_position("-10").unwrap(), -10.0);
    }

    #[test]
    fn rejects_bad_positions() {
        assert_matches!(parse_position(""), Err(Error::Config(_)));
        assert_matches!(parse_position("1:2:3:4"), Err(Error::Config(_)));
        assert_matches!(parse_position("a:10"), Err(Error::Config(_)));
        assert_matches!(parse_position("--1"), Err(Error::Config(_)));
    }
}

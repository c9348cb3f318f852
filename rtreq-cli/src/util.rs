use std::time::Duration;

use anyhow::{Error, Result};

/// Parses a human readable duration such as `500ms`, `30s` or `1h30m`.
///
/// A bare number is taken as seconds.
pub(crate) fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::msg("empty duration"));
    }
    if let Ok(secs) = s.parse::<f64>() {
        return to_duration(secs * 1e9, s);
    }

    let mut total = Duration::from_secs(0);
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| Error::msg(format!("missing unit in duration: {}", s)))?;
        if num_len == 0 {
            return Err(Error::msg(format!("invalid duration: {}", s)));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| Error::msg(format!("invalid number in duration: {}", s)))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or_else(|| rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => return Err(Error::msg(format!("unknown unit \"{}\" in duration: {}", unit, s))),
        };
        rest = &rest[unit_len..];
        total += to_duration(value * nanos_per_unit, s)?;
    }
    Ok(total)
}

fn to_duration(nanos: f64, s: &str) -> Result<Duration> {
    if !nanos.is_finite() || nanos < 0. || nanos > u64::MAX as f64 {
        return Err(Error::msg(format!("invalid duration: {}", s)));
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}

#[test]
fn parse_simple_durations() {
    assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
    assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
    assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
}

#[test]
fn parse_compound_duration() {
    assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
    assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
}

#[test]
fn parse_invalid_duration() {
    assert!(parse_duration("").is_err());
    assert!(parse_duration("ms").is_err());
    assert!(parse_duration("10 parsecs").is_err());
    assert!(parse_duration("10x").is_err());
}

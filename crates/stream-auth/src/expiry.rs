//! Parsing of user-supplied credential expiry.
//!
//! Accepted forms:
//!
//! - empty input: the credential never expires;
//! - an ISO 8601 duration such as `P30D`, `PT12H` or `P1DT0.5H`, counted
//!   from now (a year is 365 days, a month 30 days);
//! - an RFC 3339 instant such as `2026-01-01T00:00:00Z`.

use crate::error::{Result, StoreError};
use crate::model::AuthExpiry;

const MINUTE: f64 = 60.0;
const HOUR: f64 = 60.0 * MINUTE;
const DAY: f64 = 24.0 * HOUR;
const MONTH: f64 = 30.0 * DAY;
const YEAR: f64 = 365.0 * DAY;

/// Parse an expiry relative to `now` (epoch seconds).
///
/// # Errors
///
/// Returns `StoreError::InvalidExpiry` for input that is neither empty, a
/// non-zero duration, nor an RFC 3339 instant.
pub fn parse_expiry(input: &str, now: i64) -> Result<AuthExpiry> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(AuthExpiry::Never);
    }

    if input.starts_with('P') {
        let secs = parse_duration_secs(input)?;
        return Ok(AuthExpiry::At(now.saturating_add(secs)));
    }

    chrono::DateTime::parse_from_rfc3339(input)
        .map(|t| AuthExpiry::At(t.timestamp()))
        .map_err(|_| StoreError::InvalidExpiry(input.to_string()))
}

/// Total length of an ISO 8601 duration in whole seconds.
fn parse_duration_secs(input: &str) -> Result<i64> {
    let invalid = || StoreError::InvalidExpiry(input.to_string());

    let mut total = 0.0_f64;
    let mut number = String::new();
    let mut in_time = false;
    let mut seen_unit = false;

    for ch in input.chars().skip(1) {
        match ch {
            '0'..='9' | '.' => number.push(ch),
            'T' if !in_time && number.is_empty() => in_time = true,
            unit => {
                let value: f64 = number.parse().map_err(|_| invalid())?;
                number.clear();
                let scale = match (in_time, unit) {
                    (false, 'Y') => YEAR,
                    (false, 'M') => MONTH,
                    (false, 'D') => DAY,
                    (true, 'H') => HOUR,
                    (true, 'M') => MINUTE,
                    (true, 'S') => 1.0,
                    _ => return Err(invalid()),
                };
                total += value * scale;
                seen_unit = true;
            }
        }
    }

    if !number.is_empty() || !seen_unit {
        return Err(invalid());
    }

    let secs = total.round();
    if secs <= 0.0 || !secs.is_finite() || secs > i64::MAX as f64 {
        return Err(StoreError::InvalidExpiry(format!(
            "{input} (duration must be > 0)"
        )));
    }
    Ok(secs as i64)
}

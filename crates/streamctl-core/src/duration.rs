use std::time::Duration;

use crate::error::InvalidDuration;

/// Parse a compact duration string into a [`Duration`].
///
/// Accepts one or more `<number><unit>` segments where the unit is `s`,
/// `m`, `h` or `d`, e.g. `"30m"`, `"72h"`, `"3d"`, `"1h30m"`. Retention
/// durations, retry intervals and task timeouts all use this format.
pub fn parse_duration(s: &str) -> Result<Duration, InvalidDuration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(InvalidDuration("empty string".into()));
    }

    let mut total_secs: u64 = 0;
    let mut digits = String::new();
    let mut seen_segment = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        if digits.is_empty() {
            return Err(InvalidDuration(format!("unexpected '{ch}' in {s:?}")));
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| InvalidDuration(format!("bad number in {s:?}")))?;
        let unit_secs = match ch {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            other => return Err(InvalidDuration(format!("unknown unit '{other}' in {s:?}"))),
        };
        total_secs = total_secs
            .checked_add(value.saturating_mul(unit_secs))
            .ok_or_else(|| InvalidDuration(format!("overflow in {s:?}")))?;
        digits.clear();
        seen_segment = true;
    }

    if !digits.is_empty() {
        return Err(InvalidDuration(format!("missing unit in {s:?}")));
    }
    if !seen_segment {
        return Err(InvalidDuration(format!("no segments in {s:?}")));
    }
    Ok(Duration::from_secs(total_secs))
}

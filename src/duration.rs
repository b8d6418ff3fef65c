//! Duration text in Go's `time.Duration` notation.
//!
//! Scripts read and write durations such as `max_batch_delay` or
//! `Options.timeout` as strings like `"10ms"`, `"1.5s"` or `"1h2m3s"`.

use crate::{Error, Result};
use std::time::Duration;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Formats a duration the way Go's `Duration.String` does.
///
/// ```
/// use std::time::Duration;
/// assert_eq!(luabolt::duration::format(Duration::from_millis(10)), "10ms");
/// assert_eq!(luabolt::duration::format(Duration::from_secs(3723)), "1h2m3s");
/// ```
pub fn format(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < NANOS_PER_MICRO {
        return format!("{}ns", nanos);
    }
    if nanos < NANOS_PER_MILLI {
        return format!("{}µs", decimal(nanos, NANOS_PER_MICRO));
    }
    if nanos < NANOS_PER_SEC {
        return format!("{}ms", decimal(nanos, NANOS_PER_MILLI));
    }

    let secs = nanos / NANOS_PER_SEC;
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let rest = nanos - (hours * 3600 + minutes * 60) * NANOS_PER_SEC;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    out.push_str(&decimal(rest, NANOS_PER_SEC));
    out.push('s');
    out
}

/// Renders `value / unit` with trailing fractional zeros trimmed.
fn decimal(value: u128, unit: u128) -> String {
    let whole = value / unit;
    let frac = value % unit;
    if frac == 0 {
        return whole.to_string();
    }
    let width = unit.ilog10() as usize;
    let digits = format!("{:0width$}", frac, width = width);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Parses Go duration text such as `"300ms"`, `"1.5h"` or `"2h45m"`.
///
/// Accepted units are `ns`, `us`, `µs`, `ms`, `s`, `m` and `h`. Negative
/// durations are rejected.
pub fn parse(text: &str) -> Result<Duration> {
    let invalid = || Error::invalid_duration(text);

    let mut rest = text.strip_prefix('+').unwrap_or(text);
    if rest.starts_with('-') {
        // "-0" is the only negative spelling that fits a std Duration.
        if rest[1..].chars().all(|c| c == '0') && rest.len() > 1 {
            return Ok(Duration::ZERO);
        }
        return Err(invalid());
    }
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let (int_part, after) = rest.split_at(int_len);
        let (frac_part, after) = match after.strip_prefix('.') {
            Some(tail) => {
                let frac_len = tail.bytes().take_while(u8::is_ascii_digit).count();
                tail.split_at(frac_len)
            }
            None => ("", after),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = after
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() || *c == '.')
            .map(|(i, _)| i)
            .unwrap_or(after.len());
        let (unit_text, tail) = after.split_at(unit_len);
        let unit = unit_nanos(unit_text).ok_or_else(invalid)?;

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        let mut amount = whole.checked_mul(unit).ok_or_else(invalid)?;
        if !frac_part.is_empty() {
            // Digits beyond nanosecond precision cannot change the result.
            let digits = &frac_part[..frac_part.len().min(18)];
            let scale = 10u128.pow(digits.len() as u32);
            let frac: u128 = digits.parse().map_err(|_| invalid())?;
            amount = amount.checked_add(frac * unit / scale).ok_or_else(invalid)?;
        }
        total = total.checked_add(amount).ok_or_else(invalid)?;
        rest = tail;
    }

    let nanos = u64::try_from(total).map_err(|_| invalid())?;
    Ok(Duration::from_nanos(nanos))
}

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3600 * NANOS_PER_SEC),
        _ => None,
    }
}

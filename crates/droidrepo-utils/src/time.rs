use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, the unit index timestamps are published in.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Parses a compact duration such as `90s`, `3h` or `1d12h` into milliseconds.
///
/// Returns `None` for malformed input, unknown units, or on overflow.
pub fn parse_duration(input: &str) -> Option<u64> {
    let mut total: u64 = 0;
    let mut number: Option<u64> = None;

    for c in input.trim().chars() {
        if let Some(digit) = c.to_digit(10) {
            number = Some(number.unwrap_or(0).checked_mul(10)?.checked_add(digit as u64)?);
            continue;
        }

        let unit = match c {
            's' => 1_000,
            'm' => 60_000,
            'h' => 3_600_000,
            'd' => 86_400_000,
            _ => return None,
        };
        total = total.checked_add(number.take()?.checked_mul(unit)?)?;
    }

    if number.is_some() || total == 0 && input.trim().is_empty() {
        return None;
    }
    Some(total)
}

//! Duration strings used in policy files ("500ms", "10s", "5m", "1h").

use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Parse a duration string like "30s" or "5m".
///
/// Accepted units are `ns`, `ms`, `s`, `m` and `h`. A bare number is read
/// as seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);

    if digits.is_empty() {
        return Err(invalid(s, "missing numeric value"));
    }

    let value: u64 = digits
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(s, &e.to_string()))?;

    let duration = match unit {
        "ns" => Duration::from_nanos(value),
        "ms" => Duration::from_millis(value),
        "" | "s" => Duration::from_secs(value),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| invalid(s, "value too large"))?,
        "h" => value
            .checked_mul(3600)
            .map(Duration::from_secs)
            .ok_or_else(|| invalid(s, "value too large"))?,
        other => return Err(invalid(s, &format!("unknown unit {other:?}"))),
    };

    Ok(duration)
}

/// Render a duration using the largest unit that represents it exactly.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos % 1_000_000 != 0 {
        return format!("{nanos}ns");
    }

    let millis = d.as_millis();
    if millis % 3_600_000 == 0 {
        format!("{}h", millis / 3_600_000)
    } else if millis % 60_000 == 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{millis}ms")
    }
}

fn invalid(input: &str, reason: &str) -> ConfigError {
    ConfigError::Duration {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

/// Serde adapter storing a `Duration` as a duration string.
pub mod serde_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

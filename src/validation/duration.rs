//! # Duration Validation
//!
//! Parses operator-supplied TTL strings such as `90d`.

use anyhow::Result;
use regex::Regex;
use std::time::Duration;

/// Parse a duration string into `std::time::Duration`
/// Supports formats: "30s", "15m", "12h", "90d", "2w"
/// Returns Duration or error if format is invalid
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_trimmed = duration_str.trim();

    if duration_trimmed.is_empty() {
        return Err(anyhow::anyhow!("Duration string cannot be empty"));
    }

    let duration_regex = Regex::new(r"^(?P<number>\d+)(?P<unit>[smhdw])$")
        .map_err(|e| anyhow::anyhow!("Failed to compile regex: {e}"))?;

    let lower = duration_trimmed.to_lowercase();

    let captures = duration_regex.captures(&lower).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid duration format '{}'. Expected format: <number><unit> (e.g., '12h', '30d', '2w')",
            duration_trimmed
        )
    })?;

    let number_str = captures
        .name("number")
        .ok_or_else(|| anyhow::anyhow!("Failed to extract number from duration '{duration_trimmed}'"))?
        .as_str();

    let unit = captures
        .name("unit")
        .ok_or_else(|| anyhow::anyhow!("Failed to extract unit from duration '{duration_trimmed}'"))?
        .as_str();

    let number: u64 = number_str.parse().map_err(|e| {
        anyhow::anyhow!("Invalid duration number '{number_str}' in '{duration_trimmed}': {e}")
    })?;

    if number == 0 {
        return Err(anyhow::anyhow!(
            "Duration number must be greater than 0, got '{duration_trimmed}'"
        ));
    }

    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        "w" => 604_800,
        _ => {
            return Err(anyhow::anyhow!(
                "Invalid unit '{unit}' in duration '{duration_trimmed}'. Expected: s, m, h, d or w"
            ));
        }
    };

    let seconds = number
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("Duration '{duration_trimmed}' is too large"))?;

    Ok(Duration::from_secs(seconds))
}

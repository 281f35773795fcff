//! Conversions between DSL duration declarations and [`std::time::Duration`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A duration expressed the way the DSL declares it: a map of named
/// components which are summed together. All fields are optional; a fully
/// empty spec is a zero duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DurationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milliseconds: Option<u64>,
}

impl DurationSpec {
    pub fn is_zero(&self) -> bool {
        self.to_duration().is_zero()
    }

    pub fn to_duration(&self) -> Duration {
        let mut millis = self.milliseconds.unwrap_or(0);
        millis += self.seconds.unwrap_or(0) * 1_000;
        millis += self.minutes.unwrap_or(0) * 60_000;
        millis += self.hours.unwrap_or(0) * 3_600_000;
        millis += self.days.unwrap_or(0) * 86_400_000;
        Duration::from_millis(millis)
    }
}

/// Parse a compact duration string such as `30s`, `5m`, `1h`, `250ms` or a
/// combination like `1m30s`. Used for `metadata.timeout` on listen tasks.
pub fn parse_duration_str(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration: {s}"))?;
        digits.clear();

        let unit = match c {
            'd' => Duration::from_secs(value * 86_400),
            'h' => Duration::from_secs(value * 3_600),
            's' => Duration::from_secs(value),
            'm' => {
                if chars.peek() == Some(&'s') {
                    chars.next();
                    Duration::from_millis(value)
                } else {
                    Duration::from_secs(value * 60)
                }
            }
            _ => return Err(format!("unknown duration unit '{c}' in: {s}")),
        };
        total += unit;
    }

    if !digits.is_empty() {
        return Err(format!("duration missing unit: {s}"));
    }

    Ok(total)
}

//! Small shared helpers: duration-string parsing and serde adapters.

use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Parses a duration string in the format "250ms", "30s", "10m", "5h", "3d".
///
/// Supported units:
/// - `ms` for milliseconds
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
/// - `d` for days
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    if let Some(value_str) = s.strip_suffix("ms") {
        return match u64::from_str(value_str) {
            Ok(v) => Ok(Duration::from_millis(v)),
            Err(_) => Err(format!("Invalid numeric value in duration: '{}'", value_str)),
        };
    }

    let unit_char = s.chars().last().unwrap();
    let value_str = &s[0..s.len() - 1];

    let value = match u64::from_str(value_str) {
        Ok(v) => v,
        Err(_) => return Err(format!("Invalid numeric value in duration: '{}'", value_str)),
    };

    match unit_char {
        's' => Ok(Duration::from_secs(value)),
        'm' => Ok(Duration::from_secs(value * 60)),
        'h' => Ok(Duration::from_secs(value * 60 * 60)),
        'd' => Ok(Duration::from_secs(value * 24 * 60 * 60)),
        _ => Err(format!(
            "Unknown duration unit: '{}'. Use 'ms', 's', 'm', 'h', or 'd'.",
            unit_char
        )),
    }
}

/// Seconds since the Unix epoch as a float, for output timestamping.
pub fn epoch_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

/// Serde adapter that represents a `Duration` as fractional seconds.
pub mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "invalid duration in seconds: {}",
                secs
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Serde adapter for `Option<Duration>` as fractional seconds.
pub mod serde_opt_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(deserializer)?;
        match secs {
            None => Ok(None),
            Some(secs) if secs.is_finite() && secs >= 0.0 => {
                Ok(Some(Duration::from_secs_f64(secs)))
            }
            Some(secs) => Err(serde::de::Error::custom(format!(
                "invalid duration in seconds: {}",
                secs
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_seconds() {
        assert_eq!(parse_duration_string("30s").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_duration_milliseconds() {
        assert_eq!(
            parse_duration_string("250ms").unwrap(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_parse_duration_minutes_hours_days() {
        assert_eq!(parse_duration_string("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration_string("5h").unwrap(), Duration::from_secs(18_000));
        assert_eq!(parse_duration_string("3d").unwrap(), Duration::from_secs(259_200));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration_string("").is_err());
        assert!(parse_duration_string("10x").is_err());
        assert!(parse_duration_string("abcm").is_err());
    }

    #[test]
    fn test_epoch_seconds_monotone() {
        let a = epoch_seconds(SystemTime::now());
        let b = epoch_seconds(SystemTime::now());
        assert!(b >= a);
    }
}

use std::str::FromStr;
use tokio::time::Duration;

/// Parses a duration string in the format "500ms", "30s", "10m", "5h", "3d".
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

    let (value_str, unit) = match s.strip_suffix("ms") {
        Some(rest) => (rest, "ms"),
        None => s.split_at(s.len() - s.chars().last().map_or(0, char::len_utf8)),
    };

    let value = match u64::from_str(value_str) {
        Ok(v) => v,
        Err(_) => {
            return Err(format!(
                "Invalid numeric value in duration: '{}'",
                value_str
            ))
        }
    };

    let seconds_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => {
            return Err(format!(
                "Unknown duration unit: '{}'. Use 'ms', 's', 'm', 'h', or 'd'.",
                unit
            ))
        }
    };

    value
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Duration '{}' is too large", s))
}

/// Formats a duration the way it is written in config files ("1500ms", "30s").
pub fn format_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Serde adapter for durations written as "500ms"/"30s" or as bare seconds.
pub mod serde_duration {
    use super::{format_duration, parse_duration_string};
    use serde::{Deserialize, Deserializer, Serializer};
    use tokio::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Seconds(u64),
    }

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        from_raw(Raw::deserialize(deserializer)?)
    }

    fn from_raw<E: serde::de::Error>(raw: Raw) -> Result<Duration, E> {
        match raw {
            Raw::Text(s) => parse_duration_string(&s).map_err(E::custom),
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        }
    }

    /// Same format for an optional duration; a missing or null value is None.
    pub mod option {
        use super::{from_raw, Raw};
        use crate::utils::format_duration;
        use serde::{Deserialize, Deserializer, Serializer};
        use tokio::time::Duration;

        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match duration {
                Some(d) => serializer.serialize_some(&format_duration(*d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<Raw>::deserialize(deserializer)?
                .map(from_raw)
                .transpose()
        }
    }
}

/// Parses a comma-separated header string with support for escaped commas.
///
/// Use `\,` to include a literal comma in a header value.
/// Example: "X-Bench-Run:nightly,Accept:application/json\,text/plain"
pub fn parse_headers_with_escapes(headers_str: &str) -> Vec<String> {
    let mut headers = Vec::new();
    let mut current_header = String::new();
    let mut chars = headers_str.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&',') => {
                current_header.push(',');
                chars.next();
            }
            ',' => {
                if !current_header.trim().is_empty() {
                    headers.push(current_header.trim().to_string());
                }
                current_header.clear();
            }
            _ => current_header.push(ch),
        }
    }

    if !current_header.trim().is_empty() {
        headers.push(current_header.trim().to_string());
    }

    headers
}

use crate::config::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

static FULL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d+(?:\.\d+)?(?:ns|us|µs|ms|s|m|h))+$").expect("valid duration regex")
});
static PART_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)(ns|us|µs|ms|s|m|h)").expect("valid duration regex"));
static BARE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)?$").expect("valid number regex"));

const UNITS: [(&str, u64); 6] = [
    ("h", 3_600_000_000_000),
    ("m", 60_000_000_000),
    ("s", 1_000_000_000),
    ("ms", 1_000_000),
    ("us", 1_000),
    ("ns", 1),
];

fn unit_nanos(unit: &str) -> u64 {
    match unit {
        "µs" => 1_000,
        u => UNITS.iter().find(|(name, _)| *name == u).map(|(_, n)| *n).unwrap_or(1),
    }
}

/// Parses `250ms`, `1.5s`, `1m30s` and friends. A bare number is milliseconds.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let s = input.trim();
    let invalid = || ConfigError::InvalidDuration(input.to_string());
    let nanos = if BARE_RE.is_match(s) {
        s.parse::<f64>().map_err(|_| invalid())? * 1_000_000.0
    } else if FULL_RE.is_match(s) {
        let mut total = 0f64;
        for cap in PART_RE.captures_iter(s) {
            let value: f64 = cap[1].parse().map_err(|_| invalid())?;
            total += value * unit_nanos(&cap[2]) as f64;
        }
        total
    } else {
        return Err(invalid());
    };
    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}

/// Renders a duration in the largest unit that represents it exactly.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    for (name, per) in UNITS {
        let per = per as u128;
        if nanos % per == 0 {
            return format!("{}{}", nanos / per, name);
        }
    }
    format!("{}ns", nanos)
}

/// Serde adapter storing `Option<Duration>` as a human duration string.
pub mod duration_opt {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => ser.serialize_str(&format_duration(*d)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(de)?;
        raw.map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

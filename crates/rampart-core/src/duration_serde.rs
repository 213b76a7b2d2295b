//! Serde helpers for human-readable durations.
//!
//! Durations serialize as humantime strings (`"30s"`, `"250ms"`). On input a
//! bare number is also accepted and read as (possibly fractional) seconds.

use serde::{de, Deserialize, Deserializer, Serializer};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Text(String),
    Seconds(f64),
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Text(text) => humantime::parse_duration(text.trim()).map_err(de::Error::custom),
        RawDuration::Seconds(secs) => Duration::try_from_secs_f64(secs).map_err(de::Error::custom),
    }
}

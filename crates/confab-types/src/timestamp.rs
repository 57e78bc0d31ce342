//! Serde adapter for timestamp fields.
//!
//! Snapshots written by older builds (and by hand) carry timestamps as RFC 3339
//! strings, naive ISO strings, or epoch milliseconds. All of them deserialize
//! to `DateTime<Utc>`; serialization always writes RFC 3339 with milliseconds.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{de, Deserialize, Deserializer, Serializer};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Fractional(f64),
    Text(String),
}

pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Millis(ms) => DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {}", ms))),
        RawTimestamp::Fractional(ms) => DateTime::from_timestamp_millis(ms as i64)
            .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {}", ms))),
        RawTimestamp::Text(text) => parse(&text)
            .ok_or_else(|| de::Error::custom(format!("unrecognized timestamp: {:?}", text))),
    }
}

/// Parse a textual timestamp. Strings without an offset are read as UTC.
pub fn parse(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

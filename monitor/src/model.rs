use chrono::NaiveDateTime;
use serde::Deserialize;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Reading as published by the logger
#[derive(Debug, Clone, Deserialize)]
pub struct Reading {
    #[serde(deserialize_with = "parse_timestamp")]
    pub timestamp: NaiveDateTime,
    pub temperature: f64,
    pub humidity: f64,
    pub gas_level: f64,
}

fn parse_timestamp<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
}

use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Wall-clock format shared by the CSV log and the MQTT payload.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One sampling tick's worth of air-quality data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub temperature: f64,
    pub humidity: f64,
    #[serde(serialize_with = "round_gas")]
    pub gas_level: f64,
}

impl Reading {
    pub fn new(timestamp: NaiveDateTime, temperature: f64, humidity: f64, gas_level: f64) -> Self {
        Self {
            timestamp,
            temperature,
            humidity,
            gas_level,
        }
    }

    /// Formats the reading as one line of the local log, without the trailing newline.
    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{:.3}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.temperature,
            self.humidity,
            self.gas_level
        )
    }
}

/// Current local time truncated to whole seconds.
pub fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

fn round_gas<S>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64((value * 10_000.0).round() / 10_000.0)
}

mod timestamp_format {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

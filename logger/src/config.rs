use crate::errors::{Error, Result};
use crate::publisher::PublisherConfig;
use crate::sensors::simulated::GlitchRates;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Air-quality logger: samples the sensors, keeps a local CSV log and mirrors
/// every reading to an MQTT broker.
#[derive(Debug, Clone, Parser)]
#[command(name = "airlog", version)]
pub struct Config {
    /// MQTT broker host
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    pub mqtt_broker: String,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    /// Topic readings are published to
    #[arg(long, env = "MQTT_TOPIC", default_value = "home/air_quality")]
    pub mqtt_topic: String,

    #[arg(long, env = "MQTT_KEEP_ALIVE_SECS", default_value_t = 60)]
    pub keep_alive_secs: u64,

    /// Local CSV log, created with a header if missing
    #[arg(long, env = "LOG_FILE", default_value = "smart_air_data.csv")]
    pub log_file: PathBuf,

    /// Seconds between sampling ticks
    #[arg(long, env = "CADENCE_SECS", default_value_t = 20)]
    pub cadence_secs: u64,

    /// Delay before re-polling a climate sensor that returned no data
    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = 2000)]
    pub retry_delay_ms: u64,

    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value_t = 3000)]
    pub connect_timeout_ms: u64,

    #[arg(long, env = "PUBLISH_TIMEOUT_MS", default_value_t = 2000)]
    pub publish_timeout_ms: u64,

    /// Temperature reported until the climate sensor first answers
    #[arg(long, env = "INITIAL_TEMPERATURE", default_value_t = 20.0)]
    pub initial_temperature: f64,

    /// Humidity reported until the climate sensor first answers
    #[arg(long, env = "INITIAL_HUMIDITY", default_value_t = 50.0)]
    pub initial_humidity: f64,

    /// Serve /metrics and the latest reading on this address
    #[arg(long, env = "HTTP_ADDR")]
    pub http_addr: Option<String>,

    /// Simulated climate sensor: probability of returning no data
    #[arg(long, env = "SIM_NO_DATA_RATE", default_value_t = 0.10)]
    pub sim_no_data_rate: f64,

    /// Simulated climate sensor: probability of a transient fault
    #[arg(long, env = "SIM_TRANSIENT_RATE", default_value_t = 0.05)]
    pub sim_transient_rate: f64,

    /// Simulated climate sensor: probability of a hardware fault
    #[arg(long, env = "SIM_HARDWARE_RATE", default_value_t = 0.01)]
    pub sim_hardware_rate: f64,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.cadence_secs == 0 {
            return Err(Error::Config("cadence must be at least one second".to_string()));
        }
        if self.retry_delay() >= self.cadence() {
            return Err(Error::Config(format!(
                "retry delay {:?} must be shorter than the cadence {:?}",
                self.retry_delay(),
                self.cadence()
            )));
        }
        if self.connect_timeout_ms == 0 || self.publish_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        if self.keep_alive_secs < 5 {
            return Err(Error::Config(
                "MQTT keep-alive must be at least 5 seconds".to_string(),
            ));
        }
        // the connection sits idle between ticks
        if self.keep_alive_secs <= self.cadence_secs {
            return Err(Error::Config(format!(
                "MQTT keep-alive {}s must be longer than the cadence {}s",
                self.keep_alive_secs, self.cadence_secs
            )));
        }
        if self.mqtt_topic.is_empty() {
            return Err(Error::Config("MQTT topic cannot be empty".to_string()));
        }

        let rates = [
            self.sim_no_data_rate,
            self.sim_transient_rate,
            self.sim_hardware_rate,
        ];
        if rates.iter().any(|r| !(0.0..=1.0).contains(r)) || rates.iter().sum::<f64>() > 1.0 {
            return Err(Error::Config(
                "simulated glitch rates must each be in [0, 1] and sum to at most 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.cadence_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn publisher(&self, client_id: String) -> PublisherConfig {
        PublisherConfig {
            broker: self.mqtt_broker.clone(),
            port: self.mqtt_port,
            client_id,
            topic: self.mqtt_topic.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
        }
    }

    pub fn glitch_rates(&self) -> GlitchRates {
        GlitchRates {
            no_data: self.sim_no_data_rate,
            transient: self.sim_transient_rate,
            hardware: self.sim_hardware_rate,
        }
    }
}

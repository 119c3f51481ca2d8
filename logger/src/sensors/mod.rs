//! Sensor adapter contracts.
//!
//! Hardware drivers live outside this crate and implement these traits. The
//! [`simulated`] adapters stand in for them when no hardware is attached.

pub mod simulated;

use thiserror::Error;

/// Analog sensor that always produces a value (MQ-135 gas sensor behind an ADC).
pub trait ContinuousSensor {
    fn sample(&mut self) -> f64;
}

/// Result of polling the intermittent temperature/humidity sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClimateSample {
    Valid { temperature: f64, humidity: f64 },
    /// The sensor answered but had nothing to report this time.
    NoData,
}

/// Errors raised by the intermittent sensor.
///
/// Both variants are handled the same way by the sampler; they only differ in
/// how loudly they are logged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorFault {
    /// Timing glitch or checksum mismatch, expected to clear on its own.
    #[error("transient sensor fault: {0}")]
    Transient(String),

    /// Anything else the driver reports.
    #[error("sensor hardware fault: {0}")]
    Hardware(String),
}

/// Digital sensor that may fail or return nothing (DHT11-style).
pub trait IntermittentSensor {
    fn sample(&mut self) -> Result<ClimateSample, SensorFault>;
}

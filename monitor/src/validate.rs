use crate::errors::{Error, Result};
use crate::model::Reading;

const TEMP_MIN: f64 = -40.0;
const TEMP_MAX: f64 = 80.0;
const HUMIDITY_MIN: f64 = 0.0;
const HUMIDITY_MAX: f64 = 100.0;

/// Validates a received reading
pub fn validate(reading: &Reading) -> Result<()> {
    // Validate temperature
    if !(TEMP_MIN..=TEMP_MAX).contains(&reading.temperature) {
        return Err(Error::Validation(format!(
            "Temperature {} out of range [{}, {}]",
            reading.temperature, TEMP_MIN, TEMP_MAX
        )));
    }

    // Validate humidity
    if !(HUMIDITY_MIN..=HUMIDITY_MAX).contains(&reading.humidity) {
        return Err(Error::Validation(format!(
            "Humidity {} out of range [{}, {}]",
            reading.humidity, HUMIDITY_MIN, HUMIDITY_MAX
        )));
    }

    // Gas is an ADC voltage
    if !reading.gas_level.is_finite() || reading.gas_level < 0.0 {
        return Err(Error::Validation(format!(
            "Gas level {} is not a valid voltage",
            reading.gas_level
        )));
    }

    Ok(())
}

use crate::metrics::{SENSOR_FAULTS_TOTAL, SENSOR_NO_DATA_TOTAL};
use crate::sensors::{ClimateSample, SensorFault};
use tracing::{error, warn};

/// Last-known-good temperature/humidity pair used to forward-fill gaps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconciliationState {
    pub temperature: f64,
    pub humidity: f64,
}

/// What the sampler should do with the current tick after reconciling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// A fresh pair was stored.
    Fresh,
    /// The sensor faulted; the previous pair is carried forward.
    ForwardFilled,
    /// The sensor had nothing to report; re-sample after the retry delay.
    Retry,
}

impl ReconciliationState {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature,
            humidity,
        }
    }

    /// Folds one intermittent-sensor result into the state.
    pub fn apply(&mut self, sample: Result<ClimateSample, SensorFault>) -> Reconciled {
        match sample {
            Ok(ClimateSample::Valid {
                temperature,
                humidity,
            }) => {
                self.temperature = temperature;
                self.humidity = humidity;
                Reconciled::Fresh
            }
            Ok(ClimateSample::NoData) => {
                SENSOR_NO_DATA_TOTAL.inc();
                Reconciled::Retry
            }
            Err(fault) => {
                SENSOR_FAULTS_TOTAL.inc();
                match &fault {
                    SensorFault::Transient(_) => warn!(
                        "{}, using last known {}C / {}%",
                        fault, self.temperature, self.humidity
                    ),
                    SensorFault::Hardware(_) => error!(
                        "{}, using last known {}C / {}%",
                        fault, self.temperature, self.humidity
                    ),
                }
                Reconciled::ForwardFilled
            }
        }
    }
}

impl Default for ReconciliationState {
    fn default() -> Self {
        Self::new(20.0, 50.0)
    }
}

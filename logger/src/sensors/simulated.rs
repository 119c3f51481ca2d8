use super::{ClimateSample, ContinuousSensor, IntermittentSensor, SensorFault};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Gas sensor producing ADC voltages around a slowly drifting baseline.
pub struct SimulatedGasSensor {
    rng: StdRng,
    baseline: f64,
}

impl SimulatedGasSensor {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn from_rng(rng: StdRng) -> Self {
        Self {
            rng,
            baseline: 0.45,
        }
    }
}

impl Default for SimulatedGasSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContinuousSensor for SimulatedGasSensor {
    fn sample(&mut self) -> f64 {
        self.baseline = (self.baseline + self.rng.gen_range(-0.01..0.01)).clamp(0.1, 3.0);
        let spike = if self.rng.gen_bool(0.02) {
            self.rng.gen_range(0.2..1.0) // 2% pollution spikes
        } else {
            0.0
        };
        self.baseline + spike + self.rng.gen_range(-0.005..0.005)
    }
}

/// Probabilities of each failure mode per call, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy)]
pub struct GlitchRates {
    pub no_data: f64,
    pub transient: f64,
    pub hardware: f64,
}

impl Default for GlitchRates {
    fn default() -> Self {
        Self {
            no_data: 0.10,
            transient: 0.05,
            hardware: 0.01,
        }
    }
}

/// Temperature/humidity sensor that misbehaves at the configured rates.
pub struct SimulatedClimateSensor {
    rng: StdRng,
    rates: GlitchRates,
}

impl SimulatedClimateSensor {
    pub fn new(rates: GlitchRates) -> Self {
        Self::from_rng(StdRng::from_entropy(), rates)
    }

    pub fn from_rng(rng: StdRng, rates: GlitchRates) -> Self {
        Self { rng, rates }
    }
}

impl IntermittentSensor for SimulatedClimateSensor {
    fn sample(&mut self) -> Result<ClimateSample, SensorFault> {
        let roll: f64 = self.rng.gen();
        let rates = self.rates;

        if roll < rates.hardware {
            return Err(SensorFault::Hardware("no response from sensor bus".to_string()));
        }
        if roll < rates.hardware + rates.transient {
            return Err(SensorFault::Transient("checksum did not validate".to_string()));
        }
        if roll < rates.hardware + rates.transient + rates.no_data {
            return Ok(ClimateSample::NoData);
        }

        // DHT11 reports whole degrees and whole percent
        Ok(ClimateSample::Valid {
            temperature: self.rng.gen_range(18..=28) as f64,
            humidity: self.rng.gen_range(35..=70) as f64,
        })
    }
}

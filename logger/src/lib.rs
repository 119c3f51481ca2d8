//! Air-quality telemetry logger.
//!
//! Samples a gas sensor and a temperature/humidity sensor on a fixed cadence,
//! appends every reading to a local CSV log and mirrors it to an MQTT broker.

pub mod config;
pub mod errors;
pub mod http;
pub mod metrics;
pub mod model;
pub mod publisher;
pub mod reconcile;
pub mod sampler;
pub mod sensors;
pub mod storage;

use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref READINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "airlog_readings_total",
        "Total readings assembled by the sampler"
    ))
    .unwrap();
    pub static ref LOG_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "airlog_log_failures_total",
        "Total failed appends to the local log"
    ))
    .unwrap();
    pub static ref PUBLISH_DELIVERED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "airlog_publish_delivered_total",
        "Total readings handed to the broker"
    ))
    .unwrap();
    pub static ref PUBLISH_FAILED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "airlog_publish_failed_total",
        "Total readings kept local only"
    ))
    .unwrap();
    pub static ref CONNECT_ATTEMPTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "airlog_connect_attempts_total",
        "Total broker connection attempts"
    ))
    .unwrap();
    pub static ref SENSOR_NO_DATA_TOTAL: Counter = Counter::with_opts(Opts::new(
        "airlog_sensor_no_data_total",
        "Total climate sensor polls that returned nothing"
    ))
    .unwrap();
    pub static ref SENSOR_FAULTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "airlog_sensor_faults_total",
        "Total climate sensor faults answered with forward-fill"
    ))
    .unwrap();
    pub static ref BROKER_CONNECTED: Gauge = Gauge::with_opts(Opts::new(
        "airlog_broker_connected",
        "1 while the publisher holds a broker connection"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(READINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LOG_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PUBLISH_DELIVERED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PUBLISH_FAILED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONNECT_ATTEMPTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SENSOR_NO_DATA_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SENSOR_FAULTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BROKER_CONNECTED.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

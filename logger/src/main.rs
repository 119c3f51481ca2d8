use airlog::config::Config;
use airlog::publisher::MqttPublisher;
use airlog::reconcile::ReconciliationState;
use airlog::sampler::{Sampler, Timing};
use airlog::sensors::simulated::{SimulatedClimateSensor, SimulatedGasSensor};
use airlog::storage::CsvLog;
use airlog::{http, metrics};
use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    config.validate()?;

    info!("Starting air-quality logger");
    info!(
        "MQTT broker: {}:{}, topic: {}",
        config.mqtt_broker, config.mqtt_port, config.mqtt_topic
    );
    metrics::init_metrics().context("Failed to register metrics")?;

    // The local log is the system of record, but a missing disk must not keep
    // the sampler from running: the header is retried on every append.
    let log = match CsvLog::open(&config.log_file).await {
        Ok(log) => log,
        Err(e) => {
            error!("Failed to prepare local log {}: {}", config.log_file.display(), e);
            CsvLog::new(&config.log_file)
        }
    };
    info!("Local log: {}", log.path().display());

    let client_id = format!("airlog-{}", uuid::Uuid::new_v4());
    let publisher = MqttPublisher::new(config.publisher(client_id));

    let (latest_tx, latest_rx) = watch::channel(None);

    if let Some(http_addr) = &config.http_addr {
        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", http_addr))?;
        info!("HTTP server listening on {}", http_addr);

        let app = http::create_router(latest_rx);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("HTTP server error: {}", e);
            }
        });
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        let _ = stop_tx.send(true);
    });

    let sampler = Sampler::new(
        SimulatedGasSensor::new(),
        SimulatedClimateSensor::new(config.glitch_rates()),
        log,
        publisher,
        ReconciliationState::new(config.initial_temperature, config.initial_humidity),
        Timing {
            cadence: config.cadence(),
            retry_delay: config.retry_delay(),
        },
    )
    .with_latest(latest_tx);

    let state = sampler.run(stop_rx).await;

    info!(
        "Stopped; last known climate {}C / {}%",
        state.temperature, state.humidity
    );
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM. Never resolves if neither can be
/// installed, so the sampler keeps running.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

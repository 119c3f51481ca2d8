mod errors;
mod model;
mod mqtt;
mod validate;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Subscribes to the logger's topic and reports every reading it sees.
#[derive(Debug, Parser)]
#[command(name = "airlog-monitor", version)]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    mqtt_broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    mqtt_port: u16,

    #[arg(long, env = "MQTT_TOPIC", default_value = "home/air_quality")]
    mqtt_topic: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting air-quality monitor");
    info!(
        "MQTT broker: {}:{}, topic: {}",
        args.mqtt_broker, args.mqtt_port, args.mqtt_topic
    );

    let client_id = format!("airlog-monitor-{}", uuid::Uuid::new_v4());

    tokio::select! {
        result = mqtt::run_subscriber(args.mqtt_broker, args.mqtt_port, client_id, args.mqtt_topic) => {
            if let Err(e) = result {
                error!("Subscriber failed: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

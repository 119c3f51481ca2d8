use crate::errors::{Error, Result};
use crate::model::Reading;
use crate::validate::validate;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub accepted: u64,
    pub rejected: u64,
}

pub async fn run_subscriber(
    broker: String,
    port: u16,
    client_id: String,
    topic: String,
) -> Result<()> {
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);
    let mut stats = Stats::default();

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // clean sessions drop subscriptions, so renew them on every connect
                client
                    .subscribe(topic.as_str(), QoS::AtMostOnce)
                    .await
                    .map_err(Error::Mqtt)?;
                info!("Subscribed to {}", topic);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "Received message on topic {}, size: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );

                match process_message(&publish.payload) {
                    Ok(reading) => {
                        stats.accepted += 1;
                        info!(
                            "{} T:{}C | H:{}% | GAS:{:.3}",
                            reading.timestamp,
                            reading.temperature,
                            reading.humidity,
                            reading.gas_level
                        );
                    }
                    Err(e) => {
                        stats.rejected += 1;
                        warn!(
                            "Rejected message ({} accepted, {} rejected so far): {}",
                            stats.accepted, stats.rejected, e
                        );
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll, so we just log and back off
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Parses and validates a single payload
fn process_message(payload: &[u8]) -> Result<Reading> {
    let reading = serde_json::from_slice::<Reading>(payload)?;
    validate(&reading)?;
    Ok(reading)
}

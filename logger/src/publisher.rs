use crate::errors::{Error, Result};
use crate::metrics::{
    BROKER_CONNECTED, CONNECT_ATTEMPTS_TOTAL, PUBLISH_DELIVERED_TOTAL, PUBLISH_FAILED_TOTAL,
};
use crate::model::Reading;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

/// Capacity of the rumqttc request channel. At most one publish is in flight.
const REQUEST_CAPACITY: usize = 10;

/// How long to wait for more broker traffic when catching up at the start of
/// a publish.
const DRAIN_WINDOW: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    Failed,
}

/// Best-effort mirror of the local log on a remote broker.
///
/// Implementations never return errors: every failure is folded into
/// [`PublishOutcome::Failed`] and retried, at most once, on the next call.
pub trait Publisher {
    fn publish(&mut self, reading: &Reading) -> impl Future<Output = PublishOutcome>;

    fn disconnect(&mut self) -> impl Future<Output = ()>;
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
}

/// A live connection. Nothing polls it between ticks, so keep-alive pings
/// sent during one publish are settled before that publish returns.
struct Session {
    client: AsyncClient,
    eventloop: EventLoop,
    ping_outstanding: bool,
    last_activity: Instant,
}

impl Session {
    fn new(client: AsyncClient, eventloop: EventLoop) -> Self {
        Self {
            client,
            eventloop,
            ping_outstanding: false,
            last_activity: Instant::now(),
        }
    }

    async fn poll(&mut self) -> Result<Event> {
        let event = self.eventloop.poll().await?;
        match event {
            Event::Outgoing(Outgoing::PingReq) => self.ping_outstanding = true,
            Event::Incoming(Packet::PingResp) => self.ping_outstanding = false,
            _ => {}
        }
        self.last_activity = Instant::now();
        Ok(event)
    }

    /// Handles whatever the broker sent since the last tick, surfacing a
    /// connection the broker has already closed.
    async fn drain(&mut self) -> Result<()> {
        while let Ok(event) = timeout(DRAIN_WINDOW, self.poll()).await {
            debug!("MQTT event since last tick: {:?}", event?);
        }
        Ok(())
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// MQTT publisher that owns its connection and drives the event loop inline.
///
/// Nothing runs in the background: the connection only makes progress while
/// `connect`, `publish` or `disconnect` is being awaited, each bounded by a
/// timeout.
pub struct MqttPublisher {
    config: PublisherConfig,
    state: ConnectionState,
    session: Option<Session>,
    connect_attempts: u64,
}

impl MqttPublisher {
    pub fn new(config: PublisherConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            session: None,
            connect_attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts
    }

    /// Makes a single, time-bounded attempt to reach the broker.
    pub async fn connect(&mut self) -> ConnectionState {
        self.session = None;
        self.set_state(ConnectionState::Connecting);
        self.connect_attempts += 1;
        CONNECT_ATTEMPTS_TOTAL.inc();

        info!(
            "Connecting to MQTT broker at {}:{}",
            self.config.broker, self.config.port
        );

        match timeout(self.config.connect_timeout, open_session(&self.config)).await {
            Ok(Ok(session)) => {
                info!("MQTT connected to {}:{}", self.config.broker, self.config.port);
                self.session = Some(session);
                self.set_state(ConnectionState::Connected);
            }
            Ok(Err(e)) => {
                warn!("Connection attempt failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
            }
            Err(_) => {
                warn!(
                    "Connection attempt failed: {}",
                    Error::Timeout(self.config.connect_timeout)
                );
                self.set_state(ConnectionState::Disconnected);
            }
        }

        self.state
    }

    async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        let session = self.session.as_mut().ok_or(Error::NotConnected)?;
        session.drain().await?;
        session
            .client
            .try_publish(&self.config.topic, QoS::AtMostOnce, false, payload)?;

        loop {
            match session.poll().await? {
                Event::Outgoing(Outgoing::Publish(_)) => break,
                event => debug!("MQTT event while publishing: {:?}", event),
            }
        }

        // an unanswered ping left behind would fail the next keep-alive
        while session.ping_outstanding {
            let event = session.poll().await?;
            debug!("MQTT event while awaiting ping response: {:?}", event);
        }
        Ok(())
    }

    /// True when the broker has likely dropped the session for inactivity.
    fn session_expired(&self) -> bool {
        let keep_alive = self.config.keep_alive;
        self.session
            .as_ref()
            .is_some_and(|s| !keep_alive.is_zero() && s.idle_for() >= keep_alive)
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        BROKER_CONNECTED.set(if state == ConnectionState::Connected {
            1.0
        } else {
            0.0
        });
    }

    fn mark_lost(&mut self) {
        self.session = None;
        self.set_state(ConnectionState::Disconnected);
    }
}

impl Publisher for MqttPublisher {
    async fn publish(&mut self, reading: &Reading) -> PublishOutcome {
        if self.state == ConnectionState::Connected && self.session_expired() {
            info!(
                "MQTT session idle for longer than keep-alive {:?}, reconnecting",
                self.config.keep_alive
            );
            self.mark_lost();
        }

        if self.state != ConnectionState::Connected
            && self.connect().await != ConnectionState::Connected
        {
            PUBLISH_FAILED_TOTAL.inc();
            return PublishOutcome::Failed;
        }

        let payload = match serde_json::to_vec(reading) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to serialize reading: {}", e);
                PUBLISH_FAILED_TOTAL.inc();
                return PublishOutcome::Failed;
            }
        };

        let publish_timeout = self.config.publish_timeout;
        match timeout(publish_timeout, self.send(payload)).await {
            Ok(Ok(())) => {
                PUBLISH_DELIVERED_TOTAL.inc();
                PublishOutcome::Delivered
            }
            Ok(Err(e)) => {
                warn!("Connection lost while publishing: {}", e);
                self.mark_lost();
                PUBLISH_FAILED_TOTAL.inc();
                PublishOutcome::Failed
            }
            Err(_) => {
                warn!("Publish failed: {}", Error::Timeout(publish_timeout));
                self.mark_lost();
                PUBLISH_FAILED_TOTAL.inc();
                PublishOutcome::Failed
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            info!("Disconnecting from MQTT broker");
            match session.client.try_disconnect() {
                Ok(()) => {
                    let flush = async {
                        loop {
                            match session.eventloop.poll().await {
                                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                                Ok(_) => {}
                            }
                        }
                    };
                    if timeout(self.config.publish_timeout, flush).await.is_err() {
                        warn!("Broker did not take the disconnect in time, dropping connection");
                    }
                }
                Err(e) => warn!("Failed to queue disconnect: {}", e),
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

async fn open_session(config: &PublisherConfig) -> Result<Session> {
    let mut mqtt_options = MqttOptions::new(&config.client_id, &config.broker, config.port);
    mqtt_options.set_keep_alive(config.keep_alive);
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(_)) => return Ok(Session::new(client, eventloop)),
            event => debug!("MQTT event while connecting: {:?}", event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
    const PINGRESP: [u8; 2] = [0xD0, 0x00];

    fn config(port: u16) -> PublisherConfig {
        PublisherConfig {
            broker: "127.0.0.1".to_string(),
            port,
            client_id: "airlog-test".to_string(),
            topic: "home/air_quality".to_string(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_millis(300),
            publish_timeout: Duration::from_millis(500),
        }
    }

    fn reading() -> Reading {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        Reading::new(ts, 21.5, 60.0, 0.42)
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Reads one MQTT control packet, returning its first header byte.
    async fn read_packet(socket: &mut TcpStream) -> Option<u8> {
        let header = socket.read_u8().await.ok()?;

        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            let byte = socket.read_u8().await.ok()?;
            remaining |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }

        let mut body = vec![0u8; remaining];
        socket.read_exact(&mut body).await.ok()?;
        Some(header)
    }

    /// Minimal broker: acknowledges CONNECT and answers every PINGREQ. The
    /// first `close_first` connections are closed right after CONNACK.
    /// Every packet header seen is forwarded to `seen`.
    async fn fake_broker(listener: TcpListener, close_first: usize, seen: mpsc::UnboundedSender<u8>) {
        let mut accepted = 0;
        while let Ok((mut socket, _)) = listener.accept().await {
            accepted += 1;
            let close_after_connack = accepted <= close_first;
            let seen = seen.clone();

            tokio::spawn(async move {
                while let Some(header) = read_packet(&mut socket).await {
                    let _ = seen.send(header);
                    match header >> 4 {
                        1 => {
                            if socket.write_all(&CONNACK_ACCEPTED).await.is_err() || close_after_connack {
                                return;
                            }
                        }
                        12 => {
                            if socket.write_all(&PINGRESP).await.is_err() {
                                return;
                            }
                        }
                        _ => {}
                    }
                }
            });
        }
    }

    #[tokio::test]
    async fn test_refused_connection_reports_disconnected() {
        let mut publisher = MqttPublisher::new(config(closed_port().await));

        assert_eq!(publisher.connect().await, ConnectionState::Disconnected);
        assert_eq!(publisher.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_publish_makes_one_connect_attempt_per_call() {
        let mut publisher = MqttPublisher::new(config(closed_port().await));

        assert_eq!(publisher.publish(&reading()).await, PublishOutcome::Failed);
        assert_eq!(publisher.connect_attempts(), 1);

        assert_eq!(publisher.publish(&reading()).await, PublishOutcome::Failed);
        assert_eq!(publisher.connect_attempts(), 2);
        assert_eq!(publisher.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_silent_broker_is_bounded_by_connect_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // accept and then say nothing
        let _broker = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let mut publisher = MqttPublisher::new(config(port));
        let start = std::time::Instant::now();
        let outcome = publisher.publish(&reading()).await;

        assert_eq!(outcome, PublishOutcome::Failed);
        assert_eq!(publisher.connect_attempts(), 1);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_publish_and_disconnect_against_fake_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];

            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0);
            assert_eq!(buf[0], 0x10, "expected CONNECT");
            socket.write_all(&CONNACK_ACCEPTED).await.unwrap();

            let mut received = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            received
        });

        let mut publisher = MqttPublisher::new(config(port));
        assert_eq!(publisher.publish(&reading()).await, PublishOutcome::Delivered);
        assert_eq!(publisher.state(), ConnectionState::Connected);

        publisher.disconnect().await;
        assert_eq!(publisher.state(), ConnectionState::Disconnected);

        let received = broker.await.unwrap();
        assert_eq!(received[0], 0x30, "expected QoS 0 PUBLISH");
        let text = String::from_utf8_lossy(&received);
        assert!(text.contains("home/air_quality"));
        assert!(text.contains("\"gas_level\":0.42"));
    }

    #[tokio::test]
    async fn test_dropped_connection_fails_once_then_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, _seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(fake_broker(listener, 1, seen_tx));

        let mut publisher = MqttPublisher::new(config(port));
        assert_eq!(publisher.connect().await, ConnectionState::Connected);

        // the broker hangs up between ticks
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(publisher.publish(&reading()).await, PublishOutcome::Failed);
        assert_eq!(publisher.state(), ConnectionState::Disconnected);
        assert_eq!(publisher.connect_attempts(), 1);

        assert_eq!(publisher.publish(&reading()).await, PublishOutcome::Delivered);
        assert_eq!(publisher.state(), ConnectionState::Connected);
        assert_eq!(publisher.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_keep_alive_pings_do_not_fail_publishes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(fake_broker(listener, 0, seen_tx));

        let mut publisher = MqttPublisher::new(PublisherConfig {
            keep_alive: Duration::from_secs(1),
            ..config(port)
        });

        // ticks shorter than keep-alive, spanning several ping intervals
        for _ in 0..8 {
            assert_eq!(publisher.publish(&reading()).await, PublishOutcome::Delivered);
            tokio::time::sleep(Duration::from_millis(700)).await;
        }
        assert_eq!(publisher.connect_attempts(), 1);
        publisher.disconnect().await;

        let mut publishes = 0;
        while let Ok(header) = seen_rx.try_recv() {
            if header >> 4 == 3 {
                publishes += 1;
            }
        }
        assert_eq!(publishes, 8);
    }

    #[tokio::test]
    async fn test_session_idle_past_keep_alive_is_renewed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, _seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(fake_broker(listener, 0, seen_tx));

        let mut publisher = MqttPublisher::new(PublisherConfig {
            keep_alive: Duration::from_secs(1),
            ..config(port)
        });

        assert_eq!(publisher.publish(&reading()).await, PublishOutcome::Delivered);
        tokio::time::sleep(Duration::from_millis(1_200)).await;

        assert_eq!(publisher.publish(&reading()).await, PublishOutcome::Delivered);
        assert_eq!(publisher.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_when_never_connected() {
        let mut publisher = MqttPublisher::new(config(closed_port().await));
        publisher.disconnect().await;
        assert_eq!(publisher.state(), ConnectionState::Disconnected);
    }
}
